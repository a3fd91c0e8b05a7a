/*
 * vinmail embeddable SMTP receiver
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

//! Canned responses for every protocol-defined outcome and the static
//! projection of RFC 3463 enhanced status codes onto basic reply codes.

use crate::response::{EnhancedCode, Response};

/// positive delivery action
pub const CLASS_SUCCESS: u16 = 2;
/// persistent transient failure, sending again may succeed
pub const CLASS_TRANSIENT_FAILURE: u16 = 4;
/// permanent failure, not likely to be resolved by resending as-is
pub const CLASS_PERMANENT_FAILURE: u16 = 5;

/// Project an enhanced status code onto its basic 3-digit code.
///
/// Mapping according to the IANA SMTP enhanced status code registry;
/// unmapped triples fall back to `class * 100`.
#[must_use]
pub const fn basic_code(e: EnhancedCode) -> u16 {
    match (e.class, e.subject, e.detail) {
        (2, 1, 0 | 5) | (2, 3 | 5, 0) | (2, 6, 4) => 250,
        (2, 6, 8) => 252,
        (2, 7, 0) => 220,

        (4, 1, 1 | 8) | (4, 4, 1 | 3 | 5) | (4, 5, 0 | 4) | (4, 7, 1 | 24) => 451,
        (4, 3, 0) | (4, 4, 2) => 421,
        (4, 3, 1) | (4, 5, 3) => 452,
        (4, 3, 2) => 453,
        (4, 5, 1) => 430,
        (4, 2, 4) | (4, 7, 0 | 15) => 450,
        (4, 7, 12) => 422,

        (5, 1, 1) | (5, 3, 0) | (5, 4, 3) | (5, 6, 8 | 9) | (5, 7, 0 | 2 | 15 | 20..=27) => 550,
        (5, 1, 3) | (5, 1, 8) | (5, 5, 0 | 4) => 501,
        (5, 1, 10) => 556,
        (5, 2, 2 | 3) | (5, 3, 4) | (5, 7, 16) => 552,
        (5, 5, 1 | 2 | 6) | (5, 7, 17 | 18 | 19) => 500,
        (5, 6, 3 | 6) | (5, 7, 8) => 554,
        (5, 6, 7) => 553,
        (5, 7, 1) => 551,
        (5, 7, 4) => 504,
        (5, 7, 9) => 534,
        (5, 7, 10) => 523,
        (5, 7, 11) => 524,
        (5, 7, 13) => 525,
        (5, 7, 14) => 535,

        _ => e.class * 100,
    }
}

/// 554, the command line exceeded the 1024 byte limit
pub static FAIL_LINE_TOO_LONG: Response =
    Response::canned(554, EnhancedCode::new(5, 5, 1), "Line too long.");

/// 503, a MAIL command was issued inside an open transaction
pub static FAIL_NESTED_MAIL_CMD: Response =
    Response::canned(503, EnhancedCode::new(5, 5, 1), "Error: nested MAIL command");

/// 553, the sender address did not parse
pub static REJECTED_SENDER_MAIL_CMD: Response = Response::canned(
    553,
    EnhancedCode::new(5, 5, 4),
    "Sender address rejected: Access denied",
);

/// 250, sender accepted
pub static SUCCESS_MAIL_CMD: Response = Response::canned(250, EnhancedCode::new(2, 1, 0), "OK");

/// 250, recipient accepted
pub static SUCCESS_RCPT_CMD: Response = Response::canned(250, EnhancedCode::new(2, 1, 5), "OK");

/// 250, transaction reset
pub static SUCCESS_RESET_CMD: Response = Response::canned(250, EnhancedCode::new(2, 1, 0), "OK");

/// 250, no-op acknowledged
pub static SUCCESS_NOOP_CMD: Response = Response::canned(250, EnhancedCode::new(2, 0, 0), "OK");

/// 252, deliberately non-committal VRFY reply
pub static SUCCESS_VERIFY_CMD: Response =
    Response::canned(252, EnhancedCode::new(2, 5, 0), "Cannot verify user");

/// 452, the per-transaction recipient cap was reached
pub static ERROR_TOO_MANY_RECIPIENTS: Response =
    Response::canned(452, EnhancedCode::new(4, 5, 3), "Too many recipients");

/// 221, closing transmission channel
pub static SUCCESS_QUIT_CMD: Response = Response::canned(221, EnhancedCode::new(2, 0, 0), "Bye");

/// 503, DATA issued without any accepted recipient
pub static FAIL_NO_RECIPIENTS_DATA_CMD: Response =
    Response::canned(503, EnhancedCode::new(5, 5, 1), "Error: No recipients");

/// 354, start mail input
pub static SUCCESS_DATA_CMD: Response =
    Response::basic_only(354, "Enter message, ending with '.' on a line by itself");

/// 220, ready to start the TLS handshake
pub static SUCCESS_STARTTLS_CMD: Response =
    Response::canned(220, EnhancedCode::new(2, 0, 0), "Ready to start TLS");

/// 500, the command was not recognized
pub static FAIL_UNRECOGNIZED_CMD: Response =
    Response::canned(500, EnhancedCode::new(5, 5, 1), "Unrecognized command");

/// 554, too many unrecognized commands, the session is terminated
pub static FAIL_MAX_UNRECOGNIZED_CMD: Response = Response::canned(
    554,
    EnhancedCode::new(5, 5, 1),
    "Too many unrecognized commands",
);

/// 421, the server is shutting down
pub static ERROR_SHUTDOWN: Response = Response::canned(
    421,
    EnhancedCode::new(4, 3, 0),
    "Server is shutting down. Please try again later.",
);

/// 550, malformed command arguments
pub static FAIL_SYNTAX_ERROR: Response =
    Response::canned(550, EnhancedCode::new(5, 5, 2), "Syntax error");

/// 552, the message exceeded the per-message size cap
pub static FAIL_MESSAGE_SIZE_EXCEEDED: Response =
    Response::canned(552, EnhancedCode::new(5, 3, 4), "Error:");

/// 451, reading the message body failed
pub static FAIL_READ_ERROR_DATA_CMD: Response =
    Response::canned(451, EnhancedCode::new(4, 3, 0), "Error:");

/// 550, the forward/reverse path exceeded 256 bytes
pub static FAIL_PATH_TOO_LONG: Response =
    Response::canned(550, EnhancedCode::new(5, 5, 4), "Path too long");

/// 501, the address did not parse
pub static FAIL_INVALID_ADDRESS: Response =
    Response::canned(501, EnhancedCode::new(5, 5, 4), "Invalid address");

/// 502, the command is recognized but not implemented
pub static FAIL_COMMAND_NOT_IMPLEMENTED: Response =
    Response::canned(502, EnhancedCode::new(5, 5, 1), "Command not implemented");

/// 550, local part over 64 characters
pub static FAIL_LOCAL_PART_TOO_LONG: Response = Response::canned(
    550,
    EnhancedCode::new(5, 5, 4),
    "Local part too long, cannot exceed 64 characters",
);

/// 550, domain over 255 characters
pub static FAIL_DOMAIN_TOO_LONG: Response = Response::canned(
    550,
    EnhancedCode::new(5, 5, 4),
    "Domain cannot exceed 255 characters",
);

/// 250, the terminal handler accepted the message
pub static SUCCESS_MESSAGE_ACCEPTED: Response =
    Response::canned(250, EnhancedCode::new(2, 0, 0), "Message accepted");
