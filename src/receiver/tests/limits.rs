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
use crate::receiver::test_helpers::{assert_transcript, get_test_config, TestReceiver};
use crate::middleware::handler;

#[tokio::test]
async fn oversize_body_is_rejected_without_the_handler() {
    let mut config = get_test_config();
    config.max_size = 1024;

    let (output, session) = TestReceiver {
        config,
        handler: handler(|_| panic!("the handler must not see an oversize message")),
        ..Default::default()
    }
    .exchange(
        &[
            "HELO foobar\r\n",
            "MAIL FROM:<a@x>\r\n",
            "RCPT TO:<b@y>\r\n",
            "DATA\r\n",
            &"x".repeat(2048),
            "\r\n.\r\n",
        ]
        .concat(),
    )
    .await;

    assert_transcript(
        &output,
        &[
            "250 testserver.com Hello\r\n",
            "250 2.1.0 OK\r\n",
            "250 2.1.5 OK\r\n",
            "354 Enter message, ending with '.' on a line by itself\r\n",
            "552 5.3.4 Error: read limit reached\r\n",
        ]
        .concat(),
    );
    assert!(!session.is_alive());
    assert_eq!(session.messages_sent, 0);
}

#[tokio::test]
async fn exactly_max_size_is_accepted() {
    let mut config = get_test_config();
    config.max_size = 1024;

    let (_, session) = TestReceiver {
        config,
        handler: handler(|envelope| {
            assert_eq!(envelope.data.len(), 1024);
            None
        }),
        ..Default::default()
    }
    .exchange(
        &[
            "HELO foobar\r\n",
            "MAIL FROM:<a@x>\r\n",
            "RCPT TO:<b@y>\r\n",
            "DATA\r\n",
            &"x".repeat(1024),
            "\r\n.\r\n",
            "QUIT\r\n",
        ]
        .concat(),
    )
    .await;
    assert_eq!(session.messages_sent, 1);
}

#[tokio::test]
async fn command_line_over_1024_bytes_kills() {
    let (output, session) = TestReceiver::default()
        .exchange(&format!("NOOP {}\r\n", "x".repeat(1024)))
        .await;

    assert_transcript(&output, "554 5.5.1 Line too long.\r\n");
    assert!(!session.is_alive());
}

#[tokio::test]
async fn command_line_of_exactly_1024_bytes_is_accepted() {
    // "NOOP " plus padding, 1024 bytes in total
    let (output, _session) = TestReceiver::default()
        .exchange(&format!("NOOP {}\r\n", "x".repeat(1019)))
        .await;

    assert_transcript(&output, "250 2.0.0 OK\r\n");
}

#[tokio::test]
async fn recipient_overflow_keeps_the_transaction_valid() {
    let mut config = get_test_config();
    config.max_recipients = 2;

    let (output, session) = TestReceiver {
        config,
        handler: handler(|envelope| {
            assert_eq!(envelope.rcpt_to.len(), 2);
            None
        }),
        ..Default::default()
    }
    .exchange(
        &[
            "HELO foobar\r\n",
            "MAIL FROM:<a@x>\r\n",
            "RCPT TO:<one@y>\r\n",
            "RCPT TO:<two@y>\r\n",
            "RCPT TO:<three@y>\r\n",
            "DATA\r\n",
            ".\r\n",
        ]
        .concat(),
    )
    .await;

    assert_transcript(
        &output,
        &[
            "250 testserver.com Hello\r\n",
            "250 2.1.0 OK\r\n",
            "250 2.1.5 OK\r\n",
            "250 2.1.5 OK\r\n",
            "452 4.5.3 Too many recipients\r\n",
            "354 Enter message, ending with '.' on a line by itself\r\n",
            "250 2.0.0 Message accepted\r\n",
        ]
        .concat(),
    );
    assert_eq!(session.messages_sent, 1);
}

#[tokio::test]
async fn budget_resets_between_messages() {
    let mut config = get_test_config();
    config.max_size = 16;

    let (_, session) = TestReceiver {
        config,
        ..Default::default()
    }
    .exchange(
        &[
            "HELO foobar\r\n",
            "MAIL FROM:<a@x>\r\n",
            "RCPT TO:<b@y>\r\n",
            "DATA\r\n",
            "0123456789abcdef\r\n",
            ".\r\n",
            // a second full-size message must fit after the reset
            "MAIL FROM:<a@x>\r\n",
            "RCPT TO:<b@y>\r\n",
            "DATA\r\n",
            "0123456789abcdef\r\n",
            ".\r\n",
        ]
        .concat(),
    )
    .await;
    assert_eq!(session.messages_sent, 2);
}

#[tokio::test]
async fn path_length_limits_are_enforced() {
    let long_local = "l".repeat(65);

    let (output, _session) = TestReceiver::default()
        .exchange(&format!("MAIL FROM:<{long_local}@x.example>\r\n"))
        .await;
    assert_transcript(
        &output,
        "550 5.5.4 Local part too long, cannot exceed 64 characters\r\n",
    );
}
