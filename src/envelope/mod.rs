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

mod address;
mod charset;
mod data;
mod mail;

pub use address::{Address, AddressError, LIMIT_DOMAIN, LIMIT_LOCAL_PART, LIMIT_PATH};
pub use charset::{decoder_for, to_utf8};
pub use data::{Data, DataReader};
pub use mail::{Content, Headers, Mail};

/// One accepted mail transaction: who sent what to whom, plus the raw
/// message bytes and the surrounding connection metadata.
///
/// Created at connection greeting and on every transaction reset,
/// mutated only by the owning session, then handed to the middleware
/// chain and terminal handler once DATA completes.
#[derive(Debug)]
pub struct Envelope {
    /// remote network address of the client, possibly overridden by
    /// XCLIENT/PROXY
    pub remote_addr: std::net::SocketAddr,
    /// argument of the HELO/EHLO command
    pub helo: String,
    /// true when the message was received over TLS
    pub tls: bool,
    /// true when the session used EHLO
    pub esmtp: bool,
    /// true when the MAIL command negotiated SMTPUTF8
    pub utf8: bool,
    /// the sender, empty until MAIL FROM is accepted
    pub mail_from: Option<Address>,
    /// accepted recipients, in order
    pub rcpt_to: Vec<Address>,
    /// headers and body exactly as received
    pub data: Data,

    connection_id: u64,
    envelope_id: String,
    error: Option<anyhow::Error>,
}

impl Envelope {
    /// A fresh envelope for a transaction on the given connection.
    #[must_use]
    pub fn new(remote_addr: std::net::SocketAddr, connection_id: u64) -> Self {
        Self {
            remote_addr,
            helo: String::new(),
            tls: false,
            esmtp: false,
            utf8: false,
            mail_from: None,
            rcpt_to: Vec::new(),
            data: Data::new(),
            connection_id,
            envelope_id: new_envelope_id(),
            error: None,
        }
    }

    /// identifier of the connection this transaction arrived on
    #[must_use]
    pub const fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// unique identifier of this transaction
    #[must_use]
    pub fn envelope_id(&self) -> &str {
        &self.envelope_id
    }

    /// Attach a terminal error to the envelope, e.g. a recovered
    /// handler panic.
    pub fn set_error(&mut self, error: anyhow::Error) {
        self.error = Some(error);
    }

    /// the terminal error, when one was attached
    #[must_use]
    pub const fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_ref()
    }

    /// Take the terminal error out of the envelope.
    pub fn take_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }

    /// Prepend `Key: value\r\n` to the message, canonicalizing the key
    /// to title case per hyphen-separated segment.
    pub fn prepend_header(&mut self, key: &str, value: &str) {
        self.data
            .prepend_str(&format!("{}: {value}\r\n", canonical_header_key(key)));
    }

    /// Materialize a [`Mail`] view over the buffered message.
    ///
    /// # Errors
    ///
    /// * the message has no body boundary
    pub fn mail(&self) -> anyhow::Result<Mail> {
        Mail::parse(&self.data.bytes(), self.utf8)
    }
}

// envelope ids only need uniqueness, not unpredictability
fn new_envelope_id() -> String {
    let epoch = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or(std::time::Duration::ZERO);
    format!(
        "{:x}{}",
        epoch.as_micros(),
        std::iter::repeat_with(fastrand::alphanumeric)
            .take(12)
            .collect::<String>()
    )
}

fn canonical_header_key(key: &str) -> String {
    key.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
            })
        })
        .collect::<Vec<_>>()
        .join("-")
}
