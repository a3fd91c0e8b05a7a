//! vinmail, an embeddable SMTP/ESMTP receiving server.
//!
//! A [`Server`] accepts inbound mail transactions over plain TCP or TLS,
//! drives each connection through the SMTP command grammar, buffers the
//! message data up to a configured size, threads it through a chain of
//! [`middleware::Middleware`] stages and hands the resulting
//! [`envelope::Envelope`] to a terminal [`middleware::Handler`] which
//! decides the final SMTP reply.

#![doc(html_no_source)]
#![deny(missing_docs)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::doc_markdown)]

mod config;
mod receiver;
mod response;
mod server;

/// canned responses and enhanced status codes
pub mod codes;
/// the transactional unit: sender, recipients, raw message bytes and metadata
pub mod envelope;
/// middleware chain composed around the terminal handler
pub mod middleware;
/// rustls server configuration helpers
pub mod tls;

pub use config::Config;
pub use response::{EnhancedCode, Response};
pub use server::{Server, ServerState};

/// product name advertised in the connection greeting
pub const PRODUCT: &str = env!("CARGO_PKG_NAME");
/// product version advertised in the connection greeting
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) mod log_channels {
    pub const SERVER: &str = "vinmail::server";
    pub const RECEIVER: &str = "vinmail::receiver";
    pub const MIDDLEWARE: &str = "vinmail::middleware";
}
