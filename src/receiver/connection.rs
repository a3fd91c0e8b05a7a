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
use super::io::{ReadError, SmtpReader};
use crate::{envelope::Envelope, log_channels, response::Response};

/// Which part of the SMTP dialogue a session is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// connected, awaiting our 220 greeting
    Greeting,
    /// greeting sent, awaiting a command
    Command,
    /// 354 sent, reading the message body
    Data,
    /// 220 sent after STARTTLS, awaiting the handshake
    StartTls,
    /// server is shutting down, 421 on the next turn
    Shutdown,
}

/// One TCP connection and everything the protocol engine needs to drive
/// it: the current state, the envelope under construction, the error
/// counters and the kill flag.
///
/// The session task owns the stream outright; nothing else reads from
/// or writes to it.
pub(crate) struct Session<S> {
    /// unique monotonic connection id
    pub id: u64,
    /// peer address, possibly overridden by XCLIENT/PROXY
    pub remote_addr: std::net::SocketAddr,
    pub state: SessionState,
    /// envelope of the transaction under construction
    pub envelope: Envelope,
    /// protocol errors made by the client so far
    pub errors: i64,
    /// messages accepted with a class-2 terminal response
    pub messages_sent: i64,
    /// true once the connection is under TLS
    pub secured: bool,
    killed_at: Option<std::time::Instant>,

    pub(crate) reader: SmtpReader<tokio::io::ReadHalf<S>>,
    pub(crate) timeout: std::time::Duration,
    writer: tokio::io::WriteHalf<S>,
    write_error: Option<std::io::Error>,
}

impl<S> Session<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(
        stream: S,
        id: u64,
        remote_addr: std::net::SocketAddr,
        max_size: u64,
        timeout: std::time::Duration,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            id,
            remote_addr,
            state: SessionState::Greeting,
            envelope: Envelope::new(remote_addr, id),
            errors: 0,
            messages_sent: 0,
            secured: false,
            killed_at: None,
            reader: SmtpReader::new(read_half, max_size),
            timeout,
            writer: write_half,
            write_error: None,
        }
    }

    /// Read one command line, deadline applied.
    pub(crate) async fn read_command(&mut self) -> Result<String, ReadError> {
        match tokio::time::timeout(self.timeout, self.reader.read_line()).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ReadError::Timeout),
        }
    }

    /// Write a response line. A failed write is captured and observed
    /// by the engine on its next turn.
    pub(crate) async fn send_reply(&mut self, reply: &Response) {
        self.send_line(&reply.to_string()).await;
    }

    /// Write a raw line (CRLF appended). Used for the greeting and the
    /// multi-line EHLO/HELP replies, which carry their inner
    /// terminators already.
    pub(crate) async fn send_line(&mut self, line: &str) {
        log::debug!(target: log_channels::RECEIVER, "[#{}] Server: {}", self.id, line);

        let mut out = String::with_capacity(line.len() + 2);
        out.push_str(line);
        out.push_str("\r\n");

        if let Err(e) =
            tokio::io::AsyncWriteExt::write_all(&mut self.writer, out.as_bytes()).await
        {
            log::error!(
                target: log_channels::RECEIVER,
                "[#{}] could not write to client: {}",
                self.id,
                e
            );
            self.write_error = Some(e);
        }
    }

    pub(crate) const fn write_error(&self) -> Option<&std::io::Error> {
        self.write_error.as_ref()
    }

    /// End the current mail transaction: fresh envelope under the same
    /// connection identity, fresh byte budget. The buffered reader is
    /// kept, it may hold pipelined bytes.
    pub(crate) fn reset_transaction(&mut self) {
        let mut envelope = Envelope::new(self.remote_addr, self.id);
        envelope.helo = self.envelope.helo.clone();
        envelope.esmtp = self.envelope.esmtp;
        envelope.tls = self.secured;
        self.envelope = envelope;
        self.reader.reset_limit();
    }

    /// A transaction is open once MAIL FROM has been accepted.
    pub(crate) const fn is_in_transaction(&self) -> bool {
        self.envelope.mail_from.is_some()
    }

    /// Flag the session to close on the next turn.
    pub(crate) fn kill(&mut self) {
        self.killed_at = Some(std::time::Instant::now());
    }

    pub(crate) const fn is_alive(&self) -> bool {
        self.killed_at.is_none()
    }

    /// Give the stream back for the TLS upgrade, dropping buffered
    /// bytes (anything pipelined past STARTTLS is non-compliant).
    pub(crate) fn into_stream(self) -> S {
        self.reader.into_inner().unsplit(self.writer)
    }
}
