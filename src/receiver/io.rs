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
use crate::envelope::Data;

/// command lines are bounded to this many bytes, terminator excluded
pub(crate) const MAX_LINE_LENGTH: usize = 1024;

/// Why a read failed. Limit exhaustion is distinct from end-of-stream
/// so the engine can answer 552 instead of silently dropping the
/// session.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ReadError {
    /// the peer closed the connection
    #[error("connection closed by peer")]
    Closed,
    /// the per-message byte budget is exhausted
    #[error("read limit reached")]
    LimitReached,
    /// the line exceeded [`MAX_LINE_LENGTH`]
    #[error("maximum line length exceeded")]
    LineTooLong,
    /// the per-operation deadline fired
    #[error("operation timed out")]
    Timeout,
    ///
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Buffered reader over the connection: CRLF command lines on top, a
/// dot-stuffed DATA reader with a mutable byte budget underneath.
///
/// The budget is reset at each transaction boundary; the buffer itself
/// is kept, it may hold pipelined bytes for the next command.
pub(crate) struct SmtpReader<R> {
    inner: tokio::io::BufReader<R>,
    limit: u64,
    remaining: u64,
}

impl<R> SmtpReader<R>
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    pub(crate) fn new(inner: R, limit: u64) -> Self {
        Self {
            inner: tokio::io::BufReader::new(inner),
            limit,
            remaining: limit,
        }
    }

    /// Restore the byte budget to its configured value.
    pub(crate) fn reset_limit(&mut self) {
        self.remaining = self.limit;
    }

    pub(crate) const fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Give the underlying stream back, discarding buffered bytes.
    /// A client that pipelines past STARTTLS is non-compliant.
    pub(crate) fn into_inner(self) -> R {
        self.inner.into_inner()
    }

    /// Read one CRLF-terminated command line, terminator excluded.
    /// Bare LF is tolerated.
    pub(crate) async fn read_line(&mut self) -> Result<String, ReadError> {
        let line = self.read_raw_line(MAX_LINE_LENGTH).await?;
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Read a dot-stuffed message body terminated by `\r\n.\r\n`
    /// straight into `data`, un-stuffing leading dots. Returns the
    /// number of payload bytes appended.
    ///
    /// The byte budget is enforced on payload bytes: exactly
    /// `remaining` bytes fit, one more fails with
    /// [`ReadError::LimitReached`].
    pub(crate) async fn read_dot_body(&mut self, data: &mut Data) -> Result<u64, ReadError> {
        let mut total: u64 = 0;
        let mut first = true;
        loop {
            let slack = usize::try_from(self.remaining)
                .unwrap_or(usize::MAX)
                .saturating_add(2);
            let line = match self.read_raw_line(slack).await {
                Ok(line) => line,
                Err(ReadError::LineTooLong) => return Err(ReadError::LimitReached),
                Err(e) => return Err(e),
            };
            if line == b"." {
                return Ok(total);
            }
            let payload: &[u8] = if line.first() == Some(&b'.') {
                &line[1..]
            } else {
                &line
            };

            let needed =
                u64::try_from(payload.len()).unwrap_or(u64::MAX) + if first { 0 } else { 2 };
            if needed > self.remaining {
                return Err(ReadError::LimitReached);
            }
            if !first {
                data.append(b"\r\n");
            }
            data.append(payload);
            self.remaining -= needed;
            total += needed;
            first = false;
        }
    }

    // One line without its terminator; `max` bounds the line content.
    async fn read_raw_line(&mut self, max: usize) -> Result<Vec<u8>, ReadError> {
        let mut line: Vec<u8> = Vec::new();
        loop {
            let (used, complete) = {
                let available = tokio::io::AsyncBufReadExt::fill_buf(&mut self.inner).await?;
                if available.is_empty() {
                    return Err(ReadError::Closed);
                }
                match available.iter().position(|b| *b == b'\n') {
                    Some(i) => {
                        line.extend_from_slice(&available[..i]);
                        (i + 1, true)
                    }
                    None => {
                        line.extend_from_slice(available);
                        (available.len(), false)
                    }
                }
            };
            tokio::io::AsyncBufReadExt::consume(&mut self.inner, used);

            if complete {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if line.len() > max {
                    return Err(ReadError::LineTooLong);
                }
                return Ok(line);
            }
            // bail out before an unterminated line grows unbounded;
            // one byte of slack for the CR of a split CRLF
            if line.len() > max + 1 {
                return Err(ReadError::LineTooLong);
            }
        }
    }
}
