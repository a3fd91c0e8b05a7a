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
use super::connection::Session;
use crate::{
    config::Config,
    middleware::{handler, Handler, Middleware},
    server::ServerContext,
};

/// A stream emulating a socket: reads from a prepared buffer, captures
/// everything written.
pub(crate) struct Mock {
    read: std::io::Cursor<Vec<u8>>,
    written: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

impl Mock {
    pub(crate) fn new(input: Vec<u8>) -> (Self, std::sync::Arc<std::sync::Mutex<Vec<u8>>>) {
        let written = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        (
            Self {
                read: std::io::Cursor::new(input),
                written: written.clone(),
            },
            written,
        )
    }
}

impl tokio::io::AsyncRead for Mock {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let position = usize::try_from(this.read.position()).expect("cursor fits usize");
        let data = this.read.get_ref();
        let available = &data[position.min(data.len())..];

        let n = available.len().min(buf.remaining());
        buf.put_slice(&available[..n]);
        this.read.set_position((position + n) as u64);
        std::task::Poll::Ready(Ok(()))
    }
}

impl tokio::io::AsyncWrite for Mock {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<Result<usize, std::io::Error>> {
        self.get_mut()
            .written
            .lock()
            .expect("mock write buffer lock poisoned")
            .extend_from_slice(buf);
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        std::task::Poll::Ready(Ok(()))
    }
}

pub(crate) fn get_test_config() -> Config {
    Config {
        hostname: "testserver.com".to_string(),
        addr: "127.0.0.1:0".to_string(),
        ..Config::default()
    }
}

/// Drives the protocol engine over a [`Mock`] stream and compares the
/// transcript. The greeting line carries a timestamp, so it is checked
/// by prefix and the expected transcript starts after it.
pub(crate) struct TestReceiver {
    pub config: Config,
    pub middlewares: Vec<Middleware>,
    pub handler: Handler,
    pub shutting_down: bool,
}

impl Default for TestReceiver {
    fn default() -> Self {
        Self {
            config: get_test_config(),
            middlewares: Vec::new(),
            handler: handler(|_| None),
            shutting_down: false,
        }
    }
}

impl TestReceiver {
    /// Run the exchange and hand back the full output plus the final
    /// session, for assertions on its counters.
    pub(crate) async fn exchange(self, input: impl AsRef<str>) -> (String, Session<Mock>) {
        let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(self.shutting_down);
        let ctx = ServerContext {
            config: self.config,
            tls_config: None,
            middlewares: std::sync::Arc::new(std::sync::RwLock::new(self.middlewares)),
            handler: self.handler,
            shutdown: shutdown_rx,
        };
        run_exchange(input.as_ref(), &ctx).await
    }

    /// Run the exchange and assert the transcript after the greeting.
    pub(crate) async fn run(self, input: impl AsRef<str>, expected: impl AsRef<str>) {
        let (output, _session) = self.exchange(input.as_ref()).await;
        assert_transcript(&output, expected.as_ref());
    }
}

/// Drive one full exchange against an explicit [`ServerContext`].
pub(crate) async fn run_exchange(input: &str, ctx: &ServerContext) -> (String, Session<Mock>) {
    let (mock, written) = Mock::new(input.as_bytes().to_vec());
    let session = Session::new(
        mock,
        1,
        "127.0.0.1:49152".parse().expect("valid address"),
        ctx.config.max_size,
        ctx.config.timeout_duration(),
    );

    let (_outcome, session) = super::run(session, ctx).await;

    let output = String::from_utf8(written.lock().expect("mock buffer lock poisoned").clone())
        .expect("server output is utf8");
    (output, session)
}

/// Check the greeting by prefix, the rest of the transcript verbatim.
pub(crate) fn assert_transcript(output: &str, expected: &str) {
    let (greeting, rest) = output
        .split_once("\r\n")
        .expect("server sent at least a greeting");
    assert!(
        greeting.starts_with(&format!("220 testserver.com SMTP {}(", crate::PRODUCT)),
        "unexpected greeting: '{greeting}'"
    );
    pretty_assertions::assert_eq!(expected, rest);
}

/// Transcript assertion for the protocol engine: `input` is what the
/// client sends, `output` what the server must answer after its
/// greeting line.
#[macro_export]
macro_rules! test_receiver {
    ($input:expr, $output:expr) => {
        $crate::receiver::test_helpers::TestReceiver::default()
            .run($input, $output)
            .await
    };
    (with_config => $config:expr, $input:expr, $output:expr) => {
        $crate::receiver::test_helpers::TestReceiver {
            config: $config,
            ..Default::default()
        }
        .run($input, $output)
        .await
    };
    (on_mail => $handler:expr, $input:expr, $output:expr) => {
        $crate::receiver::test_helpers::TestReceiver {
            handler: $handler,
            ..Default::default()
        }
        .run($input, $output)
        .await
    };
    (with_config => $config:expr, on_mail => $handler:expr, $input:expr, $output:expr) => {
        $crate::receiver::test_helpers::TestReceiver {
            config: $config,
            handler: $handler,
            ..Default::default()
        }
        .run($input, $output)
        .await
    };
}
