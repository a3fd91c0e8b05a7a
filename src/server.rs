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
use crate::{
    config::Config,
    log_channels,
    middleware::{Handler, Middleware},
    receiver,
};

/// Read-only view of the server handed to every session task.
pub(crate) struct ServerContext {
    pub config: Config,
    pub tls_config: Option<std::sync::Arc<rustls::ServerConfig>>,
    pub middlewares: std::sync::Arc<std::sync::RwLock<Vec<Middleware>>>,
    pub handler: Handler,
    pub shutdown: tokio::sync::watch::Receiver<bool>,
}

impl ServerContext {
    pub(crate) fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub(crate) fn middlewares(&self) -> Vec<Middleware> {
        self.middlewares
            .read()
            .expect("middleware list lock poisoned")
            .clone()
    }
}

/// Lifecycle of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// created, not yet listening
    New,
    /// stopped accepting, draining or drained
    Stopped,
    /// accepting connections
    Running,
    /// could not bind its listener
    StartError,
}

const STATE_NEW: u8 = 0;
const STATE_STOPPED: u8 = 1;
const STATE_RUNNING: u8 = 2;
const STATE_START_ERROR: u8 = 3;

/// An SMTP receiving server: listener, per-connection fan-out and
/// graceful shutdown with in-flight connection drain.
///
/// Multiple instances may coexist in one process.
pub struct Server {
    config: Config,
    tls_config: Option<std::sync::Arc<rustls::ServerConfig>>,
    middlewares: std::sync::Arc<std::sync::RwLock<Vec<Middleware>>>,
    handler: Handler,

    state: std::sync::atomic::AtomicU8,
    count_connections: std::sync::Arc<std::sync::atomic::AtomicI64>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
    closed_tx: tokio::sync::watch::Sender<bool>,
    closed_rx: tokio::sync::watch::Receiver<bool>,
}

impl Server {
    /// A server delivering accepted envelopes to `handler`.
    #[must_use]
    pub fn new(config: Config, handler: Handler) -> Self {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let (closed_tx, closed_rx) = tokio::sync::watch::channel(false);
        Self {
            config,
            tls_config: None,
            middlewares: std::sync::Arc::new(std::sync::RwLock::new(Vec::new())),
            handler,
            state: std::sync::atomic::AtomicU8::new(STATE_NEW),
            count_connections: std::sync::Arc::new(std::sync::atomic::AtomicI64::new(0)),
            shutdown_tx,
            shutdown_rx,
            closed_tx,
            closed_rx,
        }
    }

    /// Enable STARTTLS (and SMTPS when `tls_always_on` is set) with the
    /// given rustls configuration.
    #[must_use]
    pub fn with_tls_config(mut self, tls_config: std::sync::Arc<rustls::ServerConfig>) -> Self {
        self.tls_config = Some(tls_config);
        self
    }

    /// Append middlewares to the chain. May also be called between
    /// transactions while the server runs; the change applies from the
    /// next DATA on.
    pub fn use_middleware(&self, middlewares: impl IntoIterator<Item = Middleware>) -> &Self {
        self.middlewares
            .write()
            .expect("middleware list lock poisoned")
            .extend(middlewares);
        self
    }

    ///
    #[must_use]
    pub fn state(&self) -> ServerState {
        match self.state.load(std::sync::atomic::Ordering::SeqCst) {
            STATE_STOPPED => ServerState::Stopped,
            STATE_RUNNING => ServerState::Running,
            STATE_START_ERROR => ServerState::StartError,
            _ => ServerState::New,
        }
    }

    fn set_state(&self, state: ServerState) {
        let raw = match state {
            ServerState::New => STATE_NEW,
            ServerState::Stopped => STATE_STOPPED,
            ServerState::Running => STATE_RUNNING,
            ServerState::StartError => STATE_START_ERROR,
        };
        self.state.store(raw, std::sync::atomic::Ordering::SeqCst);
    }

    /// Number of connections currently being handled.
    #[must_use]
    pub fn active_connections(&self) -> i64 {
        self.count_connections
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Bind the configured address and accept SMTP clients until
    /// [`Server::shutdown`] is called. One detached task per accepted
    /// connection; on exit the accepted connections are drained and the
    /// closed signal is broadcast.
    ///
    /// # Errors
    ///
    /// * the listener cannot be bound
    pub async fn listen_and_serve(&self) -> anyhow::Result<()> {
        let listen_addr = self.config.listen_addr();
        let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.set_state(ServerState::StartError);
                anyhow::bail!("cannot listen on {listen_addr}: {e}")
            }
        };

        log::info!(target: log_channels::SERVER, "Listening on {}", listen_addr);
        self.set_state(ServerState::Running);

        let ctx = std::sync::Arc::new(ServerContext {
            config: self.config.clone(),
            tls_config: self.tls_config.clone(),
            middlewares: self.middlewares.clone(),
            handler: self.handler.clone(),
            shutdown: self.shutdown_rx.clone(),
        });

        // each session task holds a clone of this sender; the receiver
        // returns None once the last one is dropped
        let (wait_tx, mut wait_rx) = tokio::sync::mpsc::channel::<()>(1);
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut connection_id: u64 = 0;

        loop {
            let (stream, client_addr) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        log::warn!(target: log_channels::SERVER, "accept: {}", e);
                        continue;
                    }
                },
                _ = shutdown_rx.changed() => break,
            };
            connection_id += 1;

            log::debug!(
                target: log_channels::SERVER,
                "Accepted new connection #{} from {}",
                connection_id,
                client_addr
            );

            self.count_connections
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

            let ctx = ctx.clone();
            let count_connections = self.count_connections.clone();
            let wait_guard = wait_tx.clone();
            tokio::spawn(async move {
                let _wait_guard = wait_guard;
                if let Err(e) =
                    receiver::handle_stream(stream, client_addr, connection_id, &ctx).await
                {
                    log::warn!(target: log_channels::SERVER, "{}", e);
                }
                count_connections.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            });
        }

        log::info!(
            target: log_channels::SERVER,
            "Server has stopped accepting new clients, {} connection(s) left",
            self.active_connections()
        );
        drop(listener);
        self.set_state(ServerState::Stopped);

        // wait for all connections to finish
        drop(wait_tx);
        let _ = wait_rx.recv().await;

        let _ = self.closed_tx.send(true);
        Ok(())
    }

    /// Stop accepting new clients and wait up to `grace` for in-flight
    /// sessions to drain. An exceeded deadline returns an error but
    /// leaves the sessions running; they observe the shutdown signal
    /// between commands and answer 421 on their next turn.
    ///
    /// # Errors
    ///
    /// * the grace period elapsed before the drain completed
    pub async fn shutdown(&self, grace: std::time::Duration) -> anyhow::Result<()> {
        let _ = self.shutdown_tx.send(true);

        match self.state() {
            ServerState::New | ServerState::StartError => return Ok(()),
            ServerState::Running | ServerState::Stopped => {}
        }

        let mut closed = self.closed_rx.clone();
        let drained = tokio::time::timeout(grace, async move {
            while !*closed.borrow_and_update() {
                if closed.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;

        match drained {
            Ok(()) => Ok(()),
            Err(_elapsed) => anyhow::bail!("shutdown deadline exceeded, sessions left running"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::handler;

    fn test_server(addr: &str) -> Server {
        let config = Config {
            hostname: "testserver.com".to_string(),
            addr: addr.to_string(),
            ..Config::default()
        };
        Server::new(config, handler(|_| None))
    }

    #[test]
    fn fresh_server_is_new() {
        let server = test_server("127.0.0.1:0");
        assert_eq!(server.state(), ServerState::New);
        assert_eq!(server.active_connections(), 0);
    }

    #[tokio::test]
    async fn bind_error_is_reported() {
        let server = test_server("not-an-address");
        assert!(server.listen_and_serve().await.is_err());
        assert_eq!(server.state(), ServerState::StartError);
    }

    #[tokio::test]
    async fn shutdown_before_start_is_a_noop() {
        let server = test_server("127.0.0.1:0");
        assert!(server
            .shutdown(std::time::Duration::from_millis(10))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn listen_then_shutdown() {
        let server = std::sync::Arc::new(test_server("127.0.0.1:0"));

        let background = server.clone();
        let serving = tokio::spawn(async move { background.listen_and_serve().await });

        while server.state() != ServerState::Running {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        server
            .shutdown(std::time::Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(server.active_connections(), 0);
        assert!(serving.await.unwrap().is_ok());
    }
}
