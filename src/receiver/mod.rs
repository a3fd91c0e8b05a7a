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
use self::command::Verb;
use self::connection::{Session, SessionState};
use self::io::ReadError;
use crate::{
    codes,
    envelope::{Address, AddressError},
    log_channels,
    middleware,
    response::Response,
    server::ServerContext,
};

mod command;
mod connection;
mod io;

#[cfg(test)]
pub(crate) mod test_helpers;
#[cfg(test)]
mod tests;

/// How a protocol run over one stream ended.
enum SessionOutcome {
    /// the dialogue is over, close the socket
    Closed,
    /// 220 was sent after STARTTLS, the caller must run the handshake
    UpgradeTls,
}

/// Drive one accepted connection through its entire SMTP exchange,
/// including the TLS upgrade when the client asks for one.
pub(crate) async fn handle_stream<S>(
    stream: S,
    remote_addr: std::net::SocketAddr,
    id: u64,
    ctx: &ServerContext,
) -> anyhow::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    let timeout = ctx.config.timeout_duration();

    if ctx.config.tls_always_on {
        if let Some(tls_config) = &ctx.tls_config {
            let acceptor = tokio_rustls::TlsAcceptor::from(tls_config.clone());
            let tls_stream =
                match tokio::time::timeout(timeout, acceptor.accept(stream)).await {
                    Ok(Ok(tls_stream)) => tls_stream,
                    Ok(Err(e)) => {
                        // server requires TLS but cannot handshake,
                        // killed before any greeting
                        log::warn!(
                            target: log_channels::RECEIVER,
                            "[#{id}] Failed TLS handshake: {e}"
                        );
                        return Ok(());
                    }
                    Err(_elapsed) => {
                        log::warn!(target: log_channels::RECEIVER, "[#{id}] TLS handshake timed out");
                        return Ok(());
                    }
                };

            let mut session =
                Session::new(tls_stream, id, remote_addr, ctx.config.max_size, timeout);
            session.secured = true;
            session.envelope.tls = true;
            run(session, ctx).await;
            return Ok(());
        }
    }

    let session = Session::new(stream, id, remote_addr, ctx.config.max_size, timeout);
    let (outcome, session) = run(session, ctx).await;

    if let SessionOutcome::UpgradeTls = outcome {
        // the engine only asks for an upgrade when a TLS config exists
        let Some(tls_config) = ctx.tls_config.clone() else {
            return Ok(());
        };
        let acceptor = tokio_rustls::TlsAcceptor::from(tls_config);

        let errors = session.errors;
        let messages_sent = session.messages_sent;
        let helo = session.envelope.helo.clone();
        let esmtp = session.envelope.esmtp;
        let remote_addr = session.remote_addr;

        let plain = session.into_stream();
        match tokio::time::timeout(timeout, acceptor.accept(plain)).await {
            Ok(Ok(tls_stream)) => {
                let mut secured =
                    Session::new(tls_stream, id, remote_addr, ctx.config.max_size, timeout);
                secured.secured = true;
                secured.errors = errors;
                secured.messages_sent = messages_sent;
                secured.envelope.helo = helo;
                secured.envelope.esmtp = esmtp;
                secured.reset_transaction();
                secured.state = SessionState::Command;
                run(secured, ctx).await;
            }
            Ok(Err(e)) => {
                log::warn!(
                    target: log_channels::RECEIVER,
                    "[#{id}] Failed TLS handshake: {e}"
                );
            }
            Err(_elapsed) => {
                log::warn!(target: log_channels::RECEIVER, "[#{id}] TLS handshake timed out");
            }
        }
    }
    Ok(())
}

/// The per-connection state machine: greeting, command dispatch, DATA
/// ingestion and the shutdown turn. Returns the session so the caller
/// can reclaim the stream for a TLS upgrade.
#[allow(clippy::too_many_lines)]
async fn run<S>(mut session: Session<S>, ctx: &ServerContext) -> (SessionOutcome, Session<S>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    let hostname = ctx.config.hostname.clone();
    let greeting = format!(
        "220 {} SMTP {}({}) #{}  {}",
        hostname,
        crate::PRODUCT,
        crate::VERSION,
        session.id,
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    );

    while session.is_alive() {
        if let Some(e) = session.write_error() {
            log::debug!(
                target: log_channels::RECEIVER,
                "[#{}] connection could not buffer a response: {}",
                session.id,
                e
            );
            break;
        }

        match session.state {
            SessionState::Greeting => {
                session.send_line(&greeting).await;
                session.state = SessionState::Command;
            }

            SessionState::Command => {
                let cmd = match session.read_command().await {
                    Ok(cmd) => cmd,
                    Err(ReadError::Closed) => {
                        log::warn!(
                            target: log_channels::RECEIVER,
                            "[#{}] Client closed the connection",
                            session.id
                        );
                        break;
                    }
                    Err(ReadError::Timeout) => {
                        log::warn!(target: log_channels::RECEIVER, "[#{}] Timeout", session.id);
                        break;
                    }
                    Err(ReadError::LineTooLong | ReadError::LimitReached) => {
                        session.send_reply(&codes::FAIL_LINE_TOO_LONG).await;
                        session.kill();
                        break;
                    }
                    Err(ReadError::Io(e)) => {
                        log::warn!(
                            target: log_channels::RECEIVER,
                            "[#{}] Could not read command: {}",
                            session.id,
                            e
                        );
                        session.kill();
                        break;
                    }
                };
                log::debug!(target: log_channels::RECEIVER, "[#{}] Client: {}", session.id, cmd);

                if ctx.is_shutting_down() {
                    session.state = SessionState::Shutdown;
                    continue;
                }

                match Verb::parse(&cmd) {
                    Some(Verb::Helo) => {
                        session.reset_transaction();
                        session.envelope.helo = Verb::Helo.content(&cmd).to_string();
                        session.send_line(&format!("250 {hostname} Hello")).await;
                    }

                    Some(Verb::Ehlo) => {
                        session.reset_transaction();
                        session.envelope.helo = Verb::Ehlo.content(&cmd).to_string();
                        session.envelope.esmtp = true;

                        let starttls = ctx.tls_config.is_some() && !session.secured;
                        session
                            .send_line(&ehlo_reply(&hostname, ctx.config.max_size, starttls))
                            .await;
                    }

                    Some(Verb::Help) => {
                        let verbs = Verb::ALL
                            .iter()
                            .map(|verb| verb.name())
                            .collect::<Vec<_>>()
                            .join(" ");
                        session
                            .send_line(&format!(
                                "214-Supported commands:\r\n214-{verbs}\r\n214 End of HELP info"
                            ))
                            .await;
                    }

                    Some(Verb::XClient) if ctx.config.xclient_on => {
                        for token in Verb::XClient.content(&cmd).split_whitespace() {
                            let Some((key, value)) = token.split_once('=') else {
                                continue;
                            };
                            if value == "[UNAVAILABLE]" {
                                continue;
                            }
                            if key.eq_ignore_ascii_case("ADDR") {
                                if let Ok(ip) = value.parse::<std::net::IpAddr>() {
                                    session.remote_addr = std::net::SocketAddr::new(ip, 0);
                                    session.envelope.remote_addr = session.remote_addr;
                                }
                            }
                            if key.eq_ignore_ascii_case("HELO") {
                                session.envelope.helo = value.to_string();
                            }
                        }
                        session.send_reply(&codes::SUCCESS_MAIL_CMD).await;
                    }

                    Some(Verb::Proxy) if ctx.config.proxy_on => {
                        let content = Verb::Proxy.content(&cmd);
                        let tokens = content.split_whitespace().collect::<Vec<_>>();
                        log::debug!(
                            target: log_channels::RECEIVER,
                            "[#{}] PROXY: {}",
                            session.id,
                            content
                        );

                        // 5 fields for "PROXY TCP4 src dst sport dport",
                        // 6 when the client hostname is interposed
                        let client_ip = match tokens.len() {
                            5 => Some(tokens[1]),
                            6 => Some(tokens[2]),
                            _ => None,
                        };
                        match client_ip {
                            Some(raw) => {
                                if let Ok(ip) = raw.parse::<std::net::IpAddr>() {
                                    session.remote_addr = std::net::SocketAddr::new(ip, 0);
                                    session.envelope.remote_addr = session.remote_addr;
                                }
                                session.send_line(&greeting).await;
                            }
                            None => {
                                log::debug!(
                                    target: log_channels::RECEIVER,
                                    "[#{}] PROXY, parse error, expected 5 or 6 parts: {}",
                                    session.id,
                                    content
                                );
                                session.send_reply(&codes::FAIL_SYNTAX_ERROR).await;
                            }
                        }
                    }

                    Some(Verb::MailFrom) => {
                        if session.is_in_transaction() {
                            session.send_reply(&codes::FAIL_NESTED_MAIL_CMD).await;
                            session.errors += 1;
                            continue;
                        }
                        let content = Verb::MailFrom.content(&cmd);
                        let (raw_addr, params) = match content.split_once(' ') {
                            Some((raw_addr, params)) => (raw_addr, params),
                            None => (content, ""),
                        };
                        if params
                            .split_whitespace()
                            .any(|param| param.eq_ignore_ascii_case("SMTPUTF8"))
                        {
                            session.envelope.utf8 = true;
                        }

                        match Address::parse(raw_addr) {
                            Ok(sender) => {
                                session.envelope.mail_from = Some(sender);
                                session.send_reply(&codes::SUCCESS_MAIL_CMD).await;
                            }
                            Err(e) => {
                                log::debug!(
                                    target: log_channels::RECEIVER,
                                    "[#{}] MAIL, parse error: [{}]: {}",
                                    session.id,
                                    content,
                                    e
                                );
                                session
                                    .send_reply(address_error_reply(
                                        &e,
                                        &codes::REJECTED_SENDER_MAIL_CMD,
                                    ))
                                    .await;
                                session.errors += 1;
                            }
                        }
                    }

                    Some(Verb::RcptTo) => {
                        if session.envelope.rcpt_to.len() >= ctx.config.max_recipients {
                            session.send_reply(&codes::ERROR_TOO_MANY_RECIPIENTS).await;
                            session.errors += 1;
                            continue;
                        }
                        match Address::parse(Verb::RcptTo.content(&cmd)) {
                            Ok(mut recipient) => {
                                // <postmaster> is addressed to this host
                                if recipient.domain().is_empty()
                                    && recipient.local_part().eq_ignore_ascii_case("postmaster")
                                {
                                    recipient.set_domain(&hostname);
                                }
                                session.envelope.rcpt_to.push(recipient);
                                session.send_reply(&codes::SUCCESS_RCPT_CMD).await;
                            }
                            Err(e) => {
                                log::debug!(
                                    target: log_channels::RECEIVER,
                                    "[#{}] RCPT, parse error: {}",
                                    session.id,
                                    e
                                );
                                session
                                    .send_reply(address_error_reply(&e, &codes::FAIL_SYNTAX_ERROR))
                                    .await;
                                session.errors += 1;
                            }
                        }
                    }

                    Some(Verb::Rset) => {
                        session.reset_transaction();
                        session.send_reply(&codes::SUCCESS_RESET_CMD).await;
                    }

                    Some(Verb::Vrfy) => {
                        session.send_reply(&codes::SUCCESS_VERIFY_CMD).await;
                    }

                    Some(Verb::Noop) => {
                        session.send_reply(&codes::SUCCESS_NOOP_CMD).await;
                    }

                    Some(Verb::Quit) => {
                        session.send_reply(&codes::SUCCESS_QUIT_CMD).await;
                        session.kill();
                    }

                    Some(Verb::Data) => {
                        if session.envelope.rcpt_to.is_empty() {
                            session.send_reply(&codes::FAIL_NO_RECIPIENTS_DATA_CMD).await;
                            continue;
                        }
                        session.send_reply(&codes::SUCCESS_DATA_CMD).await;
                        session.state = SessionState::Data;
                    }

                    Some(Verb::StartTls) => {
                        if ctx.tls_config.is_none() {
                            session.send_reply(&codes::FAIL_COMMAND_NOT_IMPLEMENTED).await;
                            continue;
                        }
                        session.send_reply(&codes::SUCCESS_STARTTLS_CMD).await;
                        session.state = SessionState::StartTls;
                    }

                    // XCLIENT/PROXY with their flag off fall through here
                    _ => {
                        session.errors += 1;
                        if session.errors >= ctx.config.max_unrecognized_commands {
                            session.send_reply(&codes::FAIL_MAX_UNRECOGNIZED_CMD).await;
                            session.kill();
                        } else {
                            session.send_reply(&codes::FAIL_UNRECOGNIZED_CMD).await;
                        }
                    }
                }
            }

            SessionState::Data => {
                let read = match tokio::time::timeout(
                    session.timeout,
                    session.reader.read_dot_body(&mut session.envelope.data),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_elapsed) => Err(ReadError::Timeout),
                };

                match read {
                    Err(e @ (ReadError::LimitReached | ReadError::LineTooLong)) => {
                        log::debug!(
                            target: log_channels::RECEIVER,
                            "[#{}] DATA, too much data sent",
                            session.id
                        );
                        session
                            .send_line(&format!("{} {}", codes::FAIL_MESSAGE_SIZE_EXCEEDED, e))
                            .await;
                        session.kill();
                    }
                    Err(e) => {
                        log::warn!(
                            target: log_channels::RECEIVER,
                            "[#{}] DATA, error reading data: {}",
                            session.id,
                            e
                        );
                        session
                            .send_line(&format!("{} {}", codes::FAIL_READ_ERROR_DATA_CMD, e))
                            .await;
                        session.kill();
                    }
                    Ok(_) => {
                        // composed per DATA, middleware list mutations
                        // between messages take effect on the next one
                        let chain =
                            middleware::compose(&ctx.middlewares(), ctx.handler.clone());
                        let response = chain(&mut session.envelope)
                            .unwrap_or_else(|| codes::SUCCESS_MESSAGE_ACCEPTED.clone());

                        if response.is_success() {
                            session.messages_sent += 1;
                        } else {
                            log::debug!(
                                target: log_channels::RECEIVER,
                                "[#{}] DATA, processing failed: {}",
                                session.id,
                                response
                            );
                            session.errors += 1;
                        }
                        session.send_reply(&response).await;

                        session.state = if ctx.is_shutting_down() {
                            SessionState::Shutdown
                        } else {
                            SessionState::Command
                        };
                        session.reset_transaction();
                    }
                }
            }

            SessionState::StartTls => {
                if session.secured {
                    log::warn!(
                        target: log_channels::RECEIVER,
                        "[#{}] TLS, tls is already active",
                        session.id
                    );
                    session.state = SessionState::Command;
                } else if ctx.tls_config.is_none() {
                    log::warn!(
                        target: log_channels::RECEIVER,
                        "[#{}] TLS, no tls config",
                        session.id
                    );
                    session.state = SessionState::Command;
                } else {
                    return (SessionOutcome::UpgradeTls, session);
                }
            }

            SessionState::Shutdown => {
                session.send_reply(&codes::ERROR_SHUTDOWN).await;
                session.kill();
            }
        }
    }

    (SessionOutcome::Closed, session)
}

fn ehlo_reply(hostname: &str, max_size: u64, starttls: bool) -> String {
    let mut out = format!("250-{hostname} Hello\r\n");
    out.push_str(&format!("250-SIZE {max_size}\r\n"));
    out.push_str("250-PIPELINING\r\n");
    if starttls {
        out.push_str("250-STARTTLS\r\n");
    }
    out.push_str("250-ENHANCEDSTATUSCODES\r\n");
    out.push_str("250-SMTPUTF8\r\n");
    out.push_str("250 HELP");
    out
}

fn address_error_reply(
    error: &AddressError,
    syntax_reply: &'static Response,
) -> &'static Response {
    match error {
        AddressError::PathTooLong => &codes::FAIL_PATH_TOO_LONG,
        AddressError::LocalPartTooLong => &codes::FAIL_LOCAL_PART_TOO_LONG,
        AddressError::DomainTooLong => &codes::FAIL_DOMAIN_TOO_LONG,
        AddressError::Syntax(_) => syntax_reply,
    }
}
