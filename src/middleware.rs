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

//! Middleware composition around the terminal handler.
//!
//! A handler maps an envelope to a response; a middleware wraps a
//! handler into a new one. Registration order `m1, m2, m3` produces the
//! execution order `m1 → m2 → m3 → terminal → m3' → m2' → m1'`. A
//! middleware may answer before calling `next`, short-circuiting the
//! rest of the chain.

use crate::{
    codes,
    envelope::Envelope,
    log_channels,
    response::Response,
};

/// Terminal stage invoked once DATA completes: decides the final SMTP
/// reply for the envelope. `None` is mapped to the canned
/// `250 Message accepted`.
pub type Handler = std::sync::Arc<dyn Fn(&mut Envelope) -> Option<Response> + Send + Sync>;

/// A transformation/authorization stage wrapped around a [`Handler`].
pub type Middleware = std::sync::Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Wrap a closure into a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&mut Envelope) -> Option<Response> + Send + Sync + 'static,
{
    std::sync::Arc::new(f)
}

/// Wrap a closure into a [`Middleware`].
pub fn middleware<F>(f: F) -> Middleware
where
    F: Fn(Handler) -> Handler + Send + Sync + 'static,
{
    std::sync::Arc::new(f)
}

/// Fold the registered list in reverse around the terminal handler, so
/// the first registered middleware is the outermost.
pub(crate) fn compose(middlewares: &[Middleware], terminal: Handler) -> Handler {
    let mut chain = terminal;
    for stage in middlewares.iter().rev() {
        chain = stage(chain);
    }
    chain
}

/// Catch a panicking handler: the recovered payload lands in the
/// envelope's error slot and the client gets a 500.
#[must_use]
pub fn recover() -> Middleware {
    middleware(|next: Handler| {
        handler(move |envelope: &mut Envelope| {
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| next(envelope))) {
                Ok(response) => response,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "opaque panic payload".to_string());
                    log::error!(
                        target: log_channels::MIDDLEWARE,
                        "handler panicked: {}",
                        reason
                    );
                    envelope.set_error(anyhow::anyhow!("recovered: {reason}"));
                    Some(Response::new(500, "Internal server error"))
                }
            }
        })
    })
}

/// Prepend a `Received:` trace header describing this hop.
#[must_use]
pub fn received_header(hostname: impl Into<String>) -> Middleware {
    let hostname = hostname.into();
    middleware(move |next: Handler| {
        let hostname = hostname.clone();
        handler(move |envelope: &mut Envelope| {
            let mut protocol = String::from("SMTP");
            if envelope.esmtp {
                protocol.insert(0, 'E');
            }
            if envelope.tls {
                protocol.push('S');
            }

            let id = format!(
                "{}-{}@{}",
                envelope.connection_id(),
                envelope.envelope_id(),
                hostname
            );

            let mut received = format!(
                "from {} ({} [{}])\r\n",
                envelope.helo, envelope.helo, envelope.remote_addr
            );
            received.push_str(&format!("  by {hostname} with {protocol} id {id}\r\n"));
            if let [only] = envelope.rcpt_to.as_slice() {
                received.push_str(&format!("  for <{only}>\r\n"));
            }
            received.push_str(&format!("  {}", chrono::Utc::now().to_rfc2822()));

            envelope.prepend_header("Received", &received);
            next(envelope)
        })
    })
}

/// Prepend the `Return-Path:` header from the envelope sender.
#[must_use]
pub fn return_path() -> Middleware {
    middleware(|next: Handler| {
        handler(move |envelope: &mut Envelope| {
            let path = envelope
                .mail_from
                .as_ref()
                .map_or_else(|| "<>".to_string(), |sender| format!("<{sender}>"));
            envelope.prepend_header("Return-Path", &path);
            next(envelope)
        })
    })
}

/// Prepend `Delivered-To:` when the envelope has exactly one recipient.
#[must_use]
pub fn delivered_to() -> Middleware {
    middleware(|next: Handler| {
        handler(move |envelope: &mut Envelope| {
            if let [only] = envelope.rcpt_to.as_slice() {
                let recipient = only.to_string();
                envelope.prepend_header("Delivered-To", &recipient);
            }
            next(envelope)
        })
    })
}

/// Reject the message with a 550 unless the sender domain is in the
/// whitelist. An empty whitelist allows every domain.
#[must_use]
pub fn sender_domains_whitelist<I, D>(domains: I) -> Middleware
where
    I: IntoIterator<Item = D>,
    D: Into<String>,
{
    let whitelist = to_lowercase_set(domains);
    middleware(move |next: Handler| {
        let whitelist = whitelist.clone();
        handler(move |envelope: &mut Envelope| {
            if whitelist.is_empty() {
                return next(envelope);
            }
            let allowed = envelope.mail_from.as_ref().map_or(false, |sender| {
                whitelist.contains(&sender.domain().to_ascii_lowercase())
            });
            if allowed {
                next(envelope)
            } else {
                Some(Response::new(550, "Sender domain not allowed"))
            }
        })
    })
}

/// Reject the message with a 550 unless at least one recipient domain
/// is in the whitelist. The recipient list itself is not filtered; an
/// empty whitelist allows every domain.
#[must_use]
pub fn recipient_domains_whitelist<I, D>(domains: I) -> Middleware
where
    I: IntoIterator<Item = D>,
    D: Into<String>,
{
    let whitelist = to_lowercase_set(domains);
    middleware(move |next: Handler| {
        let whitelist = whitelist.clone();
        handler(move |envelope: &mut Envelope| {
            if whitelist.is_empty() {
                return next(envelope);
            }
            let allowed = envelope
                .rcpt_to
                .iter()
                .any(|rcpt| whitelist.contains(&rcpt.domain().to_ascii_lowercase()));
            if allowed {
                next(envelope)
            } else {
                Some(Response::new(550, "Recipient domain not allowed"))
            }
        })
    })
}

/// Log one line per processed envelope: ids, sender, recipient count,
/// size and the response that went out.
#[must_use]
pub fn log_envelope() -> Middleware {
    middleware(|next: Handler| {
        handler(move |envelope: &mut Envelope| {
            let response = next(envelope);
            log::info!(
                target: log_channels::MIDDLEWARE,
                "{{ connection: {}, envelope: {}, from: {:?}, rcpt: {}, size: {} }} => {}",
                envelope.connection_id(),
                envelope.envelope_id(),
                envelope.mail_from.as_ref().map(ToString::to_string),
                envelope.rcpt_to.len(),
                envelope.data.len(),
                response
                    .as_ref()
                    .unwrap_or(&codes::SUCCESS_MESSAGE_ACCEPTED)
            );
            response
        })
    })
}

fn to_lowercase_set<I, D>(domains: I) -> std::collections::HashSet<String>
where
    I: IntoIterator<Item = D>,
    D: Into<String>,
{
    domains
        .into_iter()
        .map(|domain| domain.into().to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Address;
    use pretty_assertions::assert_eq;

    fn test_envelope() -> Envelope {
        let mut envelope = Envelope::new("203.0.113.5:49152".parse().unwrap(), 3);
        envelope.helo = "client.example".to_string();
        envelope.esmtp = true;
        envelope.mail_from = Some(Address::parse("<a@x.example>").unwrap());
        envelope.rcpt_to = vec![Address::parse("<b@y.example>").unwrap()];
        envelope.data.append_str("Subject: hi\r\n\r\nbody");
        envelope
    }

    fn trace(label: &str, log: &std::sync::Arc<std::sync::Mutex<Vec<String>>>) -> Middleware {
        let label = label.to_string();
        let log = log.clone();
        middleware(move |next: Handler| {
            let label = label.clone();
            let log = log.clone();
            handler(move |envelope: &mut Envelope| {
                log.lock().unwrap().push(format!("pre-{label}"));
                let response = next(envelope);
                log.lock().unwrap().push(format!("post-{label}"));
                response
            })
        })
    }

    #[test]
    fn fifo_outbound_lifo_inbound() {
        let log = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let chain = compose(
            &[trace("m1", &log), trace("m2", &log), trace("m3", &log)],
            {
                let log = log.clone();
                handler(move |_: &mut Envelope| {
                    log.lock().unwrap().push("terminal".to_string());
                    None
                })
            },
        );

        assert_eq!(chain(&mut test_envelope()), None);
        assert_eq!(
            *log.lock().unwrap(),
            ["pre-m1", "pre-m2", "pre-m3", "terminal", "post-m3", "post-m2", "post-m1"]
        );
    }

    #[test]
    fn short_circuit_skips_inner_stages() {
        let log = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let deny = middleware(|_next: Handler| {
            handler(move |_: &mut Envelope| Some(Response::new(550, "blocked")))
        });

        let chain = compose(
            &[trace("log", &log), deny, trace("tag", &log)],
            handler(|_: &mut Envelope| {
                panic!("terminal handler must not run");
            }),
        );

        let response = chain(&mut test_envelope()).unwrap();
        assert_eq!(response.code(), 550);
        // the outer stage still unwinds, the inner one never ran
        assert_eq!(*log.lock().unwrap(), ["pre-log", "post-log"]);
    }

    #[test]
    fn recover_catches_handler_panics() {
        let chain = compose(
            &[recover()],
            handler(|_: &mut Envelope| panic!("boom")),
        );

        let mut envelope = test_envelope();
        let response = chain(&mut envelope).unwrap();
        assert_eq!(response.code(), 500);
        assert!(envelope.error().unwrap().to_string().contains("boom"));
    }

    #[test]
    fn received_header_is_prepended() {
        let chain = compose(
            &[received_header("mx.example")],
            handler(|_: &mut Envelope| None),
        );

        let mut envelope = test_envelope();
        chain(&mut envelope);

        let mail = envelope.mail().unwrap();
        let headers = mail.headers();
        let (name, value) = headers.iter().next().unwrap();
        assert_eq!(name, "Received");
        assert!(value.contains("from client.example"));
        assert!(value.contains("by mx.example with ESMTP id"));
        assert!(value.contains("for <b@y.example>"));
    }

    #[test]
    fn return_path_uses_the_sender() {
        let chain = compose(&[return_path()], handler(|_: &mut Envelope| None));
        let mut envelope = test_envelope();
        chain(&mut envelope);

        let mail = envelope.mail().unwrap();
        assert_eq!(mail.headers().get("Return-Path"), Some("<a@x.example>"));
    }

    #[test]
    fn delivered_to_needs_a_single_recipient() {
        let chain = compose(&[delivered_to()], handler(|_: &mut Envelope| None));

        let mut envelope = test_envelope();
        chain(&mut envelope);
        assert_eq!(
            envelope.mail().unwrap().headers().get("Delivered-To"),
            Some("b@y.example")
        );

        let mut two = test_envelope();
        two.rcpt_to.push(Address::parse("<c@z.example>").unwrap());
        chain(&mut two);
        assert_eq!(two.mail().unwrap().headers().get("Delivered-To"), None);
    }

    #[test]
    fn domain_whitelists() {
        let allow = compose(
            &[sender_domains_whitelist(["x.example"])],
            handler(|_: &mut Envelope| None),
        );
        assert_eq!(allow(&mut test_envelope()), None);

        let deny = compose(
            &[sender_domains_whitelist(["other.example"])],
            handler(|_: &mut Envelope| None),
        );
        assert_eq!(deny(&mut test_envelope()).unwrap().code(), 550);

        let rcpt_allow = compose(
            &[recipient_domains_whitelist(["Y.EXAMPLE"])],
            handler(|_: &mut Envelope| None),
        );
        assert_eq!(rcpt_allow(&mut test_envelope()), None);
    }

    #[test]
    fn empty_whitelists_allow_every_domain() {
        let none: [&str; 0] = [];

        let sender = compose(
            &[sender_domains_whitelist(none)],
            handler(|_: &mut Envelope| None),
        );
        assert_eq!(sender(&mut test_envelope()), None);

        let rcpt = compose(
            &[recipient_domains_whitelist(none)],
            handler(|_: &mut Envelope| None),
        );
        assert_eq!(rcpt(&mut test_envelope()), None);
    }
}
