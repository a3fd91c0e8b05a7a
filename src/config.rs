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

/// Server configuration. Every field has a default, so
/// `Config::default()` yields a working receiver on `:2525`.
///
/// Runtime values (TLS configuration, middlewares, terminal handler)
/// live on the [`crate::Server`] itself, not here.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// host name used in the greeting and EHLO replies, and to fill the
    /// domain of a bare `postmaster` recipient. When TLS is enabled it
    /// should match the certificate. Defaults to the OS host name.
    pub hostname: String,
    /// listening interface, `<ip>:<port>`; a bare `:<port>` binds every
    /// interface
    pub addr: String,
    /// maximum accepted message size in bytes
    pub max_size: u64,
    /// per-operation socket deadline in seconds
    pub timeout: u64,
    /// informational cap on concurrently handled clients
    pub max_clients: i64,
    /// maximum recipients accepted per transaction
    pub max_recipients: usize,
    /// unrecognized commands tolerated before the session is terminated
    pub max_unrecognized_commands: i64,
    /// accept connections as TLS from the first byte (SMTPS)
    pub tls_always_on: bool,
    /// honor the Postfix XCLIENT command
    pub xclient_on: bool,
    /// honor the HAProxy v1 PROXY command
    pub proxy_on: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: Self::default_hostname(),
            addr: Self::default_addr(),
            max_size: Self::default_max_size(),
            timeout: Self::default_timeout(),
            max_clients: Self::default_max_clients(),
            max_recipients: Self::default_max_recipients(),
            max_unrecognized_commands: Self::default_max_unrecognized_commands(),
            tls_always_on: false,
            xclient_on: false,
            proxy_on: false,
        }
    }
}

impl Config {
    pub(crate) fn default_hostname() -> String {
        hostname::get()
            .ok()
            .and_then(|host| host.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub(crate) fn default_addr() -> String {
        ":2525".to_string()
    }

    pub(crate) const fn default_max_size() -> u64 {
        10_485_760 // 10 Mebibytes
    }

    pub(crate) const fn default_timeout() -> u64 {
        30
    }

    pub(crate) const fn default_max_clients() -> i64 {
        100
    }

    pub(crate) const fn default_max_recipients() -> usize {
        100
    }

    pub(crate) const fn default_max_unrecognized_commands() -> i64 {
        5
    }

    /// the address to bind, `:<port>` expanded to every interface
    #[must_use]
    pub fn listen_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
    }

    pub(crate) fn timeout_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout)
    }
}
