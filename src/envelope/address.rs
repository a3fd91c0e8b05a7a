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

/// RFC 5321 limit on a forward/reverse path
pub const LIMIT_PATH: usize = 256;
/// RFC 5321 limit on a local part
pub const LIMIT_LOCAL_PART: usize = 64;
/// RFC 5321 limit on a domain
pub const LIMIT_DOMAIN: usize = 255;

/// Why a path failed to parse. Each variant maps to its own canned
/// reply in the protocol engine.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    /// the whole path exceeds [`LIMIT_PATH`]
    #[error("path exceeds {LIMIT_PATH} characters")]
    PathTooLong,
    /// the local part exceeds [`LIMIT_LOCAL_PART`]
    #[error("local part exceeds {LIMIT_LOCAL_PART} characters")]
    LocalPartTooLong,
    /// the domain exceeds [`LIMIT_DOMAIN`]
    #[error("domain exceeds {LIMIT_DOMAIN} characters")]
    DomainTooLong,
    /// the path does not follow the RFC 5321 mailbox grammar
    #[error("invalid address: '{0}'")]
    Syntax(String),
}

/// A parsed sender or recipient path.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Address {
    local_part: String,
    domain: String,
    ip: Option<std::net::IpAddr>,
    quoted: bool,
    null_path: bool,
}

impl Address {
    /// Parse an RFC 5321 path: an optionally angle-bracketed mailbox
    /// with support for quoted local parts, IP literals `@[x.x.x.x]` /
    /// `@[IPv6:...]`, the null path `<>` and the bare `postmaster`
    /// special case.
    ///
    /// # Errors
    ///
    /// [`AddressError`] describing the offending component.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let raw = input.trim();
        if raw.len() > LIMIT_PATH {
            return Err(AddressError::PathTooLong);
        }

        let inner = if raw.starts_with('<') && raw.ends_with('>') {
            &raw[1..raw.len() - 1]
        } else {
            raw
        };

        if inner.is_empty() {
            return Ok(Self::null());
        }
        if inner.eq_ignore_ascii_case("postmaster") {
            return Ok(Self::postmaster());
        }

        let (local_part, quoted, rest) = parse_local_part(inner)
            .ok_or_else(|| AddressError::Syntax(raw.to_string()))?;
        if local_part.len() > LIMIT_LOCAL_PART {
            return Err(AddressError::LocalPartTooLong);
        }

        let domain = rest
            .strip_prefix('@')
            .ok_or_else(|| AddressError::Syntax(raw.to_string()))?;
        if domain.len() > LIMIT_DOMAIN {
            return Err(AddressError::DomainTooLong);
        }

        let ip = if domain.starts_with('[') && domain.ends_with(']') {
            Some(
                parse_ip_literal(&domain[1..domain.len() - 1])
                    .ok_or_else(|| AddressError::Syntax(raw.to_string()))?,
            )
        } else {
            if !is_valid_domain(domain) {
                return Err(AddressError::Syntax(raw.to_string()));
            }
            None
        };

        Ok(Self {
            local_part,
            domain: domain.to_string(),
            ip,
            quoted,
            null_path: false,
        })
    }

    /// the `<>` bounce path
    #[must_use]
    pub fn null() -> Self {
        Self {
            local_part: String::new(),
            domain: String::new(),
            ip: None,
            quoted: false,
            null_path: true,
        }
    }

    /// the bare `postmaster` mailbox, domain filled in later by the
    /// server with its own hostname
    #[must_use]
    pub fn postmaster() -> Self {
        Self {
            local_part: "postmaster".to_string(),
            domain: String::new(),
            ip: None,
            quoted: false,
            null_path: false,
        }
    }

    /// the part before the `@`
    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    /// the part after the `@`, brackets included for IP literals
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub(crate) fn set_domain(&mut self, domain: &str) {
        self.domain = domain.to_string();
    }

    /// the parsed host when the domain is an IP literal
    #[must_use]
    pub const fn ip(&self) -> Option<std::net::IpAddr> {
        self.ip
    }

    /// true when the local part was quoted, i.e. `"john doe"@x`
    #[must_use]
    pub const fn is_quoted(&self) -> bool {
        self.quoted
    }

    /// true for the `<>` bounce path
    #[must_use]
    pub const fn is_null_path(&self) -> bool {
        self.null_path
    }

    /// the full `local@domain` rendering, without angle brackets
    #[must_use]
    pub fn full(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.null_path {
            return write!(f, "<>");
        }
        if self.quoted {
            write!(f, "\"{}\"", self.local_part)?;
        } else {
            write!(f, "{}", self.local_part)?;
        }
        if self.domain.is_empty() {
            Ok(())
        } else {
            write!(f, "@{}", self.domain)
        }
    }
}

impl std::str::FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Returns (local part, was quoted, remainder starting at '@').
fn parse_local_part(input: &str) -> Option<(String, bool, &str)> {
    if let Some(rest) = input.strip_prefix('"') {
        let mut out = String::new();
        let mut chars = rest.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    let (_, escaped) = chars.next()?;
                    out.push(escaped);
                }
                '"' => return Some((out, true, &rest[i + 1..])),
                _ => out.push(c),
            }
        }
        None
    } else {
        let at = input.find('@')?;
        let local = &input[..at];
        if local.is_empty() || !local.split('.').all(is_atom) {
            return None;
        }
        Some((local.to_string(), false, &input[at..]))
    }
}

// dot-string atoms per RFC 5321 "atext"
fn is_atom(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || "!#$%&'*+-/=?^_`{|}~".contains(c)
                // SMTPUTF8 allows non-ascii directly in the local part
                || !c.is_ascii()
        })
}

fn parse_ip_literal(inner: &str) -> Option<std::net::IpAddr> {
    if let Some(v6) = inner
        .strip_prefix("IPv6:")
        .or_else(|| inner.strip_prefix("ipv6:"))
    {
        return v6
            .parse::<std::net::Ipv6Addr>()
            .ok()
            .map(std::net::IpAddr::V6);
    }
    inner
        .parse::<std::net::Ipv4Addr>()
        .ok()
        .map(std::net::IpAddr::V4)
}

fn is_valid_domain(domain: &str) -> bool {
    !domain.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || !c.is_ascii())
        })
}
