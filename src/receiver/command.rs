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

/// command verbs are bounded to this many bytes
pub(crate) const MAX_VERB_LENGTH: usize = 16;

/// The fixed SMTP command vocabulary. A verb matches a command line if,
/// after uppercasing, the line begins with the verb prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verb {
    Helo,
    Ehlo,
    Help,
    XClient,
    MailFrom,
    RcptTo,
    Rset,
    Vrfy,
    Noop,
    Quit,
    Data,
    StartTls,
    Proxy,
}

impl Verb {
    pub(crate) const ALL: [Self; 13] = [
        Self::Helo,
        Self::Ehlo,
        Self::Help,
        Self::XClient,
        Self::MailFrom,
        Self::RcptTo,
        Self::Rset,
        Self::Vrfy,
        Self::Noop,
        Self::Quit,
        Self::Data,
        Self::StartTls,
        Self::Proxy,
    ];

    pub(crate) const fn prefix(self) -> &'static str {
        match self {
            Self::Helo => "HELO",
            Self::Ehlo => "EHLO",
            Self::Help => "HELP",
            Self::XClient => "XCLIENT",
            Self::MailFrom => "MAIL FROM:",
            Self::RcptTo => "RCPT TO:",
            Self::Rset => "RSET",
            Self::Vrfy => "VRFY",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
            Self::Data => "DATA",
            Self::StartTls => "STARTTLS",
            Self::Proxy => "PROXY ",
        }
    }

    /// the bare verb, for the HELP listing
    pub(crate) fn name(self) -> &'static str {
        self.prefix()
            .split([' ', ':'])
            .next()
            .expect("verb prefixes are not empty")
    }

    /// mixed-case commands are accepted
    pub(crate) fn matches(self, line: &str) -> bool {
        let prefix = self.prefix().as_bytes();
        line.len() >= prefix.len() && line.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix)
    }

    /// the remainder of the line after the verb, surrounding whitespace
    /// trimmed
    pub(crate) fn content(self, line: &'_ str) -> &'_ str {
        line[self.prefix().len()..].trim()
    }

    /// First verb matching the line, in vocabulary order.
    pub(crate) fn parse(line: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|verb| verb.matches(line))
    }
}
