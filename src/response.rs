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
use crate::codes;

/// An enhanced status code per RFC 3463, the `class.subject.detail`
/// triple augmenting a basic 3-digit reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnhancedCode {
    /// status class, one of 2 (success), 4 (transient), 5 (permanent)
    pub class: u16,
    /// subject sub-code
    pub subject: u16,
    /// detail sub-code
    pub detail: u16,
}

impl EnhancedCode {
    ///
    #[must_use]
    pub const fn new(class: u16, subject: u16, detail: u16) -> Self {
        Self {
            class,
            subject,
            detail,
        }
    }

    /// the basic 3-digit code this triple projects to, `class * 100`
    /// when the triple is not in the static map
    #[must_use]
    pub const fn basic(self) -> u16 {
        codes::basic_code(self)
    }
}

impl std::fmt::Display for EnhancedCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// A reply sent to the client after a command or after DATA completes.
///
/// Immutable triple of a basic 3-digit code, an optional enhanced status
/// code and a human comment. Renders on the wire as
/// `NNN E.S.D comment` or `NNN comment` when no enhanced code is carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    basic: u16,
    enhanced: Option<EnhancedCode>,
    comment: std::borrow::Cow<'static, str>,
}

impl Response {
    /// Build a response from a basic code and a comment, without an
    /// enhanced status code.
    #[must_use]
    pub fn new(basic: u16, comment: impl Into<String>) -> Self {
        Self {
            basic,
            enhanced: None,
            comment: std::borrow::Cow::Owned(comment.into()),
        }
    }

    /// Build a response carrying an enhanced status code.
    #[must_use]
    pub fn with_enhanced(basic: u16, enhanced: EnhancedCode, comment: impl Into<String>) -> Self {
        Self {
            basic,
            enhanced: Some(enhanced),
            comment: std::borrow::Cow::Owned(comment.into()),
        }
    }

    /// Build a response from an enhanced status code alone, deriving the
    /// basic code from the static map.
    #[must_use]
    pub fn from_enhanced(enhanced: EnhancedCode, comment: impl Into<String>) -> Self {
        Self {
            basic: enhanced.basic(),
            enhanced: Some(enhanced),
            comment: std::borrow::Cow::Owned(comment.into()),
        }
    }

    pub(crate) const fn canned(basic: u16, enhanced: EnhancedCode, comment: &'static str) -> Self {
        Self {
            basic,
            enhanced: Some(enhanced),
            comment: std::borrow::Cow::Borrowed(comment),
        }
    }

    pub(crate) const fn basic_only(basic: u16, comment: &'static str) -> Self {
        Self {
            basic,
            enhanced: None,
            comment: std::borrow::Cow::Borrowed(comment),
        }
    }

    /// the basic 3-digit code, i.e. `250`
    #[must_use]
    pub const fn code(&self) -> u16 {
        self.basic
    }

    /// the enhanced status code, when one is carried
    #[must_use]
    pub const fn enhanced(&self) -> Option<EnhancedCode> {
        self.enhanced
    }

    /// the human comment
    #[must_use]
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// reply class, the first digit of the basic code
    #[must_use]
    pub const fn class(&self) -> u16 {
        self.basic / 100
    }

    /// positive completion reply
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.class() == codes::CLASS_SUCCESS
    }

    /// transient negative completion reply
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.class() == codes::CLASS_TRANSIENT_FAILURE
    }

    /// permanent negative completion reply
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        self.class() == codes::CLASS_PERMANENT_FAILURE
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.enhanced {
            Some(enhanced) if self.comment.is_empty() => {
                write!(f, "{} {}", self.basic, enhanced)
            }
            Some(enhanced) => write!(f, "{} {} {}", self.basic, enhanced, self.comment),
            None if self.comment.is_empty() => write!(f, "{}", self.basic),
            None => write!(f, "{} {}", self.basic, self.comment),
        }
    }
}
