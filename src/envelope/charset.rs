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

//! Charset label lookup and the header/body text decoders built on it.
//!
//! Labels are lower-cased and run through an alias table before the
//! WHATWG lookup, so the usual suspects from legacy mailers
//! (`latin1`, `cp1252`, `ms932`, `tis-620`, ...) resolve to the
//! encoding they mean. Unknown labels leave the bytes untouched.

/// Non-standard labels seen in the wild, normalized to a label
/// [`encoding_rs`] knows.
const ALIASES: &[(&str, &str)] = &[
    ("ascii", "iso-8859-1"),
    ("us-ascii", "iso-8859-1"),
    ("latin1", "iso-8859-1"),
    ("latin2", "iso-8859-2"),
    ("latin3", "iso-8859-3"),
    ("latin4", "iso-8859-4"),
    ("latin5", "iso-8859-9"),
    ("latin6", "iso-8859-10"),
    ("latin7", "iso-8859-13"),
    ("latin8", "iso-8859-14"),
    ("latin9", "iso-8859-15"),
    ("latin10", "iso-8859-16"),
    ("cp1250", "windows-1250"),
    ("cp1251", "windows-1251"),
    ("cp1252", "windows-1252"),
    ("cp1253", "windows-1253"),
    ("cp1254", "windows-1254"),
    ("cp1255", "windows-1255"),
    ("cp1256", "windows-1256"),
    ("cp1257", "windows-1257"),
    ("cp1258", "windows-1258"),
    ("cp874", "windows-874"),
    ("ms874", "windows-874"),
    ("tis-620", "windows-874"),
    ("ms-ansi", "windows-1252"),
    ("ms_kanji", "shift_jis"),
    ("csshiftjis", "shift_jis"),
    ("x-sjis", "shift_jis"),
    ("ms932", "shift_jis"),
    ("sjis", "shift_jis"),
    ("shift-jis", "shift_jis"),
    ("eucjp", "euc-jp"),
    ("iso2022jp", "iso-2022-jp"),
    ("euckr", "euc-kr"),
    ("5601", "euc-kr"),
    ("ks_c_5601", "euc-kr"),
    ("ansi936", "gb2312"),
    ("cp936", "gbk"),
    ("ms936", "gbk"),
    ("ansi950", "big5"),
    ("cp950", "big5"),
    ("big-5", "big5"),
    ("koi8r", "koi8-r"),
    ("koi8u", "koi8-u"),
];

/// Resolve a charset label (case-insensitive, aliases normalized) to
/// its decoder. `None` for labels outside the table.
#[must_use]
pub fn decoder_for(label: &str) -> Option<&'static encoding_rs::Encoding> {
    let label = label.trim().to_ascii_lowercase();
    let label = ALIASES
        .iter()
        .find(|(alias, _)| *alias == label)
        .map_or(label.as_str(), |(_, canonical)| canonical);
    encoding_rs::Encoding::for_label(label.as_bytes())
}

/// Decode `bytes` from the labelled charset to UTF-8. Bytes pass
/// through unchanged when the label is unknown.
#[must_use]
pub fn to_utf8(label: &str, bytes: &[u8]) -> Vec<u8> {
    match decoder_for(label) {
        Some(encoding) if encoding != encoding_rs::UTF_8 => {
            let (decoded, _, _) = encoding.decode(bytes);
            decoded.into_owned().into_bytes()
        }
        _ => bytes.to_vec(),
    }
}

/// Decode the quoted-printable transfer encoding.
///
/// `q_encoding` additionally maps `_` to a space, per the RFC 2047 `Q`
/// variant used in encoded words.
#[must_use]
pub(crate) fn decode_quoted_printable(input: &[u8], q_encoding: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'=' => {
                // soft line break
                if input.get(i + 1) == Some(&b'\r') && input.get(i + 2) == Some(&b'\n') {
                    i += 3;
                    continue;
                }
                if input.get(i + 1) == Some(&b'\n') {
                    i += 2;
                    continue;
                }
                match (
                    input.get(i + 1).and_then(|c| (*c as char).to_digit(16)),
                    input.get(i + 2).and_then(|c| (*c as char).to_digit(16)),
                ) {
                    (Some(hi), Some(lo)) => {
                        out.push(u8::try_from(hi * 16 + lo).expect("two hex digits fit a byte"));
                        i += 3;
                    }
                    // malformed escape, keep it literally
                    _ => {
                        out.push(b'=');
                        i += 1;
                    }
                }
            }
            b'_' if q_encoding => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    out
}

/// Decode the RFC 2047 encoded words of a header value to UTF-8.
///
/// Anything that does not parse as `=?charset?B|Q?data?=` stays
/// literal. Linear whitespace between two adjacent encoded words is
/// dropped, per the RFC.
#[must_use]
pub(crate) fn decode_rfc2047(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    let mut last_was_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        match parse_encoded_word(candidate) {
            Some((decoded, consumed)) => {
                // whitespace separating two encoded words is not emitted
                let separating_ws = last_was_word
                    && !before.is_empty()
                    && before.chars().all(char::is_whitespace);
                if !separating_ws {
                    out.push_str(before);
                }
                out.push_str(&decoded);
                rest = &candidate[consumed..];
                last_was_word = true;
            }
            None => {
                out.push_str(before);
                out.push_str("=?");
                rest = &candidate[2..];
                last_was_word = false;
            }
        }
    }
    out.push_str(rest);
    out
}

// Parse one "=?charset?enc?data?=" prefix; returns the decoded text and
// the byte length consumed from the input.
fn parse_encoded_word(input: &str) -> Option<(String, usize)> {
    let body = input.strip_prefix("=?")?;
    let charset_end = body.find('?')?;
    let charset = &body[..charset_end];

    let enc_body = &body[charset_end + 1..];
    let mut enc_chars = enc_body.chars();
    let enc = enc_chars.next()?;
    if !enc.is_ascii_alphabetic() || enc_chars.next() != Some('?') {
        return None;
    }

    let data_body = &enc_body[2..];
    let data_end = data_body.find("?=")?;
    let data = &data_body[..data_end];

    let raw = match enc.to_ascii_uppercase() {
        'B' => base64::Engine::decode(&base64::engine::general_purpose::STANDARD, data).ok()?,
        'Q' => decode_quoted_printable(data.as_bytes(), true),
        _ => return None,
    };

    let decoded = String::from_utf8_lossy(&to_utf8(charset, &raw)).into_owned();
    // "=?" + charset + "?" + enc + "?" + data + "?="
    let consumed = 2 + charset_end + 2 + 1 + data_end + 2;
    Some((decoded, consumed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn label_lookup() {
        assert_eq!(decoder_for("UTF-8"), Some(encoding_rs::UTF_8));
        assert_eq!(decoder_for("latin1"), Some(encoding_rs::WINDOWS_1252));
        assert_eq!(decoder_for("iso-8859-15"), Some(encoding_rs::ISO_8859_15));
        assert_eq!(decoder_for("ms932"), Some(encoding_rs::SHIFT_JIS));
        assert_eq!(decoder_for("tis-620"), Some(encoding_rs::WINDOWS_874));
        assert_eq!(decoder_for("koi8r"), Some(encoding_rs::KOI8_R));
        assert_eq!(decoder_for("gb18030"), Some(encoding_rs::GB18030));
        assert_eq!(decoder_for("no-such-charset"), None);
    }

    #[test]
    fn unknown_charset_passes_through() {
        assert_eq!(to_utf8("no-such-charset", b"\xff\xfe"), b"\xff\xfe");
    }

    #[test]
    fn latin1_to_utf8() {
        assert_eq!(to_utf8("iso-8859-1", b"caf\xe9"), "café".as_bytes());
    }

    #[test]
    fn quoted_printable() {
        assert_eq!(
            decode_quoted_printable(b"caf=C3=A9 au=\r\n lait", false),
            "café au lait".as_bytes()
        );
        assert_eq!(decode_quoted_printable(b"a_b", false), b"a_b");
        assert_eq!(decode_quoted_printable(b"a_b", true), b"a b");
        // malformed escapes stay literal
        assert_eq!(decode_quoted_printable(b"=G1=", false), b"=G1=");
    }

    #[test]
    fn rfc2047_q_word() {
        assert_eq!(
            decode_rfc2047("=?iso-8859-1?Q?Lastname=2C_=F6?= <o@company.example>"),
            "Lastname, ö <o@company.example>"
        );
    }

    #[test]
    fn rfc2047_b_word() {
        assert_eq!(decode_rfc2047("=?utf-8?B?aGVsbG8gd29ybGQ=?="), "hello world");
    }

    #[test]
    fn rfc2047_adjacent_words_drop_whitespace() {
        assert_eq!(
            decode_rfc2047("=?utf-8?Q?one?= =?utf-8?Q?two?="),
            "onetwo"
        );
    }

    #[test]
    fn rfc2047_literal_fallbacks() {
        assert_eq!(decode_rfc2047("plain subject"), "plain subject");
        assert_eq!(decode_rfc2047("=?broken"), "=?broken");
        assert_eq!(decode_rfc2047("a =? b"), "a =? b");
        // unknown encodings stay literal
        assert_eq!(decode_rfc2047("=?utf-8?X?abc?="), "=?utf-8?X?abc?=");
    }
}
