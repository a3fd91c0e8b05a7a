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
use super::charset;

/// Ordered multimap of message headers.
///
/// Ordering is preserved because it matters (`Received` chains, repeated
/// headers); lookup is case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Parse a raw header block, unfolding continuation lines.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        let mut entries: Vec<(String, String)> = Vec::new();

        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                // folded continuation of the previous header
                if let Some((_, value)) = entries.last_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }
            match line.split_once(':') {
                Some((name, value)) => {
                    entries.push((name.trim().to_string(), value.trim().to_string()));
                }
                // not a header line, tolerated and dropped
                None => continue,
            }
        }
        Self { entries }
    }

    /// First value of the named header, case-insensitive.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of the named header, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All `(name, value)` pairs in message order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    ///
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    ///
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn push(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), value.to_string()));
    }

    fn map_values(mut self, f: impl Fn(&str) -> String) -> Self {
        for (_, value) in &mut self.entries {
            *value = f(value);
        }
        self
    }
}

/// View over a buffered message, split at the first blank line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    /// the raw header block, separator excluded
    pub raw_headers: Vec<u8>,
    /// the raw body, separator excluded
    pub raw_body: Vec<u8>,
    /// true when SMTPUTF8 was negotiated for the transaction
    pub utf8: bool,
}

impl Mail {
    /// Split a full message (headers + body) at the first `\r\n\r\n`,
    /// falling back to `\n\n`.
    ///
    /// # Errors
    ///
    /// * the message has no body boundary
    pub fn parse(data: &[u8], utf8: bool) -> anyhow::Result<Self> {
        let (raw_headers, raw_body) = split_once_bytes(data, b"\r\n\r\n")
            .or_else(|| split_once_bytes(data, b"\n\n"))
            .ok_or_else(|| anyhow::anyhow!("no body boundary"))?;

        Ok(Self {
            raw_headers: raw_headers.to_vec(),
            raw_body: raw_body.to_vec(),
            utf8,
        })
    }

    /// Headers with their values decoded to UTF-8.
    ///
    /// When SMTPUTF8 was negotiated and the header block carries no
    /// encoded-word marker there is nothing to decode and the values are
    /// returned verbatim; otherwise each value goes through the RFC 2047
    /// word decoder.
    #[must_use]
    pub fn headers(&self) -> Headers {
        let headers = Headers::parse(&self.raw_headers);
        if self.utf8 && !contains_bytes(&self.raw_headers, b"=?") {
            return headers;
        }
        headers.map_values(charset::decode_rfc2047)
    }

    /// Headers with undecoded values, e.g. for RFC 5322 address parsing
    /// where the decoded form may not be parseable.
    #[must_use]
    pub fn headers_literal(&self) -> Headers {
        Headers::parse(&self.raw_headers)
    }

    /// The body as a content tree: a single leaf, or one node per part
    /// for `multipart/*` messages, recursively.
    ///
    /// # Errors
    ///
    /// * a `multipart/*` part without a `boundary` parameter
    /// * a malformed `Content-Type`
    pub fn body(&self) -> anyhow::Result<Content> {
        let headers = self.headers();
        let mut top = Headers::default();
        top.push(
            "Content-Type",
            headers.get("Content-Type").unwrap_or("text/plain"),
        );
        for name in ["Content-Transfer-Encoding", "Content-Disposition", "Content-ID"] {
            if let Some(value) = headers.get(name) {
                top.push(name, value);
            }
        }
        parse_content(top, &self.raw_body)
    }
}

/// One node of the MIME content tree: its own subheaders, raw bytes and
/// children (empty except for `multipart/*` nodes).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Content {
    /// the part's own headers
    pub headers: Headers,
    /// the part's raw bytes, transfer encoding still applied
    pub body: Vec<u8>,
    /// child parts of a `multipart/*` node, in order
    pub children: Vec<Content>,
}

impl Content {
    /// The transfer encoding, `7bit` when the header is absent.
    #[must_use]
    pub fn encoding(&self) -> &str {
        self.headers
            .get("Content-Transfer-Encoding")
            .unwrap_or("7bit")
    }

    /// Apply the transfer encoding, then transcode from the declared
    /// `charset` parameter to UTF-8.
    ///
    /// # Errors
    ///
    /// * an unknown transfer encoding
    /// * invalid base64 data
    pub fn decode(&self) -> anyhow::Result<Vec<u8>> {
        let (_, params) = parse_media_type(self.headers.get("Content-Type").unwrap_or(""));
        let charset_label = param(&params, "charset").unwrap_or("utf-8");

        let raw = match self.encoding().to_ascii_lowercase().as_str() {
            "7bit" | "8bit" | "binary" => self.body.clone(),
            "quoted-printable" => charset::decode_quoted_printable(&self.body, false),
            "base64" => {
                let compact = self
                    .body
                    .iter()
                    .copied()
                    .filter(|b| !b.is_ascii_whitespace())
                    .collect::<Vec<_>>();
                base64::Engine::decode(&base64::engine::general_purpose::STANDARD, compact)
                    .map_err(|e| anyhow::anyhow!("failed to decode base64: {e}"))?
            }
            other => anyhow::bail!("unknown encoding: {other}"),
        };

        Ok(charset::to_utf8(charset_label, &raw))
    }

    /// true when this node has no children and is not `multipart/*`
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
            && !self
                .headers
                .get("Content-Type")
                .unwrap_or("")
                .to_ascii_lowercase()
                .starts_with("multipart/")
    }

    /// Depth-first list of the leaf parts.
    #[must_use]
    pub fn flatten(&self) -> Vec<&Self> {
        if self.is_leaf() {
            return vec![self];
        }
        self.children.iter().flat_map(Self::flatten).collect()
    }

    fn disposition(&self) -> String {
        let (kind, _) = parse_media_type(self.headers.get("Content-Disposition").unwrap_or(""));
        kind
    }

    /// `Content-Disposition: attachment`
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.disposition() == "attachment"
    }

    /// `Content-Disposition: inline`
    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.disposition() == "inline"
    }

    /// `Content-Disposition: form-data`
    #[must_use]
    pub fn is_form(&self) -> bool {
        self.disposition() == "form-data"
    }

    /// The part's file name, from `filename*=` (RFC 5987), `filename=`,
    /// or the Content-Type `name=` parameter, in that order.
    ///
    /// # Errors
    ///
    /// * no filename parameter on the part
    pub fn filename(&self) -> anyhow::Result<String> {
        let (_, disposition) =
            parse_media_type(self.headers.get("Content-Disposition").unwrap_or(""));

        if let Some(extended) = param(&disposition, "filename*") {
            return decode_rfc5987(extended)
                .ok_or_else(|| anyhow::anyhow!("malformed extended filename: '{extended}'"));
        }
        if let Some(name) = param(&disposition, "filename") {
            return Ok(name.to_string());
        }

        let (_, content_type) = parse_media_type(self.headers.get("Content-Type").unwrap_or(""));
        param(&content_type, "name").map_or_else(
            || anyhow::bail!("no filename in Content-Disposition nor name in Content-Type params"),
            |name| Ok(name.to_string()),
        )
    }

    /// The `name=` parameter of a `form-data` part.
    ///
    /// # Errors
    ///
    /// * no name parameter on the part
    pub fn name(&self) -> anyhow::Result<String> {
        let (_, disposition) =
            parse_media_type(self.headers.get("Content-Disposition").unwrap_or(""));
        param(&disposition, "name").map_or_else(
            || anyhow::bail!("no name in Content-Disposition params"),
            |name| Ok(name.to_string()),
        )
    }
}

fn parse_content(headers: Headers, body: &[u8]) -> anyhow::Result<Content> {
    let (media_type, params) = parse_media_type(headers.get("Content-Type").unwrap_or("text/plain"));

    if media_type.starts_with("multipart/") {
        let boundary = param(&params, "boundary")
            .ok_or_else(|| anyhow::anyhow!("no boundary in Content-Type params"))?
            .to_string();

        let mut content = Content {
            headers,
            body: Vec::new(),
            children: Vec::new(),
        };
        for part in split_multipart(body, &boundary) {
            let (part_headers, part_body) = split_once_bytes(part, b"\r\n\r\n")
                .or_else(|| split_once_bytes(part, b"\n\n"))
                .unwrap_or((part, &[]));
            content
                .children
                .push(parse_content(Headers::parse(part_headers), part_body)?);
        }
        return Ok(content);
    }

    Ok(Content {
        headers,
        body: body.to_vec(),
        children: Vec::new(),
    })
}

// Cuts the raw body into the byte ranges between boundary delimiter
// lines, preamble and epilogue excluded.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let close = format!("--{boundary}--");

    let mut parts = Vec::new();
    let mut current_start: Option<usize> = None;

    for line in LineRanges::new(body) {
        let text = trim_line_end(&body[line.clone()]);
        let is_close = text == close.as_bytes();
        if is_close || text == delimiter.as_bytes() {
            if let Some(start) = current_start {
                // the CRLF preceding the delimiter belongs to it
                let end = line.start.saturating_sub(1);
                let end = if end > start && body[end - 1] == b'\r' {
                    end - 1
                } else {
                    end
                };
                parts.push(&body[start..end.max(start)]);
            }
            current_start = if is_close { None } else { Some(line.end) };
        }
    }
    parts
}

// Byte ranges of each line, terminator included.
struct LineRanges<'a> {
    body: &'a [u8],
    offset: usize,
}

impl<'a> LineRanges<'a> {
    const fn new(body: &'a [u8]) -> Self {
        Self { body, offset: 0 }
    }
}

impl Iterator for LineRanges<'_> {
    type Item = std::ops::Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.body.len() {
            return None;
        }
        let start = self.offset;
        let end = self.body[start..]
            .iter()
            .position(|b| *b == b'\n')
            .map_or(self.body.len(), |i| start + i + 1);
        self.offset = end;
        Some(start..end)
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r' || line[end - 1] == b' ') {
        end -= 1;
    }
    &line[..end]
}

/// Split a `Content-Type`-shaped value into its lower-cased media type
/// and its parameters.
pub(crate) fn parse_media_type(value: &str) -> (String, Vec<(String, String)>) {
    let mut segments = value.split(';');
    let media_type = segments.next().unwrap_or("").trim().to_ascii_lowercase();

    let mut params = Vec::new();
    for segment in segments {
        if let Some((name, raw)) = segment.split_once('=') {
            let raw = raw.trim();
            let value = raw
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(raw);
            params.push((name.trim().to_ascii_lowercase(), value.to_string()));
        }
    }
    (media_type, params)
}

pub(crate) fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

// RFC 5987: charset'language'percent-encoded-value
fn decode_rfc5987(value: &str) -> Option<String> {
    let mut fields = value.splitn(3, '\'');
    let charset_label = fields.next()?;
    let _language = fields.next()?;
    let encoded = fields.next()?;

    let bytes = percent_decode(encoded)?;
    Some(String::from_utf8_lossy(&charset::to_utf8(charset_label, &bytes)).into_owned())
}

fn percent_decode(input: &str) -> Option<Vec<u8>> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = (*bytes.get(i + 1)? as char).to_digit(16)?;
            let lo = (*bytes.get(i + 2)? as char).to_digit(16)?;
            out.push(u8::try_from(hi * 16 + lo).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Some(out)
}

fn split_once_bytes<'a>(data: &'a [u8], needle: &[u8]) -> Option<(&'a [u8], &'a [u8])> {
    data.windows(needle.len())
        .position(|window| window == needle)
        .map(|i| (&data[..i], &data[i + needle.len()..]))
}

fn contains_bytes(data: &[u8], needle: &[u8]) -> bool {
    data.windows(needle.len()).any(|window| window == needle)
}
