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

/// Growable buffer holding the message headers and body exactly as
/// received.
///
/// The buffer is a chain of byte segments: appending extends the tail
/// segment, prepending inserts a fresh head segment. Both are O(1), so
/// middlewares can insert `Received:` and friends at the top of an
/// already ingested message without shifting it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Data {
    segments: std::collections::VecDeque<Vec<u8>>,
}

impl Data {
    ///
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tail(&mut self) -> &mut Vec<u8> {
        if self.segments.is_empty() {
            self.segments.push_back(Vec::new());
        }
        self.segments.back_mut().expect("buffer has a tail segment")
    }

    /// Append bytes to the tail of the buffer.
    pub fn append(&mut self, bytes: &[u8]) {
        self.tail().extend_from_slice(bytes);
    }

    /// Append a string to the tail of the buffer.
    pub fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    /// Insert bytes as a new head segment, before everything already
    /// buffered.
    pub fn prepend(&mut self, bytes: &[u8]) {
        self.segments.push_front(bytes.to_vec());
    }

    /// Insert a string as a new head segment.
    pub fn prepend_str(&mut self, s: &str) {
        self.prepend(s.as_bytes());
    }

    /// Total byte length, the sum of all segment lengths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }

    ///
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize the canonical byte stream, segments in order.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for segment in &self.segments {
            out.extend_from_slice(segment);
        }
        out
    }

    /// A reader concatenating the segments in order.
    #[must_use]
    pub fn reader(&self) -> DataReader<'_> {
        DataReader {
            segments: &self.segments,
            segment: 0,
            offset: 0,
        }
    }
}

impl std::fmt::Display for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes()))
    }
}

/// Reader over a [`Data`] buffer, yielding bytes in insertion order
/// (prepends before appends).
pub struct DataReader<'a> {
    segments: &'a std::collections::VecDeque<Vec<u8>>,
    segment: usize,
    offset: usize,
}

impl std::io::Read for DataReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            let Some(segment) = self.segments.get(self.segment) else {
                break;
            };
            let available = &segment[self.offset..];
            if available.is_empty() {
                self.segment += 1;
                self.offset = 0;
                continue;
            }
            let n = available.len().min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&available[..n]);
            written += n;
            self.offset += n;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn append_then_prepend() {
        let mut data = Data::new();
        data.append_str("body line\r\n");
        data.prepend_str("Header-Two: b\r\n");
        data.prepend_str("Header-One: a\r\n");

        assert_eq!(
            data.to_string(),
            "Header-One: a\r\nHeader-Two: b\r\nbody line\r\n"
        );
        assert_eq!(data.len(), data.bytes().len());
    }

    #[test]
    fn len_is_sum_of_segments() {
        let mut data = Data::new();
        assert_eq!(data.len(), 0);
        assert!(data.is_empty());

        data.append(b"abc");
        data.append(b"def");
        data.prepend(b"xy");
        assert_eq!(data.len(), 8);
        assert_eq!(data.bytes(), b"xyabcdef");
    }

    #[test]
    fn append_after_prepend_stays_at_tail() {
        let mut data = Data::new();
        data.prepend(b"head");
        data.append(b"tail");
        assert_eq!(data.bytes(), b"headtail");
    }

    #[test]
    fn reader_yields_insertion_order() {
        let mut data = Data::new();
        data.append(b"cccc");
        data.prepend(b"bb");
        data.prepend(b"a");

        let mut out = Vec::new();
        std::io::Read::read_to_end(&mut data.reader(), &mut out).unwrap();
        assert_eq!(out, b"abbcccc");

        // small destination buffers cross segment boundaries
        let mut reader = data.reader();
        let mut buf = [0_u8; 3];
        assert_eq!(std::io::Read::read(&mut reader, &mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abb");
        assert_eq!(std::io::Read::read(&mut reader, &mut buf).unwrap(), 3);
        assert_eq!(&buf, b"ccc");
        assert_eq!(std::io::Read::read(&mut reader, &mut buf).unwrap(), 1);
        assert_eq!(std::io::Read::read(&mut reader, &mut buf).unwrap(), 0);
    }
}
