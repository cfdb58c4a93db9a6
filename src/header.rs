// Copyright 2020-2022 The NATS Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The `NATS/1.0` header block carried in front of `HPUB`/`HMSG` payloads.

use std::convert::TryFrom;
use std::iter::FromIterator;

use log::trace;

use crate::error::{Error, ErrorKind, Result};

pub(crate) const HEADER_LINE: &str = "NATS/1.0";
const VERSION_PREFIX: &str = "NATS/";

/// Pseudo header holding the code of the status line.
pub const STATUS_CODE: &str = "Status-Code";

/// Pseudo header holding the text of the status line.
pub const STATUS_MESSAGE: &str = "Status-Message";

/// Nats-Msg-Id
pub const NATS_MSG_ID: &str = "Nats-Msg-Id";

/// Nats-Expected-Stream
pub const NATS_EXPECTED_STREAM: &str = "Nats-Expected-Stream";

/// Nats-Expected-Last-Sequence
pub const NATS_EXPECTED_LAST_SEQUENCE: &str = "Nats-Expected-Last-Sequence";

/// An ordered header map with unique keys.
///
/// Inserting an existing key replaces its value in place, so the last write
/// wins while the original position is kept.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeaderMap {
    status: Option<String>,
    status_message: Option<String>,
    entries: Vec<(String, String)>,
}

impl<K, V> FromIterator<(K, V)> for HeaderMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = (K, V)>,
    {
        let mut map = HeaderMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

fn parse_error<T, E: AsRef<str>>(e: E) -> Result<T> {
    trace!("header parse error: {}", e.as_ref());
    Err(Error::with_source(ErrorKind::Parse, e.as_ref().to_string()))
}

impl TryFrom<&[u8]> for HeaderMap {
    type Error = Error;

    fn try_from(buf: &[u8]) -> Result<Self> {
        let text = match std::str::from_utf8(buf) {
            Ok(text) => text,
            Err(_) => return parse_error("invalid header received"),
        };

        let mut map = HeaderMap::new();
        let mut seen_version = false;

        for line in text.split("\r\n") {
            if line.is_empty() {
                continue;
            }

            if line.contains(VERSION_PREFIX) {
                seen_version = true;
                let rest = line
                    .trim()
                    .split_once(' ')
                    .map(|(_, rest)| rest.trim())
                    .unwrap_or("");
                match rest.split_once(' ') {
                    Some((code, message)) => {
                        map.status = Some(code.trim().to_string());
                        let message = message.trim();
                        if !message.is_empty() {
                            map.status_message = Some(message.to_string());
                        }
                    }
                    None if !rest.is_empty() => map.status = Some(rest.to_string()),
                    None => {}
                }
                continue;
            }

            match line.split_once(':') {
                Some((k, v)) => map.insert(k.trim(), v.trim()),
                None => return parse_error(format!("malformed header line: {:?}", line)),
            }
        }

        if !seen_version {
            return parse_error("version line does not begin with NATS/1.0");
        }

        Ok(map)
    }
}

impl HeaderMap {
    /// Creates a new, empty header map.
    pub fn new() -> HeaderMap {
        HeaderMap::default()
    }

    /// Creates a header map that only carries a status line.
    pub fn with_status(code: u16, message: &str) -> HeaderMap {
        HeaderMap {
            status: Some(code.to_string()),
            status_message: if message.is_empty() {
                None
            } else {
                Some(message.to_string())
            },
            entries: Vec::new(),
        }
    }

    /// Inserts a header, replacing the value of an existing key.
    ///
    /// ```
    /// # use nats_poll::HeaderMap;
    /// let mut headers = HeaderMap::new();
    /// headers.insert("X-Key", "one");
    /// headers.insert("X-Key", "two");
    /// assert_eq!(headers.get("X-Key"), Some("two"));
    /// assert_eq!(headers.len(), 1);
    /// ```
    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        let key = key.into();
        let value = value.into();
        match key.as_str() {
            STATUS_CODE => self.status = Some(value),
            STATUS_MESSAGE => self.status_message = Some(value),
            _ => match self.entries.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = value,
                None => self.entries.push((key, value)),
            },
        }
    }

    /// Returns the value of a header. The status line is reachable through
    /// [`STATUS_CODE`] and [`STATUS_MESSAGE`].
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            STATUS_CODE => self.status.as_deref(),
            STATUS_MESSAGE => self.status_message.as_deref(),
            _ => self
                .entries
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
        }
    }

    /// Removes a header and returns its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of regular headers, not counting the status line.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there is neither a status line nor any header.
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.status_message.is_none() && self.entries.is_empty()
    }

    /// Iterates headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The numeric status code, if the status line carried one.
    pub fn status_code(&self) -> Option<u16> {
        self.status.as_deref().and_then(|code| code.parse().ok())
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        // `NATS/1.0[ code[ message]]\r\n[key: value\r\n]*\r\n`
        let mut buf = Vec::with_capacity(32);
        buf.extend_from_slice(HEADER_LINE.as_bytes());
        if let Some(status) = &self.status {
            buf.push(b' ');
            buf.extend_from_slice(status.trim().as_bytes());
            if let Some(message) = &self.status_message {
                buf.push(b' ');
                buf.extend_from_slice(message.trim().as_bytes());
            }
        }
        buf.extend_from_slice(b"\r\n");
        for (k, v) in &self.entries {
            buf.extend_from_slice(k.trim().as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(v.trim().as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");
        buf
    }
}

#[cfg(test)]
mod try_from {
    use super::*;

    #[test]
    fn inline_status() {
        let headers = HeaderMap::try_from("NATS/1.0 100".as_bytes()).unwrap();
        assert_eq!(headers.get(STATUS_CODE), Some("100"));
        assert_eq!(headers.status_code(), Some(100));
        assert_eq!(headers.get(STATUS_MESSAGE), None);
    }

    #[test]
    fn inline_status_with_message() {
        let headers =
            HeaderMap::try_from("NATS/1.0 404 No Messages\r\n\r\n".as_bytes()).unwrap();
        assert_eq!(headers.status_code(), Some(404));
        assert_eq!(headers.status_message(), Some("No Messages"));
        assert_eq!(headers.len(), 0);
        assert!(!headers.is_empty());
    }

    #[test]
    fn malformed_line() {
        let error =
            HeaderMap::try_from("NATS/1.0 200\r\nX-Test-A a\r\n".as_bytes()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Parse);
    }

    #[test]
    fn missing_version_line() {
        let error = HeaderMap::try_from("X-Test-A: a\r\n\r\n".as_bytes()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Parse);
    }

    #[test]
    fn empty_lines() {
        let headers = HeaderMap::try_from(
            "NATS/1.0\r\n\r\nX-Test-A: a\r\n\r\nX-Test-B: b\r\n\r\n".as_bytes(),
        )
        .unwrap();

        assert_eq!(headers.get("X-Test-A"), Some("a"));
        assert_eq!(headers.get("X-Test-B"), Some("b"));
        assert_eq!(headers.status_code(), None);
    }

    #[test]
    fn values_are_trimmed_and_last_write_wins() {
        let headers = HeaderMap::try_from(
            "NATS/1.0\r\nAccept:  json \r\nTrace: 1\r\nAccept: text\r\n\r\n".as_bytes(),
        )
        .unwrap();

        assert_eq!(headers.get("Accept"), Some("text"));
        let keys: Vec<_> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Accept", "Trace"]);
    }

    #[test]
    fn render_then_parse() {
        let mut headers = HeaderMap::with_status(408, "Request Timeout");
        headers.insert("Nats-Pending-Messages", "2");
        headers.insert(NATS_MSG_ID, "abc");

        let bytes = headers.to_bytes();
        assert_eq!(
            bytes,
            b"NATS/1.0 408 Request Timeout\r\nNats-Pending-Messages: 2\r\nNats-Msg-Id: abc\r\n\r\n"
                .to_vec()
        );
        assert_eq!(HeaderMap::try_from(&bytes[..]).unwrap(), headers);
    }
}
