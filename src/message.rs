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

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::{Error, ErrorKind, Result};
use crate::header::HeaderMap;
use crate::Client;

pub(crate) const ACK_PREFIX: &str = "$JS.ACK.";

const NO_MESSAGES: u16 = 404;
const REQUEST_TIMEOUT: u16 = 408;
const NO_RESPONDERS: u16 = 503;

/// Body bytes plus an optional header block.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Payload {
    pub body: Vec<u8>,
    pub headers: HeaderMap,
}

impl Payload {
    pub fn new(body: impl Into<Vec<u8>>) -> Payload {
        Payload {
            body: body.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Adds a header, replacing any earlier value for the same key.
    pub fn with_header(mut self, key: &str, value: &str) -> Payload {
        self.headers.insert(key, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Parses the body as JSON and walks a dotted path through it.
    ///
    /// Array elements are addressed by their index.
    ///
    /// ```
    /// # use nats_poll::Payload;
    /// let payload = Payload::from(r#"{"info":{"streams":[{"name":"ORDERS"}]}}"#);
    /// assert_eq!(
    ///     payload.get_value("info.streams.0.name"),
    ///     Some(serde_json::json!("ORDERS"))
    /// );
    /// assert_eq!(payload.get_value("info.consumers"), None);
    /// ```
    pub fn get_value(&self, path: &str) -> Option<Value> {
        let root: Value = serde_json::from_slice(&self.body).ok()?;
        let mut current = &root;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }

    /// Deserializes the body as JSON.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub(crate) fn from_json<T: serde::Serialize>(value: &T) -> Result<Payload> {
        serde_json::to_vec(value)
            .map(Payload::new)
            .map_err(|err| Error::with_source(ErrorKind::InvalidArgument, err))
    }
}

impl From<&str> for Payload {
    fn from(body: &str) -> Payload {
        Payload::new(body.as_bytes())
    }
}

impl From<String> for Payload {
    fn from(body: String) -> Payload {
        Payload::new(body.into_bytes())
    }
}

impl From<&[u8]> for Payload {
    fn from(body: &[u8]) -> Payload {
        Payload::new(body)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(body: Vec<u8>) -> Payload {
        Payload::new(body)
    }
}

impl From<&Value> for Payload {
    fn from(value: &Value) -> Payload {
        Payload::new(value.to_string())
    }
}

/// Lets a subscription handler acknowledge a JetStream message by returning
/// the ack as its reply.
impl From<AckKind> for Payload {
    fn from(kind: AckKind) -> Payload {
        Payload::new(kind.to_bytes())
    }
}

/// A message delivered to a subscription.
#[derive(Clone, PartialEq)]
pub struct Message {
    /// The subject the message was published to.
    pub subject: String,

    /// Subscription id the message was routed to.
    pub sid: u64,

    /// Optional reply subject.
    pub reply_to: Option<String>,

    pub payload: Payload,

    /// Delivery time, recovered from a JetStream ack subject.
    pub timestamp: Option<OffsetDateTime>,
}

impl Message {
    pub(crate) fn new(
        subject: String,
        sid: u64,
        reply_to: Option<String>,
        payload: Payload,
    ) -> Message {
        let timestamp = reply_to
            .as_deref()
            .and_then(AckInfo::parse)
            .map(|info| info.timestamp);
        Message {
            subject,
            sid,
            reply_to,
            payload,
            timestamp,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.payload.body
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.payload.headers
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn get_value(&self, path: &str) -> Option<Value> {
        self.payload.get_value(path)
    }

    pub fn status_code(&self) -> Option<u16> {
        self.payload.headers.status_code()
    }

    /// Ends the answer to a pull request: an empty status message, or an
    /// empty message that is not a stream delivery. Stream deliveries carry a
    /// `$JS.ACK.` reply subject even when their body is empty.
    pub fn is_end_of_pull(&self) -> bool {
        let delivery = self
            .reply_to
            .as_deref()
            .map_or(false, |reply| reply.starts_with(ACK_PREFIX));
        self.is_empty() && (self.status_code().is_some() || !delivery)
    }

    /// JetStream answered a pull request with nothing to deliver.
    pub fn is_no_messages(&self) -> bool {
        self.is_empty() && self.status_code() == Some(NO_MESSAGES)
    }

    /// A pull request expired before it could be fulfilled.
    pub fn is_request_timeout(&self) -> bool {
        self.is_empty() && self.status_code() == Some(REQUEST_TIMEOUT)
    }

    /// Nobody was subscribed to the subject of the original request.
    pub fn is_no_responders(&self) -> bool {
        self.is_empty() && self.status_code() == Some(NO_RESPONDERS)
    }

    /// Delivery metadata encoded in the JetStream reply subject.
    pub fn ack_info(&self) -> Option<AckInfo> {
        self.reply_to.as_deref().and_then(AckInfo::parse)
    }

    /// Publishes a response to the reply subject of this message.
    pub fn respond(&self, client: &mut Client, payload: impl Into<Payload>) -> Result<()> {
        match self.reply_to.as_deref() {
            Some(reply) => client.publish(reply, payload),
            None => Err(Error::with_source(
                ErrorKind::InvalidArgument,
                "no reply subject available",
            )),
        }
    }

    /// Acknowledges a JetStream message.
    pub fn ack(&self, client: &mut Client) -> Result<()> {
        self.ack_with(client, AckKind::Ack)
    }

    /// Acknowledges a JetStream message with the given kind.
    pub fn ack_with(&self, client: &mut Client, kind: AckKind) -> Result<()> {
        self.respond(client, kind.to_bytes())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("subject", &self.subject)
            .field("sid", &self.sid)
            .field("reply_to", &self.reply_to)
            .field("headers", &self.payload.headers)
            .field("body", &String::from_utf8_lossy(&self.payload.body))
            .finish()
    }
}

/// The kinds of response used for acknowledging a JetStream message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// Acknowledges a message was completely handled.
    Ack,
    /// Signals that the message will not be processed now and processing can
    /// move onto the next message, optionally after a delay.
    Nak(Option<Duration>),
    /// When sent before the ack wait period expires, resets the redelivery timer.
    Progress,
    /// Acknowledges the message and requests the next one.
    Next,
    /// Instructs the server to stop redelivery of the message without
    /// acknowledging it as successfully processed.
    Term,
}

impl AckKind {
    pub fn to_bytes(self) -> Vec<u8> {
        match self {
            AckKind::Ack => b"+ACK".to_vec(),
            AckKind::Nak(None) => b"-NAK".to_vec(),
            AckKind::Nak(Some(delay)) => {
                format!("-NAK {{\"delay\":{}}}", delay.as_nanos()).into_bytes()
            }
            AckKind::Progress => b"+WPI".to_vec(),
            AckKind::Next => b"+NXT".to_vec(),
            AckKind::Term => b"+TERM".to_vec(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<AckKind> {
        match bytes {
            b"+ACK" => Some(AckKind::Ack),
            b"-NAK" => Some(AckKind::Nak(None)),
            b"+WPI" => Some(AckKind::Progress),
            b"+NXT" => Some(AckKind::Next),
            b"+TERM" => Some(AckKind::Term),
            _ => {
                let rest = bytes.strip_prefix(b"-NAK ")?;
                let value: Value = serde_json::from_slice(rest).ok()?;
                let nanos = value.get("delay")?.as_u64()?;
                Some(AckKind::Nak(Some(Duration::from_nanos(nanos))))
            }
        }
    }
}

/// Delivery metadata carried in a JetStream ack subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckInfo {
    pub domain: Option<String>,
    pub account_hash: Option<String>,
    pub stream: String,
    pub consumer: String,
    /// How many times the message has been delivered.
    pub delivered: u64,
    pub stream_sequence: u64,
    pub consumer_sequence: u64,
    pub timestamp: OffsetDateTime,
    /// Messages still pending for the consumer.
    pub pending: u64,
}

impl AckInfo {
    /// Decodes an ack subject.
    ///
    /// The legacy layout `$JS.ACK.<stream>.<consumer>.<delivered>.<sseq>.<cseq>.<ts>.<pending>`
    /// has 9 tokens; it is normalized by inserting empty domain and account
    /// tokens so it lines up with the 11+ token layout
    /// `$JS.ACK.<domain>.<hash>.<stream>.<consumer>.<delivered>.<sseq>.<cseq>.<ts>.<pending>[.<token>]`.
    /// Anything else yields `None`.
    pub fn parse(reply: &str) -> Option<AckInfo> {
        if !reply.starts_with(ACK_PREFIX) {
            return None;
        }

        let mut tokens: Vec<&str> = reply.split('.').collect();
        if tokens.len() == 9 {
            tokens.insert(2, "");
            tokens.insert(2, "");
        }
        if tokens.len() < 11 {
            log::trace!("skipping ack subject with {} tokens", tokens.len());
            return None;
        }

        macro_rules! number {
            ($index:expr) => {
                match tokens[$index].parse() {
                    Ok(value) => value,
                    Err(_) => {
                        log::error!("failed to parse token {} of ack subject {}", $index, reply);
                        return None;
                    }
                }
            };
        }

        let optional = |token: &str| match token {
            "" | "_" => None,
            token => Some(token.to_string()),
        };

        let nanos: i128 = number!(9);
        let timestamp = OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?;

        Some(AckInfo {
            domain: optional(tokens[2]),
            account_hash: optional(tokens[3]),
            stream: tokens[4].to_string(),
            consumer: tokens[5].to_string(),
            delivered: number!(6),
            stream_sequence: number!(7),
            consumer_sequence: number!(8),
            timestamp,
            pending: number!(10),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_ack_subject_is_normalized() {
        let info = AckInfo::parse("$JS.ACK.ORDERS.worker.1.42.7.1600000000000000000.3").unwrap();
        assert_eq!(info.domain, None);
        assert_eq!(info.account_hash, None);
        assert_eq!(info.stream, "ORDERS");
        assert_eq!(info.consumer, "worker");
        assert_eq!(info.delivered, 1);
        assert_eq!(info.stream_sequence, 42);
        assert_eq!(info.consumer_sequence, 7);
        assert_eq!(info.timestamp.unix_timestamp(), 1_600_000_000);
        assert_eq!(info.pending, 3);
    }

    #[test]
    fn current_ack_subject() {
        let info =
            AckInfo::parse("$JS.ACK.hub.ACCHASH.ORDERS.worker.2.10.5.1600000000000000000.0.rnd")
                .unwrap();
        assert_eq!(info.domain.as_deref(), Some("hub"));
        assert_eq!(info.account_hash.as_deref(), Some("ACCHASH"));
        assert_eq!(info.delivered, 2);
        assert_eq!(info.pending, 0);
    }

    #[test]
    fn malformed_ack_subjects_are_skipped() {
        assert!(AckInfo::parse("$JS.ACK.ORDERS.worker.1.42").is_none());
        assert!(AckInfo::parse("$JS.ACK.a.b.c.d.e.f.g.h.i.j").is_none());
        assert!(AckInfo::parse("$JS.ACK.ORDERS.worker.x.42.7.1600000000000000000.3").is_none());
        assert!(AckInfo::parse("_INBOX.abc").is_none());

        let message = Message::new("orders".into(), 1, Some("$JS.ACK.bad".into()), Payload::default());
        assert_eq!(message.timestamp, None);
    }

    #[test]
    fn message_timestamp_comes_from_ack_subject() {
        let message = Message::new(
            "orders".into(),
            1,
            Some("$JS.ACK.ORDERS.worker.1.42.7.1600000000000000000.3".into()),
            Payload::from("hello"),
        );
        assert_eq!(message.timestamp.map(|ts| ts.unix_timestamp()), Some(1_600_000_000));
    }

    #[test]
    fn status_sentinels() {
        let payload = Payload {
            body: Vec::new(),
            headers: HeaderMap::with_status(404, "No Messages"),
        };
        let message = Message::new("_INBOX.x".into(), 1, None, payload);
        assert!(message.is_empty());
        assert!(message.is_no_messages());
        assert!(!message.is_request_timeout());
        assert!(!message.is_no_responders());
        assert!(message.is_end_of_pull());
    }

    #[test]
    fn empty_stream_message_is_not_end_of_pull() {
        let ack = "$JS.ACK.ORDERS.worker.1.1.1.1600000000000000000.1";
        let delivery = Message::new("orders.1".into(), 1, Some(ack.into()), Payload::from(""));
        assert!(delivery.is_empty());
        assert!(!delivery.is_end_of_pull());

        let bare = Message::new("_INBOX.x".into(), 1, None, Payload::from(""));
        assert!(bare.is_end_of_pull());
    }

    #[test]
    fn get_value_walks_paths() {
        let payload = Payload::from(r#"{"a":{"b":[1,{"c":true}]},"n":null}"#);
        assert_eq!(payload.get_value("a.b.0"), Some(serde_json::json!(1)));
        assert_eq!(payload.get_value("a.b.1.c"), Some(serde_json::json!(true)));
        assert_eq!(payload.get_value("n"), Some(Value::Null));
        assert_eq!(payload.get_value("a.x"), None);
        assert_eq!(payload.get_value("a.b.9"), None);
        assert_eq!(Payload::from("not json").get_value("a"), None);
    }

    #[test]
    fn ack_kinds() {
        for kind in [
            AckKind::Ack,
            AckKind::Nak(None),
            AckKind::Nak(Some(Duration::from_secs(2))),
            AckKind::Progress,
            AckKind::Next,
            AckKind::Term,
        ] {
            assert_eq!(AckKind::from_bytes(&kind.to_bytes()), Some(kind));
        }
        assert_eq!(
            AckKind::Nak(Some(Duration::from_millis(5))).to_bytes(),
            b"-NAK {\"delay\":5000000}".to_vec()
        );
        assert_eq!(AckKind::from_bytes(b"hello"), None);
    }
}
