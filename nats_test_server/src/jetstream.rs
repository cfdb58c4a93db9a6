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

//! Just enough JetStream for pull consumers: streams capture matching
//! publishes in memory, consumers hand them out through `CONSUMER.MSG.NEXT`
//! and track acks sent to the `$JS.ACK` reply subjects.
//!
//! `no_wait` pull requests are answered at once, ending with a `404 No
//! Messages` status message when fewer messages than asked for are
//! available. Requests with `expires` are held open until enough messages
//! arrive or they expire with `408 Request Timeout`, and are dropped when
//! their client goes away. Other requests get the `408` at once.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::protocol::{header_value, status_headers};
use crate::{subject_match, Outgoing};

pub(crate) const API_PREFIX: &str = "$JS.API.";
pub(crate) const ACK_PREFIX: &str = "$JS.ACK.";

struct ApiError {
    code: u16,
    err_code: u64,
    description: &'static str,
}

const STREAM_NOT_FOUND: ApiError = ApiError {
    code: 404,
    err_code: 10059,
    description: "stream not found",
};

const CONSUMER_NOT_FOUND: ApiError = ApiError {
    code: 404,
    err_code: 10014,
    description: "consumer not found",
};

const STREAM_NAME_IN_USE: ApiError = ApiError {
    code: 400,
    err_code: 10058,
    description: "stream name already in use with a different configuration",
};

const BAD_REQUEST: ApiError = ApiError {
    code: 400,
    err_code: 10003,
    description: "bad request",
};

fn now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

struct Stored {
    subject: String,
    headers: Option<Vec<u8>>,
    body: Vec<u8>,
}

struct Consumer {
    name: String,
    config: Value,
    created: String,
    /// Stream sequence of the next message never delivered before.
    next_seq: u64,
    /// Consumer sequence of the last delivery.
    delivered: u64,
    /// Stream sequence to (consumer sequence, deliveries) for unacked messages.
    ack_pending: BTreeMap<u64, (u64, u64)>,
    redeliveries: VecDeque<u64>,
    num_redelivered: u64,
}

impl Consumer {
    fn filter(&self) -> Option<&str> {
        self.config["filter_subject"]
            .as_str()
            .filter(|filter| !filter.is_empty())
    }

    fn acks(&self) -> bool {
        self.config["ack_policy"].as_str() != Some("none")
    }

    fn matches(&self, message: &Stored) -> bool {
        self.filter()
            .map_or(true, |filter| subject_match(&message.subject, filter))
    }

    fn num_pending(&self, messages: &[Stored]) -> u64 {
        messages
            .iter()
            .enumerate()
            .filter(|(index, message)| *index as u64 + 1 >= self.next_seq && self.matches(message))
            .count() as u64
    }

    fn next_new(&mut self, messages: &[Stored]) -> Option<u64> {
        let start = self.next_seq.max(1);
        let seq = (start..=messages.len() as u64).find(|seq| self.matches(&messages[*seq as usize - 1]))?;
        self.next_seq = seq + 1;
        Some(seq)
    }

    fn info(&self, stream: &str, messages: &[Stored]) -> Value {
        let (floor_stream, floor_consumer) = match self.ack_pending.iter().next() {
            Some((seq, (cseq, _))) => (seq - 1, cseq - 1),
            None => (self.next_seq.saturating_sub(1), self.delivered),
        };
        json!({
            "stream_name": stream,
            "name": self.name,
            "created": self.created,
            "config": self.config,
            "delivered": {
                "consumer_seq": self.delivered,
                "stream_seq": self.next_seq.saturating_sub(1),
            },
            "ack_floor": {
                "consumer_seq": floor_consumer,
                "stream_seq": floor_stream,
            },
            "num_ack_pending": self.ack_pending.len(),
            "num_redelivered": self.num_redelivered,
            "num_waiting": 0,
            "num_pending": self.num_pending(messages),
        })
    }
}

struct Stream {
    config: Value,
    created: String,
    messages: Vec<Stored>,
    msg_ids: HashMap<String, u64>,
    consumers: BTreeMap<String, Consumer>,
}

impl Stream {
    fn subjects(&self) -> Vec<&str> {
        self.config["subjects"]
            .as_array()
            .map(|subjects| subjects.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    fn info(&self) -> Value {
        let bytes: usize = self
            .messages
            .iter()
            .map(|m| m.body.len() + m.headers.as_ref().map_or(0, Vec::len))
            .sum();
        let last_seq = self.messages.len() as u64;
        json!({
            "config": self.config,
            "created": self.created,
            "state": {
                "messages": self.messages.len(),
                "bytes": bytes,
                "first_seq": if last_seq == 0 { 0 } else { 1 },
                "last_seq": last_seq,
                "consumer_count": self.consumers.len(),
            },
        })
    }
}

/// A long-polling pull request waiting for messages.
struct WaitingPull {
    stream: String,
    consumer: String,
    reply: String,
    /// Messages still owed to the request.
    batch: usize,
    client: usize,
    deadline: Instant,
}

/// In-memory JetStream state. Survives [`crate::NatsTestServer::restart`],
/// open pull requests do not.
#[derive(Default)]
pub struct JetStreamState {
    streams: BTreeMap<String, Stream>,
    waiting: Vec<WaitingPull>,
    api_total: u64,
    api_errors: u64,
}

impl JetStreamState {
    /// Messages stored in a stream that a consumer has not been handed yet.
    pub fn num_pending(&self, stream: &str, consumer: &str) -> Option<u64> {
        let stream = self.streams.get(stream)?;
        let consumer = stream.consumers.get(consumer)?;
        Some(consumer.num_pending(&stream.messages))
    }

    /// Messages delivered to a consumer and not acknowledged yet.
    pub fn num_ack_pending(&self, stream: &str, consumer: &str) -> Option<usize> {
        let consumer = self.streams.get(stream)?.consumers.get(consumer)?;
        Some(consumer.ack_pending.len())
    }

    /// Pull requests held open, for assertions.
    pub fn num_waiting(&self) -> usize {
        self.waiting.len()
    }

    /// Answers a `$JS.API.` request from client `origin`. `api` is the
    /// subject without the prefix.
    pub(crate) fn handle_api(
        &mut self,
        api: &str,
        body: &[u8],
        reply: Option<&str>,
        origin: usize,
    ) -> Vec<Outgoing> {
        let reply = match reply {
            Some(reply) => reply,
            None => return Vec::new(),
        };
        self.api_total += 1;

        let tokens: Vec<&str> = api.split('.').collect();
        if let ["CONSUMER", "MSG", "NEXT", stream, consumer] = tokens.as_slice() {
            return self.next(stream, consumer, body, reply, origin);
        }

        let request: Value = if body.is_empty() {
            json!({})
        } else {
            match serde_json::from_slice(body) {
                Ok(request) => request,
                Err(_) => Value::Null,
            }
        };

        let response = match tokens.as_slice() {
            _ if request.is_null() => Err(BAD_REQUEST),
            ["INFO"] => Ok(self.account_info()),
            ["STREAM", "CREATE", name] => self.create_stream(name, request),
            ["STREAM", "INFO", name] => self
                .streams
                .get(*name)
                .map(Stream::info)
                .ok_or(STREAM_NOT_FOUND),
            ["STREAM", "DELETE", name] => self
                .streams
                .remove(*name)
                .map(|_| json!({ "success": true }))
                .ok_or(STREAM_NOT_FOUND),
            ["CONSUMER", "DURABLE", "CREATE", stream, durable] => {
                self.create_consumer(stream, Some(*durable), request)
            }
            ["CONSUMER", "CREATE", stream] => self.create_consumer(stream, None, request),
            ["CONSUMER", "CREATE", stream, name] => self.create_consumer(stream, Some(*name), request),
            ["CONSUMER", "INFO", stream, consumer] => self
                .streams
                .get(*stream)
                .ok_or(STREAM_NOT_FOUND)
                .and_then(|s| {
                    s.consumers
                        .get(*consumer)
                        .map(|c| c.info(&stream_name(s), &s.messages))
                        .ok_or(CONSUMER_NOT_FOUND)
                }),
            ["CONSUMER", "DELETE", stream, consumer] => self
                .streams
                .get_mut(*stream)
                .ok_or(STREAM_NOT_FOUND)
                .and_then(|s| s.consumers.remove(*consumer).ok_or(CONSUMER_NOT_FOUND))
                .map(|_| json!({ "success": true })),
            _ => Err(BAD_REQUEST),
        };

        let body = match response {
            Ok(document) => document,
            Err(error) => {
                self.api_errors += 1;
                json!({
                    "type": "io.nats.jetstream.api.v1.error",
                    "error": {
                        "code": error.code,
                        "err_code": error.err_code,
                        "description": error.description,
                    },
                })
            }
        };
        vec![Outgoing::reply(reply, body.to_string().into_bytes())]
    }

    /// Stores a publish on a subject some stream listens on. Returns the
    /// `PublishAck` to send, if the publish asked for one.
    pub(crate) fn capture(&mut self, message: &Outgoing) -> Option<Vec<Outgoing>> {
        let (name, stream) = self.streams.iter_mut().find(|(_, stream)| {
            stream
                .subjects()
                .iter()
                .any(|pattern| subject_match(&message.subject, pattern))
        })?;

        let msg_id = message
            .headers
            .as_deref()
            .and_then(|headers| header_value(headers, "Nats-Msg-Id"));
        let existing = msg_id.as_ref().and_then(|id| stream.msg_ids.get(id).copied());

        let (seq, duplicate) = match existing {
            Some(seq) => (seq, true),
            None => {
                stream.messages.push(Stored {
                    subject: message.subject.clone(),
                    headers: message.headers.clone(),
                    body: message.body.clone(),
                });
                let seq = stream.messages.len() as u64;
                if let Some(id) = msg_id {
                    stream.msg_ids.insert(id, seq);
                }
                (seq, false)
            }
        };

        let mut ack = json!({ "stream": name, "seq": seq });
        if duplicate {
            ack["duplicate"] = json!(true);
        }
        Some(
            message
                .reply
                .iter()
                .map(|reply| Outgoing::reply(reply, ack.to_string().into_bytes()))
                .collect(),
        )
    }

    /// Applies an ack published to `$JS.ACK.<stream>.<consumer>...`.
    pub(crate) fn ack(&mut self, subject: &str, body: &[u8]) {
        let tokens: Vec<&str> = subject.split('.').collect();
        if tokens.len() < 9 {
            log::warn!("ignoring malformed ack subject {}", subject);
            return;
        }
        let seq: u64 = match tokens[5].parse() {
            Ok(seq) => seq,
            Err(_) => return,
        };
        let consumer = match self
            .streams
            .get_mut(tokens[2])
            .and_then(|stream| stream.consumers.get_mut(tokens[3]))
        {
            Some(consumer) => consumer,
            None => return,
        };

        let kind = body.split(|b| *b == b' ').next().unwrap_or_default();
        match kind {
            b"+ACK" | b"+TERM" | b"+NXT" | b"" => {
                if consumer.config["ack_policy"].as_str() == Some("all") {
                    consumer.ack_pending.retain(|pending, _| *pending > seq);
                } else {
                    consumer.ack_pending.remove(&seq);
                }
            }
            b"-NAK" => {
                if consumer.ack_pending.contains_key(&seq) {
                    consumer.redeliveries.push_back(seq);
                }
            }
            _ => {}
        }
    }

    fn account_info(&self) -> Value {
        let consumers: usize = self.streams.values().map(|s| s.consumers.len()).sum();
        let storage: usize = self
            .streams
            .values()
            .flat_map(|s| s.messages.iter())
            .map(|m| m.body.len())
            .sum();
        json!({
            "type": "io.nats.jetstream.api.v1.account_info_response",
            "memory": 0,
            "storage": storage,
            "streams": self.streams.len(),
            "consumers": consumers,
            "api": { "total": self.api_total, "errors": self.api_errors },
            "limits": {
                "max_memory": -1,
                "max_storage": -1,
                "max_streams": -1,
                "max_consumers": -1,
            },
        })
    }

    fn create_stream(&mut self, name: &str, mut config: Value) -> Result<Value, ApiError> {
        if config["name"].as_str().map_or(false, |n| n != name) {
            return Err(BAD_REQUEST);
        }
        config["name"] = json!(name);
        if config["subjects"].as_array().map_or(true, Vec::is_empty) {
            config["subjects"] = json!([name]);
        }

        if let Some(stream) = self.streams.get(name) {
            return if stream.config == config {
                Ok(stream.info())
            } else {
                Err(STREAM_NAME_IN_USE)
            };
        }

        let stream = Stream {
            config,
            created: now(),
            messages: Vec::new(),
            msg_ids: HashMap::new(),
            consumers: BTreeMap::new(),
        };
        let info = stream.info();
        self.streams.insert(name.to_string(), stream);
        Ok(info)
    }

    fn create_consumer(
        &mut self,
        stream_name: &str,
        name: Option<&str>,
        request: Value,
    ) -> Result<Value, ApiError> {
        let stream = self.streams.get_mut(stream_name).ok_or(STREAM_NOT_FOUND)?;
        let mut config = request["config"].clone();
        if !config.is_object() {
            return Err(BAD_REQUEST);
        }

        let name = match name {
            Some(name) => {
                config["durable_name"] = json!(name);
                name.to_string()
            }
            None => thread_rng()
                .sample_iter(&Alphanumeric)
                .take(8)
                .map(char::from)
                .collect(),
        };

        let last_seq = stream.messages.len() as u64;
        let next_seq = match config["deliver_policy"].as_str() {
            Some("new") => last_seq + 1,
            Some("last") => last_seq.max(1),
            Some("by_start_sequence") => config["opt_start_seq"].as_u64().unwrap_or(1),
            _ => 1,
        };

        let consumer = stream.consumers.entry(name.clone()).or_insert_with(|| Consumer {
            name,
            config,
            created: now(),
            next_seq,
            delivered: 0,
            ack_pending: BTreeMap::new(),
            redeliveries: VecDeque::new(),
            num_redelivered: 0,
        });
        Ok(consumer.info(stream_name, &stream.messages))
    }

    fn next(
        &mut self,
        stream_name: &str,
        consumer_name: &str,
        body: &[u8],
        reply: &str,
        origin: usize,
    ) -> Vec<Outgoing> {
        let request: Value = serde_json::from_slice(body).unwrap_or_else(|_| json!({}));
        let batch = request["batch"].as_u64().unwrap_or(1).max(1) as usize;
        let no_wait = request["no_wait"].as_bool().unwrap_or(false);
        let expires = Duration::from_nanos(request["expires"].as_u64().unwrap_or(0));

        let mut out = match self.deliver(stream_name, consumer_name, reply, batch) {
            Ok(out) => out,
            Err(status) => return vec![status],
        };

        if out.len() < batch {
            if no_wait {
                out.push(Outgoing::status(reply, 404, "No Messages"));
            } else if expires.is_zero() {
                out.push(Outgoing::status(reply, 408, "Request Timeout"));
            } else {
                log::debug!("holding pull on {} open for {:?}", reply, expires);
                self.waiting.push(WaitingPull {
                    stream: stream_name.to_string(),
                    consumer: consumer_name.to_string(),
                    reply: reply.to_string(),
                    batch: batch - out.len(),
                    client: origin,
                    deadline: Instant::now() + expires,
                });
            }
        }
        out
    }

    /// Feeds open pull requests with messages stored since, and expires the
    /// ones past their deadline. Requests of clients that are gone are
    /// dropped.
    pub(crate) fn poll_waiting(&mut self, live: impl Fn(usize) -> bool) -> Vec<Outgoing> {
        let now = Instant::now();
        let mut out = Vec::new();
        for mut pull in std::mem::take(&mut self.waiting) {
            if !live(pull.client) {
                log::debug!("dropping pull on {} of a departed client", pull.reply);
                continue;
            }
            match self.deliver(&pull.stream, &pull.consumer, &pull.reply, pull.batch) {
                Ok(delivered) => {
                    pull.batch -= delivered.len();
                    out.extend(delivered);
                }
                Err(status) => {
                    out.push(status);
                    continue;
                }
            }
            if pull.batch == 0 {
                continue;
            }
            if now >= pull.deadline {
                out.push(Outgoing::status(&pull.reply, 408, "Request Timeout"));
                continue;
            }
            self.waiting.push(pull);
        }
        out
    }

    pub(crate) fn forget_waiting(&mut self) {
        self.waiting.clear();
    }

    /// Hands out up to `batch` messages to the pull request answered on
    /// `reply`, or the status message for a missing stream or consumer.
    fn deliver(
        &mut self,
        stream_name: &str,
        consumer_name: &str,
        reply: &str,
        batch: usize,
    ) -> Result<Vec<Outgoing>, Outgoing> {
        let Stream {
            messages, consumers, ..
        } = match self.streams.get_mut(stream_name) {
            Some(stream) => stream,
            None => return Err(Outgoing::status(reply, 404, "Stream Not Found")),
        };
        let consumer = match consumers.get_mut(consumer_name) {
            Some(consumer) => consumer,
            None => return Err(Outgoing::status(reply, 404, "Consumer Not Found")),
        };

        let mut out = Vec::new();
        while out.len() < batch {
            let seq = match consumer.redeliveries.pop_front() {
                Some(seq) => seq,
                None => match consumer.next_new(messages) {
                    Some(seq) => seq,
                    None => break,
                },
            };
            consumer.delivered += 1;
            let deliveries = if consumer.acks() {
                let cseq = consumer.delivered;
                let entry = consumer.ack_pending.entry(seq).or_insert((cseq, 0));
                entry.0 = cseq;
                entry.1 += 1;
                entry.1
            } else {
                1
            };
            if deliveries > 1 {
                consumer.num_redelivered += 1;
            }

            let stored = &messages[seq as usize - 1];
            let ack_subject = format!(
                "{}{}.{}.{}.{}.{}.{}.{}",
                ACK_PREFIX,
                stream_name,
                consumer_name,
                deliveries,
                seq,
                consumer.delivered,
                unix_nanos(),
                consumer.num_pending(messages)
            );
            out.push(Outgoing {
                subject: stored.subject.clone(),
                inbox: Some(reply.to_string()),
                reply: Some(ack_subject),
                headers: stored.headers.clone(),
                body: stored.body.clone(),
                origin: 0,
                no_responders: false,
            });
        }
        Ok(out)
    }
}

fn stream_name(stream: &Stream) -> String {
    stream.config["name"].as_str().unwrap_or_default().to_string()
}

impl Outgoing {
    pub(crate) fn reply(subject: &str, body: Vec<u8>) -> Outgoing {
        Outgoing {
            subject: subject.to_string(),
            inbox: None,
            reply: None,
            headers: None,
            body,
            origin: 0,
            no_responders: false,
        }
    }

    pub(crate) fn status(subject: &str, code: u16, description: &str) -> Outgoing {
        Outgoing {
            headers: Some(status_headers(code, description)),
            ..Outgoing::reply(subject, Vec::new())
        }
    }
}
