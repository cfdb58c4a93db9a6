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
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::serde::rfc3339;

use crate::error::{Error, ErrorKind, Result};

/// A UTC time
pub type DateTime = time::OffsetDateTime;

fn is_default<T: Default + PartialEq>(t: &T) -> bool {
    t == &T::default()
}

/// Gives a closed policy enum its wire name, a validating `FromStr` and
/// `Display`.
macro_rules! policy_names {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// The name used for this value on the wire.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<$name> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::with_source(
                        ErrorKind::InvalidArgument,
                        format!("invalid {} {:?}", $label, other),
                    )),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// `DeliverPolicy` determines how the consumer should select the first message to deliver.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum DeliverPolicy {
    /// The oldest messages still present in the stream. This is the default.
    #[default]
    #[serde(rename = "all")]
    All,
    /// Start with the last message in the stream.
    #[serde(rename = "last")]
    Last,
    /// Only messages stored after the consumer was created.
    #[serde(rename = "new")]
    New,
    /// Start at `opt_start_seq`.
    #[serde(rename = "by_start_sequence")]
    ByStartSequence,
    /// Start at the first message stored at or after `opt_start_time`.
    #[serde(rename = "by_start_time")]
    ByStartTime,
    /// The last message for every subject in the stream.
    #[serde(rename = "last_per_subject")]
    LastPerSubject,
}

policy_names!(DeliverPolicy, "deliver policy", {
    All => "all",
    Last => "last",
    New => "new",
    ByStartSequence => "by_start_sequence",
    ByStartTime => "by_start_time",
    LastPerSubject => "last_per_subject",
});

/// Determines whether messages will be acknowledged individually,
/// in aggregate, or not at all.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    /// All messages will be individually acknowledged. This is the default.
    #[default]
    #[serde(rename = "explicit")]
    Explicit,
    /// No messages are acknowledged.
    #[serde(rename = "none")]
    None,
    /// Acknowledging a message acknowledges every message before it.
    #[serde(rename = "all")]
    All,
}

policy_names!(AckPolicy, "ack policy", {
    Explicit => "explicit",
    None => "none",
    All => "all",
});

/// `ReplayPolicy` controls whether messages are sent to a consumer
/// as quickly as possible or at the rate they were received.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ReplayPolicy {
    /// As fast as possible. This is the default.
    #[default]
    #[serde(rename = "instant")]
    Instant,
    /// At the rate they were originally received.
    #[serde(rename = "original")]
    Original,
}

policy_names!(ReplayPolicy, "replay policy", {
    Instant => "instant",
    Original => "original",
});

/// `RetentionPolicy` determines how messages in a stream are retained.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Messages are kept until a limit is reached. This is the default.
    #[default]
    #[serde(rename = "limits")]
    Limits,
    /// Messages are kept while there are consumers interested in them.
    #[serde(rename = "interest")]
    Interest,
    /// Messages are removed once acknowledged by a consumer.
    #[serde(rename = "workqueue")]
    WorkQueue,
}

policy_names!(RetentionPolicy, "retention policy", {
    Limits => "limits",
    Interest => "interest",
    WorkQueue => "workqueue",
});

/// `DiscardPolicy` determines how we proceed when limits of messages or bytes are hit.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum DiscardPolicy {
    /// Remove older messages to make room. This is the default.
    #[default]
    #[serde(rename = "old")]
    Old,
    /// Refuse new messages.
    #[serde(rename = "new")]
    New,
}

policy_names!(DiscardPolicy, "discard policy", {
    Old => "old",
    New => "new",
});

/// Determines how messages are stored for retention.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// Files on disk. This is the default.
    #[default]
    #[serde(rename = "file")]
    File,
    /// Memory only.
    #[serde(rename = "memory")]
    Memory,
}

policy_names!(StorageType, "storage type", {
    File => "file",
    Memory => "memory",
});

/// Configuration for a pull consumer.
///
/// A consumer with `durable_name` set is remembered by the server and
/// resumes where it left off; without one it is ephemeral. The config is
/// fixed once the consumer is created, changing it means creating the
/// consumer again.
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ConsumerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durable_name: Option<String>,
    /// A short description of the purpose of this consumer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub deliver_policy: DeliverPolicy,
    /// Used with `DeliverPolicy::ByStartSequence`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opt_start_seq: Option<u64>,
    /// Used with `DeliverPolicy::ByStartTime`.
    #[serde(skip_serializing_if = "is_default", with = "rfc3339::option")]
    pub opt_start_time: Option<DateTime>,
    pub ack_policy: AckPolicy,
    /// How long to allow messages to remain un-acknowledged before attempting redelivery
    #[serde(with = "serde_nanos", skip_serializing_if = "is_default")]
    pub ack_wait: Duration,
    /// Maximum number of times a specific message will be delivered.
    #[serde(skip_serializing_if = "is_default")]
    pub max_deliver: i64,
    /// Only deliver messages on matching subjects. Supports wildcards.
    #[serde(skip_serializing_if = "is_default")]
    pub filter_subject: String,
    pub replay_policy: ReplayPolicy,
    /// The maximum number of waiting pull requests.
    #[serde(skip_serializing_if = "is_default")]
    pub max_waiting: i64,
    /// The maximum number of unacknowledged messages in flight before the
    /// server pauses delivery.
    #[serde(skip_serializing_if = "is_default")]
    pub max_ack_pending: i64,
    /// Maximum size of a request batch
    #[serde(skip_serializing_if = "is_default")]
    pub max_batch: i64,
    /// Maximum value for request expiration
    #[serde(with = "serde_nanos", skip_serializing_if = "is_default")]
    pub max_expires: Duration,
    /// Threshold for ephemeral consumer inactivity
    #[serde(with = "serde_nanos", skip_serializing_if = "is_default")]
    pub inactive_threshold: Duration,
}

impl From<&str> for ConsumerConfig {
    fn from(s: &str) -> ConsumerConfig {
        ConsumerConfig {
            durable_name: Some(s.to_string()),
            ..Default::default()
        }
    }
}

impl From<&ConsumerConfig> for ConsumerConfig {
    fn from(cc: &ConsumerConfig) -> ConsumerConfig {
        cc.clone()
    }
}

/// `StreamConfig` determines the properties for a stream.
/// If no subjects are given the name will be used as the only subject.
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    /// Must not contain spaces, tabs or periods.
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
    pub retention: RetentionPolicy,
    /// -1 for unlimited.
    pub max_consumers: i32,
    pub max_msgs: i64,
    pub max_bytes: i64,
    #[serde(with = "serde_nanos")]
    pub max_age: Duration,
    #[serde(skip_serializing_if = "is_default")]
    pub max_msg_size: i32,
    pub storage: StorageType,
    pub discard: DiscardPolicy,
    pub num_replicas: usize,
    #[serde(skip_serializing_if = "is_default")]
    pub no_ack: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&str> for StreamConfig {
    fn from(s: &str) -> StreamConfig {
        StreamConfig {
            name: s.to_string(),
            ..Default::default()
        }
    }
}

impl From<&StreamConfig> for StreamConfig {
    fn from(sc: &StreamConfig) -> StreamConfig {
        sc.clone()
    }
}

/// Shows config and current state for this stream.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub config: StreamConfig,
    /// The time that this stream was created
    #[serde(with = "rfc3339")]
    pub created: DateTime,
    pub state: StreamState,
}

/// information about the given stream.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct StreamState {
    pub messages: u64,
    pub bytes: u64,
    pub first_seq: u64,
    pub last_seq: u64,
    pub consumer_count: usize,
}

/// Information about a consumer
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ConsumerInfo {
    /// The stream being consumed
    pub stream_name: String,
    /// The consumer's unique name
    pub name: String,
    /// The time the consumer was created
    #[serde(with = "rfc3339")]
    pub created: DateTime,
    pub config: ConsumerConfig,
    /// Statistics for delivered messages
    #[serde(default)]
    pub delivered: SequencePair,
    /// Statistics for acknowledged messages
    #[serde(default)]
    pub ack_floor: SequencePair,
    /// The difference between delivered and acknowledged messages
    #[serde(default)]
    pub num_ack_pending: usize,
    #[serde(default)]
    pub num_redelivered: usize,
    /// Pull requests waiting for messages.
    #[serde(default)]
    pub num_waiting: usize,
    /// Messages not yet delivered to this consumer.
    #[serde(default)]
    pub num_pending: u64,
}

/// A consumer and stream sequence pair.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct SequencePair {
    pub consumer_seq: u64,
    pub stream_seq: u64,
}

/// `PublishAck` is an acknowledgment received after successfully publishing a message.
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PublishAck {
    /// Name of stream the message was published to.
    pub stream: String,
    /// Sequence number the message was published in.
    #[serde(rename = "seq")]
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    /// True if the server discarded the message as a duplicate.
    #[serde(default, skip_serializing_if = "is_default")]
    pub duplicate: bool,
}

/// Various limits imposed on a particular account.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct AccountLimits {
    /// Maximum memory for this account (-1 if no limit)
    pub max_memory: i64,
    /// Maximum storage for this account (-1 if no limit)
    pub max_storage: i64,
    /// Maximum streams for this account (-1 if no limit)
    pub max_streams: i64,
    /// Maximum consumers for this account (-1 if no limit)
    pub max_consumers: i64,
}

/// contains info about the `JetStream` usage from the current account.
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AccountInfo {
    pub memory: i64,
    pub storage: i64,
    pub streams: i64,
    pub consumers: i64,
    pub api: ApiStats,
    pub limits: AccountLimits,
}

/// reports on API calls to `JetStream` for this account.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ApiStats {
    pub total: u64,
    pub errors: u64,
}

/// Body of a `CONSUMER.MSG.NEXT` pull request.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// The number of messages that are being requested to be delivered.
    pub batch: usize,
    /// How long the server keeps the request open waiting for messages.
    #[serde(default, with = "serde_nanos", skip_serializing_if = "is_default")]
    pub expires: Duration,
    /// Answer at once, with a 404 status message if nothing is available.
    #[serde(default, skip_serializing_if = "is_default")]
    pub no_wait: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CreateConsumerRequest {
    pub stream_name: String,
    pub config: ConsumerConfig,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeleteResponse {
    pub success: bool,
}

/// Error document returned by the JetStream API.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub(crate) struct ApiError {
    pub code: u16,
    #[serde(default)]
    pub err_code: u64,
    #[serde(default)]
    pub description: Option<String>,
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Error {
        let kind = ErrorKind::JetStream {
            code: err.code,
            err_code: err.err_code,
        };
        match err.description {
            Some(description) => Error::with_source(kind, description),
            None => Error::new(kind),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ApiResponse<T> {
    Err { error: ApiError },
    Ok(T),
}

impl<T> ApiResponse<T> {
    pub(crate) fn into_result(self) -> Result<T> {
        match self {
            ApiResponse::Ok(value) => Ok(value),
            ApiResponse::Err { error } => Err(error.into()),
        }
    }
}
