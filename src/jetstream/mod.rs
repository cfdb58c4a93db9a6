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

//! JetStream stream and consumer management on top of request/reply.
//!
//! Every operation is a [`Client::dispatch`] to a `$JS.API.` subject. The
//! API answers either with the requested document or with
//! `{"error": {"code", "err_code", "description"}}`, which surfaces as
//! [`ErrorKind::JetStream`].
//!
//! # Example
//!
//! ```no_run
//! # fn main() -> nats_poll::Result<()> {
//! use nats_poll::jetstream::{self, ConsumerConfig, StreamConfig};
//! use nats_poll::{AckKind, Payload};
//!
//! let client = nats_poll::connect("demo.nats.io")?;
//! let mut js = jetstream::new(client);
//!
//! js.create_stream(StreamConfig {
//!     name: "ORDERS".to_string(),
//!     subjects: vec!["orders.>".to_string()],
//!     ..Default::default()
//! })?;
//! js.publish("orders.new", "order 1")?;
//!
//! let mut consumer = js.consumer("ORDERS", ConsumerConfig::from("worker"));
//! consumer.create()?;
//! let handled = consumer.batching(10).handle(|msg| {
//!     println!("{:?}", msg.payload.as_str());
//!     Some(Payload::from(AckKind::Ack))
//! })?;
//! println!("handled {}", handled);
//! # Ok(())
//! # }
//! ```

use std::fmt::{self, Debug};
use std::time::Duration;

use log::debug;
use serde::de::DeserializeOwned;

use crate::error::{ErrorKind, Result};
use crate::message::Payload;
use crate::Client;

mod consumer;
mod types;

pub use consumer::{Consumer, Interrupter};
pub use types::*;

/// `JetStreamOptions` selects the API namespace and the request deadline.
#[derive(Clone)]
pub struct JetStreamOptions {
    pub(crate) api_prefix: String,
    pub(crate) has_domain: bool,
    pub(crate) timeout: Duration,
}

impl Debug for JetStreamOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entry(&"api_prefix", &self.api_prefix)
            .entry(&"has_domain", &self.has_domain)
            .entry(&"timeout", &self.timeout)
            .finish()
    }
}

impl Default for JetStreamOptions {
    fn default() -> JetStreamOptions {
        JetStreamOptions {
            api_prefix: "$JS.API.".to_string(),
            has_domain: false,
            timeout: Duration::from_secs(5),
        }
    }
}

impl JetStreamOptions {
    /// `Options` for `JetStream` operations.
    ///
    /// # Example
    ///
    /// ```
    /// let options = nats_poll::jetstream::JetStreamOptions::new();
    /// ```
    pub fn new() -> JetStreamOptions {
        JetStreamOptions::default()
    }

    /// Set a custom `JetStream` API prefix.
    ///
    /// # Example
    ///
    /// ```
    /// let options = nats_poll::jetstream::JetStreamOptions::new()
    ///     .api_prefix("some_exported_prefix".to_string());
    /// ```
    pub fn api_prefix(mut self, mut api_prefix: String) -> Self {
        if !api_prefix.ends_with('.') {
            api_prefix.push('.');
        }

        self.api_prefix = api_prefix;
        self
    }

    /// Set a custom `JetStream` API prefix from a domain.
    ///
    /// # Example
    ///
    /// ```
    /// let options = nats_poll::jetstream::JetStreamOptions::new().domain("hub");
    /// ```
    pub fn domain(mut self, domain: &str) -> Self {
        if domain.is_empty() {
            self.has_domain = false;
            self.api_prefix("$JS.API.".to_string())
        } else {
            self.has_domain = true;
            self.api_prefix(format!("$JS.{}.API", domain))
        }
    }

    /// How long an API request may wait for its answer. Defaults to 5s.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Creates a `JetStream` context with default options.
pub fn new(client: Client) -> JetStream {
    JetStream::new(client, JetStreamOptions::default())
}

/// A `JetStream` context, owning the client it talks through.
#[derive(Debug)]
pub struct JetStream {
    client: Client,
    options: JetStreamOptions,
}

impl JetStream {
    /// Create a new `JetStream` context.
    pub fn new(client: Client, options: JetStreamOptions) -> Self {
        JetStream { client, options }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The underlying client, for core NATS traffic between API calls.
    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }

    pub fn into_client(self) -> Client {
        self.client
    }

    pub(crate) fn api_prefix(&self) -> &str {
        &self.options.api_prefix
    }

    /// Query the account's `JetStream` usage and limits.
    pub fn account_info(&mut self) -> Result<AccountInfo> {
        let subject = format!("{}INFO", self.api_prefix());
        self.js_request(&subject, Payload::default())
    }

    /// Create a `JetStream` stream.
    pub fn create_stream<S>(&mut self, stream_config: S) -> Result<StreamInfo>
    where
        StreamConfig: From<S>,
    {
        let config: StreamConfig = stream_config.into();
        validate_name("stream", &config.name)?;
        let subject = format!("{}STREAM.CREATE.{}", self.api_prefix(), config.name);
        let request = Payload::from_json(&config)?;
        self.js_request(&subject, request)
    }

    /// Alias of [`JetStream::create_stream`].
    pub fn add_stream<S>(&mut self, stream_config: S) -> Result<StreamInfo>
    where
        StreamConfig: From<S>,
    {
        self.create_stream(stream_config)
    }

    /// Query stream information.
    pub fn stream_info(&mut self, stream: &str) -> Result<StreamInfo> {
        validate_name("stream", stream)?;
        let subject = format!("{}STREAM.INFO.{}", self.api_prefix(), stream);
        self.js_request(&subject, Payload::default())
    }

    /// Delete a stream and everything stored in it.
    pub fn delete_stream(&mut self, stream: &str) -> Result<bool> {
        validate_name("stream", stream)?;
        let subject = format!("{}STREAM.DELETE.{}", self.api_prefix(), stream);
        let response: DeleteResponse = self.js_request(&subject, Payload::default())?;
        Ok(response.success)
    }

    /// Whether the stream exists. Only a 404 API error counts as "no".
    pub fn stream_exists(&mut self, stream: &str) -> Result<bool> {
        not_found_as_false(self.stream_info(stream))
    }

    /// Publishes a message to a stream and waits for it to be stored.
    ///
    /// Headers on the payload, such as `Nats-Msg-Id`, are sent along.
    pub fn publish(&mut self, subject: &str, payload: impl Into<Payload>) -> Result<PublishAck> {
        self.js_request(subject, payload.into())
    }

    /// Create a consumer on `stream`.
    ///
    /// Durable consumers are created on the durable subject, ephemeral ones
    /// get a name assigned by the server.
    pub fn create_consumer<C>(&mut self, stream: &str, config: C) -> Result<ConsumerInfo>
    where
        ConsumerConfig: From<C>,
    {
        validate_name("stream", stream)?;
        let config = ConsumerConfig::from(config);
        let subject = match config.durable_name.as_deref() {
            Some(durable) => {
                validate_name("consumer", durable)?;
                format!(
                    "{}CONSUMER.DURABLE.CREATE.{}.{}",
                    self.api_prefix(),
                    stream,
                    durable
                )
            }
            None => format!("{}CONSUMER.CREATE.{}", self.api_prefix(), stream),
        };

        let request = Payload::from_json(&CreateConsumerRequest {
            stream_name: stream.to_string(),
            config,
        })?;
        self.js_request(&subject, request)
    }

    /// Alias of [`JetStream::create_consumer`].
    pub fn add_consumer<C>(&mut self, stream: &str, config: C) -> Result<ConsumerInfo>
    where
        ConsumerConfig: From<C>,
    {
        self.create_consumer(stream, config)
    }

    /// Query consumer information.
    pub fn consumer_info(&mut self, stream: &str, consumer: &str) -> Result<ConsumerInfo> {
        validate_name("stream", stream)?;
        validate_name("consumer", consumer)?;
        let subject = format!(
            "{}CONSUMER.INFO.{}.{}",
            self.api_prefix(),
            stream,
            consumer
        );
        self.js_request(&subject, Payload::default())
    }

    /// Delete a consumer.
    pub fn delete_consumer(&mut self, stream: &str, consumer: &str) -> Result<bool> {
        validate_name("stream", stream)?;
        validate_name("consumer", consumer)?;
        let subject = format!(
            "{}CONSUMER.DELETE.{}.{}",
            self.api_prefix(),
            stream,
            consumer
        );
        let response: DeleteResponse = self.js_request(&subject, Payload::default())?;
        Ok(response.success)
    }

    /// Whether the consumer exists. Only a 404 API error counts as "no".
    pub fn consumer_exists(&mut self, stream: &str, consumer: &str) -> Result<bool> {
        not_found_as_false(self.consumer_info(stream, consumer))
    }

    /// A pull consumer handle for `stream`. Nothing is sent to the server
    /// until [`Consumer::create`] or [`Consumer::handle`] is called.
    pub fn consumer<C>(&mut self, stream: &str, config: C) -> Consumer<'_>
    where
        ConsumerConfig: From<C>,
    {
        Consumer::new(self, stream, ConsumerConfig::from(config))
    }

    pub(crate) fn js_request<Res>(&mut self, subject: &str, request: Payload) -> Result<Res>
    where
        Res: DeserializeOwned,
    {
        debug!("jetstream request on {}", subject);
        let timeout = self.options.timeout;
        let message = self.client.dispatch(subject, request, Some(timeout))?;
        let response: ApiResponse<Res> = message.payload.decode()?;
        response.into_result()
    }
}

fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(crate::Error::with_source(
            ErrorKind::InvalidArgument,
            format!("the {} name must not be empty", what),
        ));
    }
    if name.contains(|c: char| c == '.' || c == '*' || c == '>' || c.is_whitespace()) {
        return Err(crate::Error::with_source(
            ErrorKind::InvalidArgument,
            format!("invalid {} name {:?}", what, name),
        ));
    }
    Ok(())
}

fn not_found_as_false<T>(result: Result<T>) -> Result<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(err) => match err.kind() {
            ErrorKind::JetStream { code: 404, .. } => Ok(false),
            _ => Err(err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_prefix() {
        let options = JetStreamOptions::new().domain("hub");
        assert_eq!(options.api_prefix, "$JS.hub.API.");
        assert!(options.has_domain);

        let options = options.domain("");
        assert_eq!(options.api_prefix, "$JS.API.");
        assert!(!options.has_domain);
    }

    #[test]
    fn api_prefix_gets_trailing_dot() {
        let options = JetStreamOptions::new().api_prefix("$JS.exported".to_string());
        assert_eq!(options.api_prefix, "$JS.exported.");
    }

    #[test]
    fn names_are_validated() {
        assert!(validate_name("stream", "ORDERS").is_ok());
        for bad in ["", "OR.DERS", "ORD ERS", "*", ">"] {
            let err = validate_name("stream", bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn only_404_means_missing() {
        let missing: Result<()> = Err(ErrorKind::JetStream {
            code: 404,
            err_code: 10059,
        }
        .into());
        assert!(!not_found_as_false(missing).unwrap());

        let broken: Result<()> = Err(ErrorKind::Timeout.into());
        assert_eq!(
            not_found_as_false(broken).unwrap_err().kind(),
            ErrorKind::Timeout
        );
        assert!(not_found_as_false(Ok(())).unwrap());
    }
}
