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

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace};
use parking_lot::Mutex;

use super::{BatchOptions, ConsumerConfig, ConsumerInfo, JetStream};
use crate::client::PendingPull;
use crate::error::{Error, ErrorKind, Result};
use crate::message::{Message, Payload};

/// Stops a running [`Consumer::handle`] once the current handler returns.
///
/// Clones share the same flag, so a handler can capture one and interrupt
/// the loop that is calling it.
#[derive(Debug, Clone, Default)]
pub struct Interrupter(Arc<AtomicBool>);

impl Interrupter {
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A pull consumer bound to a stream.
///
/// Messages are only requested and delivered inside [`Consumer::handle`]
/// and [`Consumer::fetch`], a batch at a time. Nothing is acknowledged on
/// the handler's behalf: with an explicit ack policy the handler returns an
/// [`AckKind`](crate::AckKind) as its reply, or acks through the client.
#[derive(Debug)]
pub struct Consumer<'a> {
    js: &'a mut JetStream,
    stream: String,
    name: String,
    config: ConsumerConfig,
    batching: usize,
    iterations: usize,
    delay: Duration,
    expires: Duration,
    interrupter: Interrupter,
}

impl<'a> Consumer<'a> {
    pub(crate) fn new(js: &'a mut JetStream, stream: &str, config: ConsumerConfig) -> Consumer<'a> {
        Consumer {
            js,
            stream: stream.to_string(),
            name: config.durable_name.clone().unwrap_or_default(),
            config,
            batching: 1,
            iterations: 1,
            delay: Duration::from_secs(1),
            expires: Duration::default(),
            interrupter: Interrupter::default(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// The consumer name. Empty for an ephemeral consumer until it has been
    /// created.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Messages asked for in every pull request. Defaults to 1.
    pub fn batching(mut self, batching: usize) -> Self {
        self.batching = batching.max(1);
        self
    }

    /// Pull requests made by one [`Consumer::handle`] call. Defaults to 1.
    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    /// Pause after an iteration that delivered nothing, if more iterations
    /// remain. Defaults to 1s.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Long-poll for up to `expires` instead of the default `no_wait` pull.
    ///
    /// While such a request is open the connection's idle timeout is
    /// suspended.
    pub fn expires(mut self, expires: Duration) -> Self {
        self.expires = expires;
        self
    }

    /// A handle that stops the running [`Consumer::handle`] call.
    pub fn interrupter(&self) -> Interrupter {
        self.interrupter.clone()
    }

    /// Stops after the handler currently running returns.
    pub fn interrupt(&self) {
        self.interrupter.interrupt();
    }

    /// Creates the consumer on the server with this handle's config.
    pub fn create(&mut self) -> Result<ConsumerInfo> {
        let info = self.js.create_consumer(&self.stream, &self.config)?;
        self.name = info.name.clone();
        Ok(info)
    }

    pub fn info(&mut self) -> Result<ConsumerInfo> {
        let name = self.require_name()?;
        self.js.consumer_info(&self.stream, &name)
    }

    pub fn exists(&mut self) -> Result<bool> {
        if self.name.is_empty() {
            return Ok(false);
        }
        let name = self.name.clone();
        self.js.consumer_exists(&self.stream, &name)
    }

    pub fn delete(&mut self) -> Result<bool> {
        let name = self.require_name()?;
        self.js.delete_consumer(&self.stream, &name)
    }

    /// Pulls up to `iterations` batches, running `handler` for every
    /// message delivered, and returns how many messages were handled.
    ///
    /// A `Some` returned by the handler is published to the message's reply
    /// subject, which is how a handler acks.
    pub fn handle<F>(&mut self, handler: F) -> Result<usize>
    where
        F: FnMut(&Message) -> Option<Payload>,
    {
        self.handle_with_empty(handler, || {})
    }

    /// Like [`Consumer::handle`], calling `on_empty` for every iteration the
    /// server had nothing to deliver.
    pub fn handle_with_empty<F, E>(&mut self, mut handler: F, mut on_empty: E) -> Result<usize>
    where
        F: FnMut(&Message) -> Option<Payload>,
        E: FnMut(),
    {
        self.require_name()?;
        self.interrupter.reset();

        let mut processed = 0;
        for iteration in 0..self.iterations {
            let received = self.pull(self.batching, &mut handler)?;
            processed += received;

            if self.interrupter.is_interrupted() {
                debug!("consumer {} interrupted", self.name);
                break;
            }

            if received == 0 {
                on_empty();
                if iteration + 1 < self.iterations && !self.delay.is_zero() {
                    trace!("consumer {} idle, sleeping {:?}", self.name, self.delay);
                    thread::sleep(self.delay);
                }
            }
        }
        Ok(processed)
    }

    /// A single pull request for up to `batch` messages, returned instead of
    /// handled. Nothing is acked.
    pub fn fetch(&mut self, batch: usize) -> Result<Vec<Message>> {
        self.require_name()?;
        self.interrupter.reset();

        let mut messages = Vec::new();
        self.pull(batch.max(1), &mut |msg: &Message| {
            messages.push(msg.clone());
            None
        })?;
        Ok(messages)
    }

    fn require_name(&self) -> Result<String> {
        if self.name.is_empty() {
            return Err(Error::with_source(
                ErrorKind::InvalidArgument,
                "the consumer has no name, create it first",
            ));
        }
        Ok(self.name.clone())
    }

    /// Sends one pull request and drains its answer. Stops at `batch`
    /// messages, at the empty status sentinel, at the deadline or when
    /// interrupted.
    fn pull<F>(&mut self, batch: usize, handler: &mut F) -> Result<usize>
    where
        F: FnMut(&Message) -> Option<Payload>,
    {
        let subject = format!(
            "{}CONSUMER.MSG.NEXT.{}.{}",
            self.js.api_prefix(),
            self.stream,
            self.name
        );
        let request = Payload::from_json(&BatchOptions {
            batch,
            no_wait: self.expires.is_zero(),
            expires: self.expires,
        })?;

        let client = self.js.client_mut();
        let inbox = client.new_inbox();
        let queue: Arc<Mutex<VecDeque<Message>>> = Arc::new(Mutex::new(VecDeque::new()));
        let sid = {
            let queue = queue.clone();
            client.subscribe(&inbox, move |msg| {
                queue.lock().push_back(msg.clone());
                None
            })?
        };

        client.set_pending_pull(Some(PendingPull {
            subject: subject.clone(),
            reply_to: inbox.clone(),
            payload: request.clone(),
        }));
        if !self.expires.is_zero() {
            client.prolongate(self.expires);
        }
        let result = self.drain(&subject, &inbox, request, batch, &queue, handler);

        let client = self.js.client_mut();
        client.set_pending_pull(None);
        // A closed client has no subscription left to remove.
        let unsubscribed = client.unsubscribe_sid(sid);
        let received = result?;
        if let Err(err) = unsubscribed {
            if err.kind() != ErrorKind::Closed {
                return Err(err);
            }
        }
        Ok(received)
    }

    fn drain<F>(
        &mut self,
        subject: &str,
        inbox: &str,
        request: Payload,
        batch: usize,
        queue: &Mutex<VecDeque<Message>>,
        handler: &mut F,
    ) -> Result<usize>
    where
        F: FnMut(&Message) -> Option<Payload>,
    {
        let client = self.js.client_mut();
        let deadline = Instant::now() + client.options().timeout.max(self.expires);
        let auto_reply = client.options().auto_reply;
        client.publish_with_reply(subject, inbox, request)?;

        let mut received = 0;
        while received < batch {
            let next = queue.lock().pop_front();
            let message = match next {
                Some(message) => message,
                None => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!("pull on {} expired with {} of {}", subject, received, batch);
                        break;
                    }
                    client.process(deadline - now)?;
                    continue;
                }
            };

            if message.is_end_of_pull() {
                trace!(
                    "pull on {} ended with status {:?}",
                    subject,
                    message.status_code()
                );
                break;
            }

            received += 1;
            if let Some(reply) = handler(&message) {
                if let (true, Some(reply_to)) = (auto_reply, message.reply_to.as_deref()) {
                    client.publish(reply_to, reply)?;
                }
            }

            if self.interrupter.is_interrupted() {
                break;
            }
        }
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupter_clones_share_state() {
        let interrupter = Interrupter::default();
        let handle = interrupter.clone();
        assert!(!interrupter.is_interrupted());

        handle.interrupt();
        assert!(interrupter.is_interrupted());

        interrupter.reset();
        assert!(!handle.is_interrupted());
    }
}
