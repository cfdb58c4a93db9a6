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

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::connection::{Connection, State};
use crate::error::{Error, ErrorKind, Result};
use crate::message::{Message, Payload};
use crate::proto::Op;
use crate::{IntoServerList, Options, Server, ServerInfo};

/// A subscription handler. Its return value is published to the reply
/// subject of the message unless auto-reply is turned off.
pub type Handler = Box<dyn FnMut(&Message) -> Option<Payload> + Send + 'static>;

struct Subscription {
    subject: String,
    queue_group: Option<String>,
    handler: Handler,
    /// Removed before its handler runs, so a redelivery cannot fire it twice.
    one_shot: bool,
}

/// A pull request that has to be sent again after a reconnect.
#[derive(Debug, Clone)]
pub(crate) struct PendingPull {
    pub(crate) subject: String,
    pub(crate) reply_to: String,
    pub(crate) payload: Payload,
}

/// A synchronous, poll-driven NATS client.
///
/// Nothing happens in the background: messages are read and handlers run
/// only inside [`Client::process`] and the calls built on it, on the calling
/// thread and in the order messages arrive.
pub struct Client {
    conn: Connection,
    options: Arc<Options>,
    subscriptions: HashMap<u64, Subscription>,
    pending_pull: Option<PendingPull>,
    reconnects: u64,
    closed: bool,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("connection", &self.conn)
            .field("subscriptions", &self.subscriptions.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Client {
    pub(crate) fn connect_with_options<I: IntoServerList>(
        urls: I,
        options: Options,
    ) -> Result<Client> {
        let options = Arc::new(options);
        let conn = Connection::connect(urls.into_server_list()?, options.clone())?;
        Ok(Client {
            conn,
            options,
            subscriptions: HashMap::new(),
            pending_pull: None,
            reconnects: 0,
            closed: false,
        })
    }

    /// Information the current server sent in its latest `INFO`.
    pub fn server_info(&self) -> &ServerInfo {
        self.conn.server_info()
    }

    pub fn state(&self) -> State {
        self.conn.state()
    }

    /// Failover bookkeeping of the server pool. Empty when the client was
    /// given a single URL.
    pub fn servers(&self) -> &[Server] {
        self.conn.servers()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// A fresh, unique inbox subject under the configured prefix.
    pub fn new_inbox(&self) -> String {
        format!("{}.{}", self.options.inbox_prefix, nuid::next())
    }

    fn check_closed(&self) -> Result<()> {
        if self.closed {
            Err(Error::new(ErrorKind::Closed))
        } else {
            Ok(())
        }
    }

    /// Writes an operation, reconnecting once on transport failure.
    fn send(&mut self, op: &Op) -> Result<()> {
        self.check_closed()?;
        match self.conn.write_op(op) {
            Err(err) if err.is_transport() => {
                self.recover(err)?;
                self.conn.write_op(op)
            }
            res => res,
        }
    }

    /// Reconnects and replays every live subscription, and the outstanding
    /// pull request if there is one.
    fn recover(&mut self, cause: Error) -> Result<()> {
        let mut cause = cause;
        loop {
            self.conn.reconnect(cause)?;
            self.reconnects += 1;
            match self.replay() {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transport() => cause = err,
                Err(err) => return Err(err),
            }
        }
    }

    fn replay(&mut self) -> Result<()> {
        for (sid, sub) in &self.subscriptions {
            self.conn.write_op(&Op::Sub {
                subject: sub.subject.clone(),
                queue_group: sub.queue_group.clone(),
                sid: *sid,
            })?;
        }
        log::debug!("replayed {} subscriptions", self.subscriptions.len());

        if let Some(pull) = &self.pending_pull {
            log::debug!("re-arming pull request on {}", pull.subject);
            self.conn.write_op(&Op::Pub {
                subject: pull.subject.clone(),
                reply_to: Some(pull.reply_to.clone()),
                payload: pull.payload.clone(),
            })?;
        }
        Ok(())
    }

    /// Publishes a message. Returns once it is written to the socket, no
    /// acknowledgement is awaited.
    ///
    /// # Example
    /// ```no_run
    /// # fn main() -> nats_poll::Result<()> {
    /// let mut client = nats_poll::connect("demo.nats.io")?;
    /// client.publish("foo", "Hello World!")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn publish(&mut self, subject: &str, payload: impl Into<Payload>) -> Result<()> {
        self.send(&Op::Pub {
            subject: subject.to_string(),
            reply_to: None,
            payload: payload.into(),
        })
    }

    /// Publishes a message with a reply subject.
    pub fn publish_with_reply(
        &mut self,
        subject: &str,
        reply_to: &str,
        payload: impl Into<Payload>,
    ) -> Result<()> {
        self.send(&Op::Pub {
            subject: subject.to_string(),
            reply_to: Some(reply_to.to_string()),
            payload: payload.into(),
        })
    }

    fn next_sid(&self) -> u64 {
        loop {
            let sid = fastrand::u64(1..);
            if !self.subscriptions.contains_key(&sid) {
                return sid;
            }
        }
    }

    fn add_subscription(
        &mut self,
        subject: &str,
        queue_group: Option<&str>,
        handler: Handler,
        one_shot: bool,
    ) -> Result<u64> {
        let sid = self.next_sid();
        self.send(&Op::Sub {
            subject: subject.to_string(),
            queue_group: queue_group.map(str::to_string),
            sid,
        })?;
        self.subscriptions.insert(
            sid,
            Subscription {
                subject: subject.to_string(),
                queue_group: queue_group.map(str::to_string),
                handler,
                one_shot,
            },
        );
        Ok(sid)
    }

    /// Subscribes `handler` to `subject` and returns the subscription id.
    ///
    /// # Example
    /// ```no_run
    /// # fn main() -> nats_poll::Result<()> {
    /// # use std::time::Duration;
    /// let mut client = nats_poll::connect("demo.nats.io")?;
    /// client.subscribe("echo", |msg| Some(msg.payload.clone()))?;
    /// while client.process(Duration::from_secs(1))? {}
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe<F>(&mut self, subject: &str, handler: F) -> Result<u64>
    where
        F: FnMut(&Message) -> Option<Payload> + Send + 'static,
    {
        self.add_subscription(subject, None, Box::new(handler), false)
    }

    /// Subscribes as a member of a queue group: each message goes to one
    /// member of the group only.
    pub fn subscribe_queue<F>(&mut self, subject: &str, queue_group: &str, handler: F) -> Result<u64>
    where
        F: FnMut(&Message) -> Option<Payload> + Send + 'static,
    {
        self.add_subscription(subject, Some(queue_group), Box::new(handler), false)
    }

    /// Removes every subscription on `subject` and returns how many there
    /// were.
    pub fn unsubscribe(&mut self, subject: &str) -> Result<usize> {
        let sids: Vec<u64> = self
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.subject == subject)
            .map(|(sid, _)| *sid)
            .collect();
        for sid in &sids {
            self.unsubscribe_sid(*sid)?;
        }
        Ok(sids.len())
    }

    /// Removes a single subscription. Returns `false` if it was not known.
    pub fn unsubscribe_sid(&mut self, sid: u64) -> Result<bool> {
        if self.subscriptions.remove(&sid).is_none() {
            return Ok(false);
        }
        self.send(&Op::Unsub {
            sid,
            max_msgs: None,
        })?;
        Ok(true)
    }

    /// Reads at most one message, waiting up to `timeout`, and runs the
    /// handler of its subscription.
    ///
    /// Returns `true` when a message was handled. A timeout is not an error.
    /// Transport failures are recovered by reconnecting when enabled.
    pub fn process(&mut self, timeout: Duration) -> Result<bool> {
        self.check_closed()?;
        let op = match self.conn.read_op(timeout) {
            Ok(Some(op)) => op,
            Ok(None) => return Ok(false),
            Err(err) if err.is_transport() => {
                self.recover(err)?;
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        match op {
            Op::Msg {
                subject,
                sid,
                reply_to,
                payload,
            } => self.handle_message(Message::new(subject, sid, reply_to, payload)),
            op => Err(Error::with_source(
                ErrorKind::Protocol,
                format!("unexpected operation: {:?}", op),
            )),
        }
    }

    fn handle_message(&mut self, message: Message) -> Result<bool> {
        let one_shot = match self.subscriptions.get(&message.sid) {
            Some(sub) => sub.one_shot,
            None if self.options.skip_invalid_messages => {
                log::warn!(
                    "dropping message on {} for unknown sid {}",
                    message.subject,
                    message.sid
                );
                return Ok(false);
            }
            None => {
                return Err(Error::with_source(
                    ErrorKind::NoHandler,
                    format!("sid {} on subject {}", message.sid, message.subject),
                ))
            }
        };

        let reply = if one_shot {
            let mut sub = match self.subscriptions.remove(&message.sid) {
                Some(sub) => sub,
                None => return Ok(false),
            };
            self.send(&Op::Unsub {
                sid: message.sid,
                max_msgs: None,
            })?;
            (sub.handler)(&message)
        } else {
            match self.subscriptions.get_mut(&message.sid) {
                Some(sub) => (sub.handler)(&message),
                None => return Ok(false),
            }
        };

        if self.options.auto_reply {
            if let (Some(reply_to), Some(reply)) = (message.reply_to.as_deref(), reply) {
                self.publish(reply_to, reply)?;
            }
        }

        Ok(true)
    }

    /// Sends a request and handles at most one reply with `handler`.
    ///
    /// The reply inbox is subscribed with a one-shot subscription that removes
    /// itself before `handler` runs. Exactly one [`Client::process`] step is
    /// driven, with the configured timeout. If that step times out the inbox
    /// is unsubscribed. If it handled another message instead, the inbox stays
    /// until its reply arrives in a later step.
    pub fn request<F>(&mut self, subject: &str, payload: impl Into<Payload>, handler: F) -> Result<()>
    where
        F: FnOnce(&Message) + Send + 'static,
    {
        let inbox = self.new_inbox();
        let mut handler = Some(handler);
        let sid = self.add_subscription(
            &inbox,
            None,
            Box::new(move |msg| {
                if let Some(handler) = handler.take() {
                    handler(msg);
                }
                None
            }),
            true,
        )?;
        self.publish_with_reply(subject, &inbox, payload)?;

        let step = self.process(self.options.timeout);
        if self.subscriptions.contains_key(&sid) {
            match step {
                Ok(false) => {
                    self.unsubscribe_sid(sid)?;
                }
                Ok(true) => {}
                Err(_) => {
                    self.subscriptions.remove(&sid);
                }
            }
        }
        step.map(|_| ())
    }

    /// Sends a request and polls until the reply arrives or `timeout`
    /// (defaulting to the configured timeout) elapses.
    ///
    /// # Example
    /// ```no_run
    /// # fn main() -> nats_poll::Result<()> {
    /// let mut client = nats_poll::connect("demo.nats.io")?;
    /// let reply = client.dispatch("service", "ping", None)?;
    /// println!("{:?}", reply.payload.as_str());
    /// # Ok(())
    /// # }
    /// ```
    pub fn dispatch(
        &mut self,
        subject: &str,
        payload: impl Into<Payload>,
        timeout: Option<Duration>,
    ) -> Result<Message> {
        let payload = payload.into();
        let deadline = Instant::now() + timeout.unwrap_or(self.options.timeout);
        let slot: Arc<Mutex<Option<Message>>> = Arc::new(Mutex::new(None));

        let inbox = self.new_inbox();
        let sid = {
            let slot = slot.clone();
            self.add_subscription(
                &inbox,
                None,
                Box::new(move |msg| {
                    slot.lock().get_or_insert_with(|| msg.clone());
                    None
                }),
                true,
            )?
        };
        self.publish_with_reply(subject, &inbox, payload.clone())?;
        let mut reconnects = self.reconnects;

        loop {
            if let Some(message) = slot.lock().take() {
                if message.is_no_responders() {
                    return Err(Error::with_source(ErrorKind::NoResponders, subject.to_string()));
                }
                return Ok(message);
            }

            let now = Instant::now();
            if now >= deadline {
                self.unsubscribe_sid(sid)?;
                return Err(Error::with_source(
                    ErrorKind::Timeout,
                    format!("no reply on {} for request to {}", inbox, subject),
                ));
            }

            self.process(deadline - now)?;

            // The request was lost with the old connection.
            if self.reconnects != reconnects && self.subscriptions.contains_key(&sid) {
                reconnects = self.reconnects;
                self.publish_with_reply(subject, &inbox, payload.clone())?;
            }
        }
    }

    /// Round-trips a `PING`, so everything written before has been processed
    /// by the server. Messages arriving meanwhile are handled as usual.
    pub fn flush(&mut self, timeout: Duration) -> Result<()> {
        let sent = Instant::now();
        self.send(&Op::Ping)?;
        let deadline = sent + timeout;
        loop {
            if self.conn.last_pong().map_or(false, |pong| pong >= sent) {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::with_source(ErrorKind::Timeout, "flush timed out"));
            }
            self.process(deadline - now)?;
        }
    }

    /// Closes the connection. Every later call fails with
    /// [`ErrorKind::Closed`].
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.subscriptions.clear();
            self.pending_pull = None;
            self.conn.close();
        }
    }

    /// Suspends the idle timeout while a long poll is outstanding.
    pub(crate) fn prolongate(&mut self, duration: Duration) {
        self.conn.prolongate(duration);
    }

    pub(crate) fn set_pending_pull(&mut self, pull: Option<PendingPull>) {
        self.pending_pull = pull;
    }

    pub(crate) fn options(&self) -> &Options {
        &self.options
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
