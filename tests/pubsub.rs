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

mod util;

use std::sync::Arc;
use std::time::Duration;

use nats_poll::{Payload, State};
use nats_test_server::NatsTestServer;
use parking_lot::Mutex;

#[test]
fn messages_arrive_in_order() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let mut nc = nats_poll::connect(server.url().as_str()).unwrap();
    assert_eq!(nc.state(), State::Connected);

    let received = Arc::new(Mutex::new(Vec::new()));
    {
        let received = received.clone();
        nc.subscribe("events.*", move |msg| {
            received.lock().push(msg.payload.as_str().map(String::from));
            None
        })
        .unwrap();
    }

    for i in 0..5 {
        nc.publish(&format!("events.{}", i), format!("event {}", i))
            .unwrap();
    }
    util::process_until(&mut nc, || received.lock().len() == 5);

    let expected: Vec<Option<String>> = (0..5).map(|i| Some(format!("event {}", i))).collect();
    assert_eq!(*received.lock(), expected);
}

#[test]
fn no_echo_suppresses_own_messages() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let mut nc = nats_poll::Options::new()
        .no_echo()
        .connect(server.url().as_str())
        .unwrap();

    let count = Arc::new(Mutex::new(0));
    {
        let count = count.clone();
        nc.subscribe("foo", move |_| {
            *count.lock() += 1;
            None
        })
        .unwrap();
    }
    nc.publish("foo", "bar").unwrap();
    nc.flush(Duration::from_secs(1)).unwrap();
    util::process_for(&mut nc, Duration::from_millis(100));

    assert_eq!(*count.lock(), 0);
}

#[test]
fn headers_are_delivered() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let mut nc = nats_poll::connect(server.url().as_str()).unwrap();

    let trace = Arc::new(Mutex::new(None));
    {
        let trace = trace.clone();
        nc.subscribe("traced", move |msg| {
            *trace.lock() = msg.headers().get("X-Trace").map(String::from);
            None
        })
        .unwrap();
    }
    nc.publish("traced", Payload::new("body").with_header("X-Trace", "abc"))
        .unwrap();
    util::process_until(&mut nc, || trace.lock().is_some());

    assert_eq!(trace.lock().as_deref(), Some("abc"));
}

#[test]
fn queue_group_delivers_once() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let mut nc = nats_poll::connect(server.url().as_str()).unwrap();

    let count = Arc::new(Mutex::new(0));
    for _ in 0..3 {
        let count = count.clone();
        nc.subscribe_queue("jobs", "workers", move |_| {
            *count.lock() += 1;
            None
        })
        .unwrap();
    }
    nc.publish("jobs", "job").unwrap();
    nc.flush(Duration::from_secs(1)).unwrap();
    util::process_for(&mut nc, Duration::from_millis(100));

    assert_eq!(*count.lock(), 1);
}

#[test]
fn unsubscribe_by_subject() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let mut nc = nats_poll::connect(server.url().as_str()).unwrap();

    nc.subscribe("foo", |_| None).unwrap();
    nc.subscribe("foo", |_| None).unwrap();
    nc.subscribe("bar", |_| None).unwrap();
    assert_eq!(nc.subscription_count(), 3);

    assert_eq!(nc.unsubscribe("foo").unwrap(), 2);
    assert_eq!(nc.subscription_count(), 1);
}

#[test]
fn subscription_churn_keeps_sids_distinct() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let mut nc = nats_poll::connect(server.url().as_str()).unwrap();

    let kept = nc.subscribe("kept", |_| None).unwrap();
    for _ in 0..1000 {
        let sid = nc.subscribe("churn", |_| None).unwrap();
        assert_ne!(sid, kept);
        nc.unsubscribe_sid(sid).unwrap();
    }
    assert_eq!(nc.subscription_count(), 1);

    let received = Arc::new(Mutex::new(0));
    {
        let received = received.clone();
        nc.subscribe("kept", move |_| {
            *received.lock() += 1;
            None
        })
        .unwrap();
    }
    nc.publish("kept", "still here").unwrap();
    util::process_until(&mut nc, || *received.lock() == 1);
    nc.flush(Duration::from_secs(1)).unwrap();
}

#[test]
fn closed_client_rejects_calls() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let mut nc = nats_poll::connect(server.url().as_str()).unwrap();
    nc.close();

    let err = nc.publish("foo", "bar").unwrap_err();
    assert_eq!(err.kind(), nats_poll::ErrorKind::Closed);
    let err = nc.process(Duration::from_millis(10)).unwrap_err();
    assert_eq!(err.kind(), nats_poll::ErrorKind::Closed);
}

/// Leaves a message for `sid` in the socket after the subscription is gone
/// on the client side.
fn orphan_message(nc: &mut nats_poll::Client) {
    let sid = nc.subscribe("orphans", |_| None).unwrap();
    nc.publish("orphans", "late").unwrap();
    std::thread::sleep(Duration::from_millis(100));
    nc.unsubscribe_sid(sid).unwrap();
}

#[test]
fn unknown_sid_is_an_error() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let mut nc = nats_poll::Options::new()
        .skip_invalid_messages(false)
        .connect(server.url().as_str())
        .unwrap();

    orphan_message(&mut nc);
    let err = nc.process(Duration::from_secs(1)).unwrap_err();
    assert_eq!(err.kind(), nats_poll::ErrorKind::NoHandler);
}

#[test]
fn unknown_sid_is_skipped_when_configured() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let mut nc = nats_poll::Options::new()
        .skip_invalid_messages(true)
        .connect(server.url().as_str())
        .unwrap();

    orphan_message(&mut nc);
    assert!(!nc.process(Duration::from_secs(1)).unwrap());
    nc.flush(Duration::from_secs(1)).unwrap();
    assert_eq!(nc.state(), State::Connected);
}
