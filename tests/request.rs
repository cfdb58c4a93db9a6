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

use nats_poll::{ErrorKind, Payload};
use nats_test_server::NatsTestServer;
use parking_lot::Mutex;

#[test]
fn dispatch_gets_reply() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let mut nc = nats_poll::connect(server.url().as_str()).unwrap();

    nc.subscribe("greet", |msg| {
        let name = msg.payload.as_str().unwrap_or("stranger").to_string();
        Some(Payload::from(format!("hello {}", name)))
    })
    .unwrap();

    let reply = nc
        .dispatch("greet", "derek", Some(Duration::from_secs(2)))
        .unwrap();
    assert_eq!(reply.payload.as_str(), Some("hello derek"));
    // the one-shot inbox is gone again
    assert_eq!(nc.subscription_count(), 1);
}

#[test]
fn dispatch_times_out() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let mut nc = nats_poll::connect(server.url().as_str()).unwrap();
    nc.subscribe("silent", |_| None).unwrap();

    let err = nc
        .dispatch("silent", "anyone?", Some(Duration::from_millis(200)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(nc.subscription_count(), 1);
}

#[test]
fn dispatch_without_responders() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let mut nc = nats_poll::connect(server.url().as_str()).unwrap();

    let err = nc
        .dispatch("nobody-home", "hello", Some(Duration::from_secs(2)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoResponders);
}

#[test]
fn request_runs_handler_once() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let mut nc = nats_poll::connect(server.url().as_str()).unwrap();
    nc.subscribe("echo", |msg| Some(msg.payload.clone())).unwrap();

    let replies = Arc::new(Mutex::new(Vec::new()));
    {
        let replies = replies.clone();
        nc.request("echo", "ping", move |msg| {
            replies.lock().push(msg.payload.as_str().map(String::from));
        })
        .unwrap();
    }
    // the single step of `request` handled the request itself
    util::process_until(&mut nc, || !replies.lock().is_empty());

    assert_eq!(*replies.lock(), vec![Some("ping".to_string())]);
    assert_eq!(nc.subscription_count(), 1);
}

#[test]
fn responder_without_auto_reply() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let mut nc = nats_poll::Options::new()
        .auto_reply(false)
        .connect(server.url().as_str())
        .unwrap();
    nc.subscribe("svc", |_| Some(Payload::from("ignored"))).unwrap();

    let err = nc
        .dispatch("svc", "hi", Some(Duration::from_millis(200)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[test]
fn request_without_reply_drops_its_inbox() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let mut responder = nats_poll::connect(server.url().as_str()).unwrap();
    responder.subscribe("silent", |_| None).unwrap();
    responder.flush(Duration::from_secs(1)).unwrap();

    let mut nc = nats_poll::Options::new()
        .timeout(Duration::from_millis(200))
        .connect(server.url().as_str())
        .unwrap();
    nc.request("silent", "anyone?", |_| panic!("nobody answers"))
        .unwrap();
    assert_eq!(nc.subscription_count(), 0);
}
