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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nats_poll::{ErrorKind, Options, State};
use nats_test_server::NatsTestServer;
use parking_lot::Mutex;

fn counting(counter: &Arc<AtomicUsize>) -> impl Fn() + Send + Sync + 'static {
    let counter = counter.clone();
    move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn subscriptions_survive_reconnect() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let reconnects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let mut nc = Options::new()
        .reconnect_wait(Duration::from_millis(10))
        .reconnect_callback(counting(&reconnects))
        .disconnect_callback(counting(&disconnects))
        .connect(server.url().as_str())
        .unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    {
        let received = received.clone();
        nc.subscribe("updates", move |msg| {
            received.lock().push(msg.payload.as_str().map(String::from));
            None
        })
        .unwrap();
    }
    nc.flush(Duration::from_secs(1)).unwrap();

    server.evict_all();
    util::process_until(&mut nc, || reconnects.load(Ordering::SeqCst) == 1);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(nc.state(), State::Connected);

    nc.publish("updates", "after").unwrap();
    util::process_until(&mut nc, || !received.lock().is_empty());
    assert_eq!(*received.lock(), vec![Some("after".to_string())]);
}

#[test]
fn reconnects_to_restarted_server() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let reconnects = Arc::new(AtomicUsize::new(0));
    let mut nc = Options::new()
        .reconnect_wait(Duration::from_millis(10))
        .reconnect_callback(counting(&reconnects))
        .connect(server.url().as_str())
        .unwrap();
    nc.subscribe("echo", |msg| Some(msg.payload.clone())).unwrap();

    let _server = server.restart().spawn();
    util::process_until(&mut nc, || reconnects.load(Ordering::SeqCst) == 1);

    let reply = nc
        .dispatch("echo", "hello", Some(Duration::from_secs(2)))
        .unwrap();
    assert_eq!(reply.payload.as_str(), Some("hello"));
}

#[test]
fn fails_over_to_next_server() {
    util::init_logging();
    let first = NatsTestServer::build().spawn();
    let second = NatsTestServer::build().spawn();
    let urls = format!("{},{}", first.url(), second.url());

    let reconnects = Arc::new(AtomicUsize::new(0));
    let mut nc = Options::new()
        .randomize(false)
        .reconnect_wait(Duration::from_millis(10))
        .reconnect_callback(counting(&reconnects))
        .connect(urls.as_str())
        .unwrap();
    assert_eq!(nc.server_info().port, first.address().port());
    nc.subscribe("echo", |msg| Some(msg.payload.clone())).unwrap();

    drop(first);
    util::process_until(&mut nc, || reconnects.load(Ordering::SeqCst) == 1);
    assert_eq!(nc.server_info().port, second.address().port());

    let reply = nc
        .dispatch("echo", "still here", Some(Duration::from_secs(2)))
        .unwrap();
    assert_eq!(reply.payload.as_str(), Some("still here"));
}

#[test]
fn disabled_reconnect_fails() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let mut nc = Options::new()
        .reconnect(false)
        .connect(server.url().as_str())
        .unwrap();
    nc.flush(Duration::from_secs(1)).unwrap();

    server.evict_all();
    let err = loop {
        match nc.process(Duration::from_millis(50)) {
            Ok(_) => continue,
            Err(err) => break err,
        }
    };
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(nc.state(), State::Failed);
}

#[test]
fn unanswered_ping_breaks_connection() {
    util::init_logging();
    let server = NatsTestServer::build().answer_pings(false).spawn();
    let mut nc = Options::new()
        .reconnect(false)
        .timeout(Duration::from_millis(100))
        .ping_interval(Duration::from_millis(100))
        .connect(server.url().as_str())
        .unwrap();

    let err = nc.process(Duration::from_secs(2)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[test]
fn single_server_is_retried_past_max_reconnects() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let reconnects = Arc::new(AtomicUsize::new(0));
    let mut nc = Options::new()
        .max_reconnects(1)
        .reconnect_wait(Duration::from_millis(20))
        .reconnect_callback(counting(&reconnects))
        .connect(server.url().as_str())
        .unwrap();
    nc.subscribe("echo", |msg| Some(msg.payload.clone())).unwrap();
    assert!(nc.servers().is_empty());

    // down for many more attempts than max_reconnects allows
    let builder = server.restart();
    let restarted = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        builder.spawn()
    });

    util::process_until(&mut nc, || reconnects.load(Ordering::SeqCst) == 1);
    let _server = restarted.join().unwrap();
    assert_eq!(nc.state(), State::Connected);

    let reply = nc
        .dispatch("echo", "back", Some(Duration::from_secs(2)))
        .unwrap();
    assert_eq!(reply.payload.as_str(), Some("back"));
}

#[test]
fn exhausted_pool_fails_the_client() {
    util::init_logging();
    let first = NatsTestServer::build().spawn();
    let second = NatsTestServer::build().spawn();
    let urls = format!("{},{}", first.url(), second.url());

    let mut nc = Options::new()
        .randomize(false)
        .max_reconnects(1)
        .reconnect_wait(Duration::from_millis(10))
        .connect(urls.as_str())
        .unwrap();
    assert_eq!(nc.servers().len(), 2);

    drop(first);
    drop(second);
    let err = loop {
        match nc.process(Duration::from_millis(50)) {
            Ok(_) => continue,
            Err(err) => break err,
        }
    };
    assert_eq!(err.kind(), ErrorKind::PoolExhausted);
    assert_eq!(nc.state(), State::Failed);
    assert!(nc.servers().iter().all(|server| server.reconnect_attempts() > 1));
}
