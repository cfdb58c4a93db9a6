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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nats_test_server::NatsTestServer;

#[test]
fn initial_info_is_exposed() {
    util::init_logging();
    let server = NatsTestServer::build()
        .connect_urls(vec!["127.0.0.1:4333".to_string()])
        .spawn();
    let nc = nats_poll::connect(server.url().as_str()).unwrap();

    let info = nc.server_info();
    assert_eq!(info.port, server.address().port());
    assert!(info.headers);
    assert_eq!(info.connect_urls, vec!["127.0.0.1:4333".to_string()]);
    assert!(!info.lame_duck_mode);
}

#[test]
fn cluster_updates_replace_server_info() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let mut nc = nats_poll::connect(server.url().as_str()).unwrap();
    assert!(nc.server_info().connect_urls.is_empty());

    server.advertise(vec![
        "127.0.0.1:4333".to_string(),
        "127.0.0.1:4334".to_string(),
    ]);
    let deadline = Instant::now() + Duration::from_secs(5);
    while nc.server_info().connect_urls.len() != 2 {
        assert!(Instant::now() < deadline, "no INFO update received");
        nc.process(Duration::from_millis(50)).unwrap();
    }
    assert_eq!(nc.server_info().connect_urls[1], "127.0.0.1:4334");
}

#[test]
fn lame_duck_mode_calls_back() {
    util::init_logging();
    let server = NatsTestServer::build().spawn();
    let lame_duck = Arc::new(AtomicBool::new(false));
    let mut nc = {
        let lame_duck = lame_duck.clone();
        nats_poll::Options::new()
            .lame_duck_callback(move || lame_duck.store(true, Ordering::SeqCst))
            .connect(server.url().as_str())
            .unwrap()
    };

    server.enter_lame_duck_mode();
    util::process_until(&mut nc, || lame_duck.load(Ordering::SeqCst));
    assert!(nc.server_info().lame_duck_mode);

    // still usable until the server goes away
    nc.flush(Duration::from_secs(1)).unwrap();
}
