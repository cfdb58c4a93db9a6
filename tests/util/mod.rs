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

#![allow(dead_code)]

use std::time::{Duration, Instant};

use nats_poll::Client;

/// Drives `client` until `done` holds, panicking after five seconds.
pub fn process_until<F: FnMut() -> bool>(client: &mut Client, mut done: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "condition not met in time");
        client.process(Duration::from_millis(50)).unwrap();
    }
}

/// Drives `client` for `duration`, whatever arrives.
pub fn process_for(client: &mut Client, duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        client.process(Duration::from_millis(20)).unwrap();
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
