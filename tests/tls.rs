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

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nats_poll::rustls::{ClientConfig, RootCertStore};
use nats_poll::{ErrorKind, Options, State};
use nats_test_server::NatsTestServer;
use parking_lot::Mutex;

fn trusting(server: &NatsTestServer) -> ClientConfig {
    let mut roots = RootCertStore::empty();
    roots.add(server.tls_certificate().unwrap()).unwrap();
    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

fn localhost_url(port: u16) -> String {
    format!("nats://localhost:{}", port)
}

#[test]
fn upgrades_when_server_requires_tls() {
    util::init_logging();
    let server = NatsTestServer::build().tls().spawn();
    let mut nc = Options::new()
        .tls_client_config(trusting(&server))
        .connect(localhost_url(server.address().port()).as_str())
        .unwrap();
    assert!(nc.server_info().tls_required);
    assert_eq!(nc.state(), State::Connected);

    let received = Arc::new(Mutex::new(None));
    {
        let received = received.clone();
        nc.subscribe("secure", move |msg| {
            *received.lock() = msg.payload.as_str().map(String::from);
            None
        })
        .unwrap();
    }
    nc.publish("secure", "sealed").unwrap();
    util::process_until(&mut nc, || received.lock().is_some());
    assert_eq!(received.lock().as_deref(), Some("sealed"));

    nc.subscribe("echo", |msg| Some(msg.payload.clone())).unwrap();
    let reply = nc
        .dispatch("echo", "over tls", Some(Duration::from_secs(2)))
        .unwrap();
    assert_eq!(reply.payload.as_str(), Some("over tls"));
}

#[test]
fn untrusted_certificate_is_fatal() {
    util::init_logging();
    let server = NatsTestServer::build().tls().spawn();
    let config = ClientConfig::builder()
        .with_root_certificates(RootCertStore::empty())
        .with_no_client_auth();

    let err = Options::new()
        .tls_client_config(config)
        .connect(localhost_url(server.address().port()).as_str())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Tls);
}

#[test]
fn garbage_handshake_is_fatal() {
    util::init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        socket
            .write_all(b"INFO {\"server_id\":\"fake\",\"tls_required\":true}\r\n")
            .unwrap();
        socket.write_all(b"-ERR 'this is not TLS'\r\n").unwrap();
        // hold the socket until the client gives up
        let mut buf = [0; 1024];
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        while let Ok(n) = socket.read(&mut buf) {
            if n == 0 {
                break;
            }
        }
    });

    let config = ClientConfig::builder()
        .with_root_certificates(RootCertStore::empty())
        .with_no_client_auth();
    let err = Options::new()
        .tls_client_config(config)
        .connect(localhost_url(port).as_str())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Tls);

    server.join().unwrap();
}
