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

//! A poll-driven client for the NATS.io messaging system.
//!
//! The client owns its socket and never spawns threads. Messages are read,
//! and subscription handlers run, only while the caller is inside
//! [`Client::process`] or one of the calls built on it. Handlers for a
//! subscription therefore fire in the order messages arrive, and whatever a
//! handler returns is published to the message's reply subject before
//! `process` returns.
//!
//! For more information see [https://nats.io/].
//!
//! [https://nats.io/]: https://nats.io/
//!
//! ## Examples
//!
//! Basic connections, and those with options.
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let nc = nats_poll::connect("demo.nats.io")?;
//!
//! let nc2 = nats_poll::Options::with_user_pass("derek", "s3cr3t!")
//!     .with_name("My Rust NATS App")
//!     .connect("127.0.0.1")?;
//!
//! let nc3 = nats_poll::Options::with_credentials("path/to/my.creds")
//!     .connect("connect.ngs.global")?;
//!
//! let nc4 = nats_poll::Options::new()
//!     .add_root_certificate("my-certs.pem")
//!     .connect("tls://demo.nats.io:4443")?;
//! # Ok(()) }
//! ```
//!
//! ### Subscribe and respond
//!
//! ```no_run
//! # fn main() -> nats_poll::Result<()> {
//! # use std::time::Duration;
//! use nats_poll::Payload;
//!
//! let mut nc = nats_poll::connect("demo.nats.io")?;
//! nc.subscribe("greet", |msg| {
//!     let name = msg.payload.as_str().unwrap_or("stranger");
//!     Some(Payload::from(format!("hello {}", name)))
//! })?;
//!
//! loop {
//!     nc.process(Duration::from_secs(1))?;
//! }
//! # }
//! ```
//!
//! ### Request/Response
//!
//! ```no_run
//! # use std::time::Duration;
//! # fn main() -> nats_poll::Result<()> {
//! let mut nc = nats_poll::connect("demo.nats.io")?;
//! let reply = nc.dispatch("greet", "derek", Some(Duration::from_secs(2)))?;
//! println!("{:?}", reply.payload.as_str());
//! # Ok(()) }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(
    feature = "fault_injection",
    deny(future_incompatible, nonstandard_style, rust_2018_idioms)
)]

mod auth_utils;
mod client;
mod connect;
mod connection;
mod error;
mod message;
mod options;
mod proto;
mod server_pool;

/// Header constants and types.
pub mod header;

/// `JetStream` stream management and pull consumers.
pub mod jetstream;

#[cfg(feature = "fault_injection")]
mod fault_injection;

#[cfg(feature = "fault_injection")]
use fault_injection::{inject_delay, inject_io_failure};

#[cfg(not(feature = "fault_injection"))]
fn inject_delay() {}

#[cfg(not(feature = "fault_injection"))]
fn inject_io_failure() -> std::io::Result<()> {
    Ok(())
}

use serde::{Deserialize, Serialize};

pub use auth_utils::Authenticator;
pub use client::{Client, Handler};
pub use connection::State;
pub use error::{Error, ErrorKind, Result};
pub use header::HeaderMap;
pub use message::{AckInfo, AckKind, Message, Payload};
pub use options::{DelayMode, Options};
pub use server_pool::{IntoServerList, Server, ServerAddress};

/// A re-export of the `rustls` crate used in this crate,
/// for use in cases where manual client configurations
/// must be provided using `Options::tls_client_config`.
pub use rustls;

#[doc(hidden)]
pub use connect::ConnectInfo;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LANG: &str = "rust";

/// Information sent by the server in `INFO`, when the client connects and
/// again whenever the cluster changes.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    /// The unique identifier of the NATS server.
    pub server_id: String,
    /// Generated Server Name.
    pub server_name: String,
    /// The host specified in the cluster parameter/options.
    pub host: String,
    /// The port number specified in the cluster parameter/options.
    pub port: u16,
    /// The version of the NATS server.
    pub version: String,
    /// If this is set, then the server should try to authenticate upon
    /// connect.
    pub auth_required: bool,
    /// If this is set, then the server must authenticate using TLS.
    pub tls_required: bool,
    /// The server requires a client certificate.
    pub tls_verify: bool,
    /// Maximum payload size that the server will accept.
    pub max_payload: usize,
    /// The protocol version in use.
    pub proto: i8,
    /// The server-assigned client ID. This may change during reconnection.
    pub client_id: u64,
    /// The nonce used for nkeys.
    pub nonce: String,
    /// A list of server urls that a client can connect to.
    pub connect_urls: Vec<String>,
    /// The client IP as known by the server.
    pub client_ip: String,
    /// Whether the server supports headers.
    pub headers: bool,
    /// Whether server goes into lame duck mode.
    #[serde(rename = "ldm")]
    pub lame_duck_mode: bool,
}

/// Connect to one or more NATS servers with default options.
///
/// A comma separated list, a slice of URLs or a single address all work.
///
/// # Example
/// ```no_run
/// # fn main() -> nats_poll::Result<()> {
/// let mut nc = nats_poll::connect("demo.nats.io")?;
/// nc.publish("foo", "bar")?;
///
/// let nc2 = nats_poll::connect("nats://a:4222,nats://b:4222")?;
/// # Ok(())
/// # }
/// ```
pub fn connect<I: IntoServerList>(nats_urls: I) -> Result<Client> {
    Options::new().connect(nats_urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_info_reads_lame_duck_flag() {
        let info: ServerInfo = serde_json::from_str(
            r#"{"server_id":"NABC","port":4222,"max_payload":1048576,
                "connect_urls":["10.0.0.1:4222"],"ldm":true,"unknown":1}"#,
        )
        .unwrap();
        assert_eq!(info.server_id, "NABC");
        assert_eq!(info.connect_urls, vec!["10.0.0.1:4222".to_string()]);
        assert!(info.lame_duck_mode);
        assert!(!info.tls_required);
        assert_eq!(info.nonce, "");
    }
}
