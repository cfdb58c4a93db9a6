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

use std::convert::TryFrom;

use serde::{Deserialize, Serialize};

fn default_echo() -> bool {
    true
}

/// Info to construct a CONNECT message.
///
/// Unknown keys are rejected when a CONNECT document is decoded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[doc(hidden)]
#[allow(clippy::module_name_repetitions)]
pub struct ConnectInfo {
    /// Turns on +OK protocol acknowledgements.
    pub verbose: bool,

    /// Turns on additional strict format checking, e.g. for properly formed
    /// subjects.
    pub pedantic: bool,

    /// User's JWT.
    #[serde(rename = "jwt", default, skip_serializing_if = "Option::is_none")]
    pub user_jwt: Option<String>,

    /// Public nkey.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nkey: Option<String>,

    /// Signed nonce, encoded to Base64URL.
    #[serde(rename = "sig", default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Optional client name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// If set to `false`, the server will not send originating messages from
    /// this connection to its own subscriptions.
    #[serde(default = "default_echo")]
    pub echo: bool,

    /// The implementation language of the client.
    pub lang: String,

    /// The version of the client.
    pub version: String,

    /// Whether the client understands asynchronous INFO updates.
    #[serde(default)]
    pub protocol: Protocol,

    /// Indicates whether the client requires an SSL connection.
    #[serde(default)]
    pub tls_required: bool,

    /// Connection username (if `auth_required` is set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Connection password (if auth_required is set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,

    /// Client authorization token (if auth_required is set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Whether the client supports the usage of headers.
    #[serde(default)]
    pub headers: bool,

    /// Whether the client supports no_responders.
    #[serde(default)]
    pub no_responders: bool,
}

/// Protocol version used by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Protocol {
    /// Original protocol.
    Original = 0,
    /// Protocol with dynamic reconfiguration of cluster and lame duck mode functionality.
    Dynamic = 1,
}

impl Default for Protocol {
    fn default() -> Protocol {
        Protocol::Original
    }
}

impl From<Protocol> for u8 {
    fn from(protocol: Protocol) -> u8 {
        protocol as u8
    }
}

impl TryFrom<u8> for Protocol {
    type Error = String;

    fn try_from(value: u8) -> Result<Protocol, String> {
        match value {
            0 => Ok(Protocol::Original),
            1 => Ok(Protocol::Dynamic),
            other => Err(format!("unknown protocol version {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> ConnectInfo {
        ConnectInfo {
            verbose: false,
            pedantic: false,
            user_jwt: None,
            nkey: None,
            signature: None,
            name: None,
            echo: true,
            lang: "rust".to_string(),
            version: "0.1.0".to_string(),
            protocol: Protocol::Dynamic,
            tls_required: false,
            user: Some("derek".to_string()),
            pass: Some("s3cr3t".to_string()),
            auth_token: None,
            headers: true,
            no_responders: true,
        }
    }

    #[test]
    fn skips_absent_credentials() {
        let json = serde_json::to_value(info()).unwrap();
        assert_eq!(json["protocol"], 1);
        assert_eq!(json["user"], "derek");
        assert!(json.get("auth_token").is_none());
        assert!(json.get("sig").is_none());
    }

    #[test]
    fn rejects_unknown_keys() {
        let mut json = serde_json::to_value(info()).unwrap();
        json["surprise"] = serde_json::json!(true);
        assert!(serde_json::from_value::<ConnectInfo>(json).is_err());
    }

    #[test]
    fn rejects_unknown_protocol() {
        let mut json = serde_json::to_value(info()).unwrap();
        json["protocol"] = serde_json::json!(7);
        assert!(serde_json::from_value::<ConnectInfo>(json).is_err());
    }
}
