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

use std::fs;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use nkeys::KeyPair;
use once_cell::sync::Lazy;
use regex::Regex;
use webpki::types::{CertificateDer, PrivateKeyDer};

use crate::error::{Error, ErrorKind, Result};

/// Signs server nonces on behalf of the client.
///
/// Implemented for [`nkeys::KeyPair`]; anything else that can produce an
/// ed25519 signature (an HSM, a remote signer) can implement it too.
pub trait Authenticator: Send + Sync {
    /// Signs `nonce` and returns the signature encoded as Base64URL.
    fn sign(&self, nonce: &[u8]) -> Result<String>;

    /// The public nkey matching the signing key.
    fn public_key(&self) -> Result<String>;
}

impl Authenticator for KeyPair {
    fn sign(&self, nonce: &[u8]) -> Result<String> {
        sign_nonce(nonce, self)
    }

    fn public_key(&self) -> Result<String> {
        Ok(KeyPair::public_key(self))
    }
}

/// Re-reads a `.creds` file every time it has to sign, so the seed is
/// only held in memory for the duration of the handshake.
pub(crate) struct CredsFile(pub(crate) PathBuf);

impl Authenticator for CredsFile {
    fn sign(&self, nonce: &[u8]) -> Result<String> {
        let (_jwt, kp) = load_creds(&self.0)?;
        sign_nonce(nonce, &kp)
    }

    fn public_key(&self) -> Result<String> {
        let (_jwt, kp) = load_creds(&self.0)?;
        Ok(kp.public_key())
    }
}

fn invalid_creds(message: &str) -> Error {
    Error::with_source(ErrorKind::InvalidArgument, message.to_string())
}

/// Loads the user JWT and nkey from a `.creds` file.
pub(crate) fn load_creds(path: &Path) -> Result<(String, KeyPair)> {
    let contents = fs::read_to_string(path).map_err(|err| {
        Error::with_source(
            ErrorKind::InvalidArgument,
            format!("cannot read credentials {}: {}", path.display(), err),
        )
    })?;
    jwt_kp(&contents)
}

pub(crate) fn jwt_kp(contents: &str) -> Result<(String, KeyPair)> {
    let jwt = parse_decorated_jwt(contents)
        .ok_or_else(|| invalid_creds("cannot parse user JWT from the credentials file"))?;

    let nkey = parse_decorated_nkey(contents)
        .ok_or_else(|| invalid_creds("cannot parse nkey from the credentials file"))?;

    let kp = KeyPair::from_seed(&nkey)
        .map_err(|err| Error::with_source(ErrorKind::InvalidArgument, err.to_string()))?;

    Ok((jwt, kp))
}

/// Signs nonce using a key pair.
pub(crate) fn sign_nonce(nonce: &[u8], key_pair: &KeyPair) -> Result<String> {
    let sig = key_pair
        .sign(nonce)
        .map_err(|err| Error::with_source(ErrorKind::InvalidArgument, err.to_string()))?;

    Ok(base64_url::encode(&sig))
}

// This regex parses a credentials file.
//
// The credentials file is typically
// `~/.nkeys/creds/synadia/<account/<account>.creds` and looks like this:
//
// ```
// -----BEGIN NATS USER JWT-----
// eyJ0eXAiOiJqd3QiLCJhbGciOiJlZDI1NTE5...
// ------END NATS USER JWT------
//
// ************************* IMPORTANT *************************
// NKEY Seed printed below can be used sign and prove identity.
// NKEYs are sensitive and should be treated as secrets.
//
// -----BEGIN USER NKEY SEED-----
// SUAIO3FHUX5PNV2LQIIP7TZ3N4L7TX3W53MQGEIVYFIGA635OZCKEYHFLM
// ------END USER NKEY SEED------
// ```
#[allow(clippy::unwrap_used)]
static USER_CONFIG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*(?:(?:[-]{3,}.*[-]{3,}\r?\n)([\w\-.=]+)(?:\r?\n[-]{3,}.*[-]{3,}\r?\n))")
        .unwrap()
});

fn parse_decorated_jwt(contents: &str) -> Option<String> {
    let capture = USER_CONFIG_RE.captures_iter(contents).next()?;
    Some(capture[1].to_string())
}

fn parse_decorated_nkey(contents: &str) -> Option<String> {
    let capture = USER_CONFIG_RE.captures_iter(contents).nth(1)?;
    Some(capture[1].to_string())
}

fn tls_error(path: &Path, err: io::Error) -> Error {
    Error::with_source(ErrorKind::Tls, format!("{}: {}", path.display(), err))
}

/// Loads certificates from a `.pem` file.
///
/// A file without certificates yields an empty list, so a combined key and
/// certificate file can be passed here as well.
pub(crate) fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = fs::File::open(path).map_err(|err| tls_error(path, err))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<io::Result<Vec<_>>>()
        .map_err(|err| tls_error(path, err))
}

/// Loads the first private key from a `.pem` file.
pub(crate) fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = fs::File::open(path).map_err(|err| tls_error(path, err))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|err| tls_error(path, err))?
        .ok_or_else(|| {
            Error::with_source(
                ErrorKind::Tls,
                format!("could not find client key in {}", path.display()),
            )
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const NKEY: &str = "UAMMBNV2EYR65NYZZ7IAK5SIR5ODNTTERJOBOF4KJLMWI45YOXOSWULM";
    pub(crate) const SEED: &str = "SUANQDPB2RUOE4ETUA26CNX7FUKE5ZZKFCQIIW63OX225F2CO7UEXTM7ZY";

    pub(crate) fn creds() -> String {
        format!(
            "-----BEGIN NATS USER JWT-----\n\
             eyJ0eXAiOiJqd3QiLCJhbGciOiJlZDI1NTE5.e30.c2ln\n\
             ------END NATS USER JWT------\n\
             \n\
             ************************* IMPORTANT *************************\n\
             NKEY Seed printed below can be used sign and prove identity.\n\
             \n\
             -----BEGIN USER NKEY SEED-----\n\
             {}\n\
             ------END USER NKEY SEED------\n",
            SEED
        )
    }

    #[test]
    fn parses_creds() {
        let (jwt, kp) = jwt_kp(&creds()).unwrap();
        assert_eq!(jwt, "eyJ0eXAiOiJqd3QiLCJhbGciOiJlZDI1NTE5.e30.c2ln");
        assert_eq!(kp.public_key(), NKEY);
    }

    #[test]
    fn rejects_creds_without_seed() {
        let err = jwt_kp("-----BEGIN NATS USER JWT-----\nabc\n------END NATS USER JWT------\n")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn key_pair_signs_base64url() {
        let kp = KeyPair::from_seed(SEED).unwrap();
        let sig = Authenticator::sign(&kp, b"nonce").unwrap();
        let raw = base64_url::decode(&sig).unwrap();
        assert!(kp.verify(b"nonce", &raw).is_ok());
        assert_eq!(Authenticator::public_key(&kp).unwrap(), NKEY);
    }

    #[test]
    fn missing_pem_is_tls_error() {
        let err = load_certs(Path::new("does/not/exist.pem")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Tls);
        let err = load_key(Path::new("does/not/exist.pem")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Tls);
    }
}
