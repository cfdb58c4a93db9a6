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

use std::fmt::{self, Debug, Display};
use std::io;

/// Boxed source error carried by [`Error`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A specialized `Result` for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The kinds of failures a client operation can surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A malformed control line or header block was received.
    Parse,
    /// The server sent `-ERR` or an operation the client does not understand.
    Protocol,
    /// A `MSG` arrived for a subscription id with no registered handler.
    NoHandler,
    /// Reading from or writing to the socket failed.
    Transport,
    /// Every endpoint in the server pool is over its attempt limit or lame-duck.
    PoolExhausted,
    /// TLS could not be configured or the handshake failed.
    Tls,
    /// A request was not resolved before its deadline.
    Timeout,
    /// The declared payload length did not match what was read.
    PayloadLength,
    /// A request was published to a subject nobody listens on.
    NoResponders,
    /// The JetStream API answered with an error document.
    JetStream {
        /// HTTP-like status code of the API error.
        code: u16,
        /// JetStream specific error code.
        err_code: u64,
    },
    /// A caller supplied value was rejected.
    InvalidArgument,
    /// The client was closed.
    Closed,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Parse => write!(f, "parse error"),
            ErrorKind::Protocol => write!(f, "protocol error"),
            ErrorKind::NoHandler => write!(f, "no handler for subscription"),
            ErrorKind::Transport => write!(f, "transport failure"),
            ErrorKind::PoolExhausted => write!(f, "no servers remaining to connect to"),
            ErrorKind::Tls => write!(f, "tls setup failure"),
            ErrorKind::Timeout => write!(f, "processing timeout"),
            ErrorKind::PayloadLength => write!(f, "payload length mismatch"),
            ErrorKind::NoResponders => write!(f, "no responders"),
            ErrorKind::JetStream { code, err_code } => {
                write!(f, "jetstream error {} ({})", code, err_code)
            }
            ErrorKind::InvalidArgument => write!(f, "invalid argument"),
            ErrorKind::Closed => write!(f, "client closed"),
        }
    }
}

/// The error type for the client.
#[derive(Debug)]
pub struct Error {
    pub(crate) kind: ErrorKind,
    pub(crate) source: Option<BoxError>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub(crate) fn with_source<S>(kind: ErrorKind, source: S) -> Self
    where
        S: Into<BoxError>,
    {
        Self {
            kind,
            source: Some(source.into()),
        }
    }

    // In some cases the kind doesn't implement `Copy` trait
    pub fn kind(&self) -> ErrorKind {
        self.kind.clone()
    }

    /// Whether this failure should be handled by reconnecting.
    pub(crate) fn is_transport(&self) -> bool {
        self.kind == ErrorKind::Transport
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(err) = &self.source {
            write!(f, "{}: {}", self.kind, err)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|boxed| boxed.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::with_source(ErrorKind::Transport, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Parse, err)
    }
}
