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

//! Transport ownership, handshake, liveness and failover.

use std::cmp;
use std::convert::TryFrom;
use std::fmt;
use std::io::prelude::*;
use std::io::{self, BufReader, ErrorKind as IoErrorKind};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use crate::auth_utils;
use crate::connect::{ConnectInfo, Protocol};
use crate::error::{Error, ErrorKind, Result};
use crate::options::AuthStyle;
use crate::proto::{self, Op};
use crate::rustls::{ClientConfig, ClientConnection};
use crate::server_pool::{Server, ServerAddress, ServerPool};
use crate::{inject_delay, inject_io_failure, Options, ServerInfo};

/// Largest slice of a single blocking read, so liveness is checked regularly
/// even when the caller waits for a long time.
const READ_SLICE: Duration = Duration::from_millis(100);

/// Writes are split into packets of at most this size.
const MAX_PACKET: usize = 64 * 1024;

/// How many zero-length or timed-out writes are tolerated per packet.
const WRITE_ATTEMPTS: usize = 10;

/// Where the connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal: reconnection is disabled or no server is left to try.
    Failed,
}

fn configure_tls(options: &Options) -> Result<ClientConfig> {
    if let Some(config) = &options.tls_client_config {
        return Ok(config.to_owned());
    }

    let mut root_store = rustls::RootCertStore::empty();

    // load native system certs only if user did not specify them
    if options.certificates.is_empty() {
        let native_certs = rustls_native_certs::load_native_certs().map_err(|err| {
            Error::with_source(
                ErrorKind::Tls,
                format!("could not load platform certs: {}", err),
            )
        })?;
        root_store.add_parsable_certificates(native_certs);
    }

    for path in &options.certificates {
        let certs = auth_utils::load_certs(path)?;
        let trust_anchors = certs
            .into_iter()
            .map(|cert| webpki::anchor_from_trusted_cert(&cert).map(|ta| ta.to_owned()))
            .collect::<std::result::Result<Vec<_>, webpki::Error>>()
            .map_err(|err| {
                Error::with_source(ErrorKind::Tls, format!("could not load certs: {}", err))
            })?;
        root_store.extend(trust_anchors);
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(root_store);

    match (&options.client_cert, &options.client_key) {
        (Some(cert), Some(key)) => {
            let cert = auth_utils::load_certs(cert)?;
            let key = auth_utils::load_key(key)?;
            builder.with_client_auth_cert(cert, key).map_err(|err| {
                Error::with_source(
                    ErrorKind::Tls,
                    format!("could not add certificate or key: {}", err),
                )
            })
        }
        (Some(_), None) => Err(Error::with_source(
            ErrorKind::Tls,
            "found certificate, but no key",
        )),
        _ => Ok(builder.with_no_client_auth()),
    }
}

/// Reads the first control line of a fresh connection, which must be `INFO`.
fn read_info(mut stream: impl Read) -> Result<ServerInfo> {
    let mut line = Vec::with_capacity(1024);
    while !line.ends_with(b"\r\n") {
        if line.len() >= proto::MAX_CONTROL_LINE {
            return Err(Error::with_source(
                ErrorKind::Parse,
                "INFO exceeded maximum control line",
            ));
        }
        let byte = &mut [0];
        stream.read_exact(byte)?;
        line.push(byte[0]);
    }
    match proto::decode(&line[..])? {
        Some(Op::Info(server_info)) => Ok(server_info),
        Some(Op::Err(message)) => Err(Error::with_source(ErrorKind::Protocol, message)),
        Some(op) => Err(Error::with_source(
            ErrorKind::Protocol,
            format!("expected INFO, received: {:?}", op),
        )),
        None => Err(io::Error::new(IoErrorKind::UnexpectedEof, "connection closed").into()),
    }
}

struct Transport {
    reader: BufReader<NatsStream>,
    writer: NatsStream,
}

/// Owns the socket to the current server and drives the connection state
/// machine.
pub(crate) struct Connection {
    options: Arc<Options>,
    pool: ServerPool,
    /// Used instead of the pool when a single URL was configured.
    static_address: Option<ServerAddress>,
    static_attempts: usize,
    tls_config: Option<Arc<ClientConfig>>,
    transport: Option<Transport>,
    state: State,
    info: ServerInfo,
    last_activity: Instant,
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
    prolonged_until: Option<Instant>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("server_id", &self.info.server_id)
            .finish()
    }
}

impl Connection {
    /// Connects to the first server that completes a handshake.
    ///
    /// A single address is used as a static endpoint, several addresses form
    /// a rotating server pool.
    pub(crate) fn connect(
        mut addresses: Vec<ServerAddress>,
        options: Arc<Options>,
    ) -> Result<Connection> {
        if addresses.is_empty() {
            return Err(Error::with_source(
                ErrorKind::InvalidArgument,
                "no server address given",
            ));
        }

        let static_address = if addresses.len() == 1 {
            addresses.pop()
        } else {
            None
        };

        let mut conn = Connection {
            pool: ServerPool::new(addresses, options.clone()),
            options,
            static_address,
            static_attempts: 0,
            tls_config: None,
            transport: None,
            state: State::Connecting,
            info: ServerInfo::default(),
            last_activity: Instant::now(),
            last_ping: None,
            last_pong: None,
            prolonged_until: None,
        };

        let candidates = cmp::max(conn.pool.servers().len(), 1);
        let mut last_err = Error::new(ErrorKind::PoolExhausted);
        for _ in 0..candidates {
            let address = match &conn.static_address {
                Some(address) => address.clone(),
                None => conn.pool.next_server()?,
            };
            match conn.establish(&address) {
                Ok(()) => return Ok(conn),
                Err(err) if err.kind() == ErrorKind::Tls => {
                    conn.state = State::Failed;
                    return Err(err);
                }
                Err(err) => {
                    log::debug!("failed to connect to {}: {}", address, err);
                    last_err = err;
                }
            }
        }

        conn.state = State::Failed;
        Err(last_err)
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    pub(crate) fn server_info(&self) -> &ServerInfo {
        &self.info
    }

    /// The server pool, empty when a single static endpoint is used.
    pub(crate) fn servers(&self) -> &[Server] {
        self.pool.servers()
    }

    pub(crate) fn last_pong(&self) -> Option<Instant> {
        self.last_pong
    }

    /// Suspends the idle-timeout check until `duration` from now, while a
    /// long-polling request is outstanding.
    pub(crate) fn prolongate(&mut self, duration: Duration) {
        let until = Instant::now() + duration;
        if self.prolonged_until.map_or(true, |current| current < until) {
            self.prolonged_until = Some(until);
        }
    }

    fn tls_config(&mut self) -> Result<Arc<ClientConfig>> {
        if let Some(config) = &self.tls_config {
            return Ok(config.clone());
        }
        let config = Arc::new(configure_tls(&self.options)?);
        self.tls_config = Some(config.clone());
        Ok(config)
    }

    fn tls_session(&mut self, address: &ServerAddress) -> Result<ClientConnection> {
        // Inject random I/O failures when testing.
        inject_io_failure()?;

        let config = self.tls_config()?;
        let server_name = webpki::types::ServerName::try_from(address.host().to_string())
            .map_err(|_| {
                Error::with_source(
                    ErrorKind::Tls,
                    "cannot determine hostname for TLS connection",
                )
            })?;
        ClientConnection::new(config, server_name)
            .map_err(|err| Error::with_source(ErrorKind::Tls, err))
    }

    fn open_socket(&self, address: &ServerAddress) -> Result<TcpStream> {
        let mut last_err =
            io::Error::new(IoErrorKind::AddrNotAvailable, "no socket addresses");
        for addr in address.socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.options.connect_timeout) {
                Ok(tcp) => {
                    tcp.set_nodelay(true)?;
                    tcp.set_read_timeout(Some(self.options.connect_timeout))?;
                    tcp.set_write_timeout(Some(self.options.connect_timeout))?;
                    return Ok(tcp);
                }
                Err(err) => last_err = err,
            }
        }
        Err(last_err.into())
    }

    /// Runs the full handshake against one server and installs the transport.
    fn establish(&mut self, address: &ServerAddress) -> Result<()> {
        let options = self.options.clone();
        let tcp = self.open_socket(address)?;
        let tls_configured = options.tls_required || address.tls_required();

        let (server_info, stream) = if options.tls_first {
            let session = self.tls_session(address)?;
            let stream = NatsStream::new(tcp, Some(session))?;
            stream.handshake()?;
            let server_info = read_info(&stream)?;
            (server_info, stream)
        } else {
            let server_info = read_info(&tcp)?;
            let session = if tls_configured || server_info.tls_required || server_info.tls_verify
            {
                Some(self.tls_session(address)?)
            } else {
                None
            };
            let stream = NatsStream::new(tcp, session)?;
            stream.handshake()?;
            (server_info, stream)
        };

        let mut connect_info = ConnectInfo {
            verbose: options.verbose,
            pedantic: options.pedantic,
            user_jwt: None,
            nkey: None,
            signature: None,
            name: options.name.clone(),
            echo: !options.no_echo,
            lang: crate::LANG.to_string(),
            version: crate::VERSION.to_string(),
            protocol: Protocol::Dynamic,
            tls_required: stream.is_tls(),
            user: None,
            pass: None,
            auth_token: None,
            headers: true,
            no_responders: true,
        };

        let server_auth = address.auth();
        let auth = if let AuthStyle::NoAuth = server_auth {
            &options.auth
        } else {
            &server_auth
        };
        let nonce = Some(server_info.nonce.as_str()).filter(|nonce| !nonce.is_empty());
        auth.apply(&mut connect_info, nonce)?;

        let mut writer = stream.clone();
        proto::encode(&mut writer, &Op::Connect(connect_info))?;
        proto::encode(&mut writer, &Op::Ping)?;
        writer.flush()?;

        let mut reader = BufReader::new(stream.clone());

        // Wait for a PONG.
        loop {
            match proto::decode(&mut reader)? {
                Some(Op::Pong) => break,
                Some(Op::Ping) => {
                    proto::encode(&mut writer, &Op::Pong)?;
                    writer.flush()?;
                }
                Some(Op::Ok) | Some(Op::Info(_)) => {}
                Some(Op::Err(message)) => {
                    return Err(Error::with_source(ErrorKind::Protocol, message));
                }
                Some(op) => {
                    return Err(Error::with_source(
                        ErrorKind::Protocol,
                        format!("unexpected line while connecting: {:?}", op),
                    ));
                }
                None => {
                    return Err(io::Error::new(
                        IoErrorKind::UnexpectedEof,
                        "connection closed while waiting for the first PONG",
                    )
                    .into());
                }
            }
        }

        log::debug!("connected to {} ({})", address, server_info.server_id);

        let now = Instant::now();
        self.transport = Some(Transport { reader, writer });
        self.state = State::Connected;
        self.last_activity = now;
        self.last_ping = None;
        self.last_pong = Some(now);
        self.process_info(server_info);
        Ok(())
    }

    /// Applies an `INFO` from the current server.
    fn process_info(&mut self, info: ServerInfo) {
        if self.static_address.is_some() {
            self.static_attempts = 0;
        } else {
            self.pool.process_cluster_update(&info);
        }

        if info.tls_required
            && !self
                .transport
                .as_ref()
                .map_or(false, |transport| transport.writer.is_tls())
        {
            log::warn!("server requires TLS mid-session, it will be used on reconnect");
        }

        if info.lame_duck_mode {
            self.options.lame_duck_callback.call();
        }

        self.info = info;
    }

    /// Reads the next operation that is relevant to the caller, waiting at
    /// most `timeout`.
    ///
    /// `PING`, `PONG`, `+OK` and `INFO` are handled here. `None` means the
    /// timeout elapsed, or a `PONG` arrived, without a message to deliver.
    pub(crate) fn read_op(&mut self, timeout: Duration) -> Result<Option<Op>> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check_liveness()?;

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let slice = cmp::max(
                cmp::min(deadline - now, READ_SLICE),
                Duration::from_millis(1),
            );

            let op = match self.poll_op(slice)? {
                Some(op) => op,
                None => continue,
            };

            log::trace!("read op: {:?}", op);
            let now = Instant::now();
            self.last_activity = now;

            match op {
                Op::Ping => self.write_op(&Op::Pong)?,
                Op::Pong => {
                    self.last_pong = Some(now);
                    return Ok(None);
                }
                Op::Ok => {}
                Op::Info(info) => self.process_info(info),
                Op::Err(message) => {
                    return Err(Error::with_source(ErrorKind::Protocol, message));
                }
                op @ Op::Msg { .. } => return Ok(Some(op)),
                op => {
                    return Err(Error::with_source(
                        ErrorKind::Protocol,
                        format!("unexpected operation from server: {:?}", op),
                    ))
                }
            }
        }
    }

    fn transport(&mut self) -> Result<&mut Transport> {
        self.transport
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::Closed))
    }

    /// Waits up to `slice` for data and decodes one operation once some is
    /// available.
    fn poll_op(&mut self, slice: Duration) -> Result<Option<Op>> {
        let transport = self.transport()?;
        transport.writer.set_read_timeout(Some(slice))?;

        let ready = match transport.reader.fill_buf() {
            Ok(buf) => !buf.is_empty(),
            Err(err)
                if matches!(
                    err.kind(),
                    IoErrorKind::WouldBlock | IoErrorKind::TimedOut | IoErrorKind::Interrupted
                ) =>
            {
                return Ok(None)
            }
            Err(err) => return Err(err.into()),
        };
        if !ready {
            return Err(io::Error::new(IoErrorKind::UnexpectedEof, "connection closed").into());
        }

        inject_delay();
        match proto::decode(&mut transport.reader)? {
            Some(op) => Ok(Some(op)),
            None => Err(io::Error::new(IoErrorKind::UnexpectedEof, "connection closed").into()),
        }
    }

    fn is_prolonged(&self, now: Instant) -> bool {
        self.prolonged_until.map_or(false, |until| now < until)
    }

    /// Sends a `PING` once the connection has been idle for longer than the
    /// timeout, and fails if that `PING` stays unanswered for a ping
    /// interval.
    fn check_liveness(&mut self) -> Result<()> {
        let now = Instant::now();
        if now.duration_since(self.last_activity) <= self.options.timeout || self.is_prolonged(now)
        {
            return Ok(());
        }

        match self.last_ping {
            Some(ping) if now.duration_since(ping) < self.options.ping_interval => Ok(()),
            Some(ping) if self.last_pong.map_or(true, |pong| pong < ping) => {
                Err(io::Error::new(IoErrorKind::TimedOut, "no PONG received from server").into())
            }
            _ => {
                self.last_ping = Some(now);
                self.write_op(&Op::Ping)
            }
        }
    }

    /// Writes one operation, split into bounded packets.
    pub(crate) fn write_op(&mut self, op: &Op) -> Result<()> {
        let bytes = proto::render(op)?;
        log::trace!("write op: {:?}", op);

        let transport = self.transport()?;
        for packet in bytes.chunks(MAX_PACKET) {
            write_packet(&mut transport.writer, packet)?;
        }
        transport.writer.flush()?;
        Ok(())
    }

    /// Drops the current transport and, when reconnection is enabled, blocks
    /// until a handshake with another server succeeds.
    ///
    /// Subscriptions are not replayed here, the caller owns them.
    pub(crate) fn reconnect(&mut self, cause: Error) -> Result<()> {
        if let Some(transport) = self.transport.take() {
            transport.writer.shutdown();
        }
        if self.state == State::Connected {
            self.options.disconnect_callback.call();
        }
        self.state = State::Disconnected;

        if !self.options.reconnect {
            self.state = State::Failed;
            return Err(cause);
        }

        log::debug!("reconnecting after: {}", cause);
        self.state = State::Reconnecting;

        loop {
            let address = match self.next_address() {
                Ok(address) => address,
                Err(err) => {
                    self.state = State::Failed;
                    return Err(err);
                }
            };

            match self.establish(&address) {
                Ok(()) => break,
                Err(err) if err.kind() == ErrorKind::Tls => {
                    self.state = State::Failed;
                    return Err(err);
                }
                Err(err) => log::debug!("reconnect to {} failed: {}", address, err),
            }
        }

        self.options.reconnect_callback.call();
        Ok(())
    }

    /// The next endpoint to try. A static endpoint is retried until it
    /// answers, only the pool can run out of candidates.
    fn next_address(&mut self) -> Result<ServerAddress> {
        let address = match &self.static_address {
            Some(address) => address.clone(),
            None => {
                if self.pool.is_exhausted() {
                    return Err(Error::with_source(
                        ErrorKind::PoolExhausted,
                        format!(
                            "gave up after {} attempts",
                            self.pool.total_reconnection_attempts()
                        ),
                    ));
                }
                return self.pool.next_server();
            }
        };

        let previous = self.static_attempts;
        self.static_attempts += 1;
        if previous > 0 {
            thread::sleep(self.options.reconnect_delay(previous));
        }
        Ok(address)
    }

    /// Closes the transport. Further operations fail with `Closed`.
    pub(crate) fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.writer.flush().ok();
            transport.writer.shutdown();
        }
        self.state = State::Disconnected;
    }
}

fn write_packet(writer: &mut NatsStream, mut packet: &[u8]) -> Result<()> {
    let mut attempts = 0;
    while !packet.is_empty() {
        match writer.write(packet) {
            Ok(0) => attempts += 1,
            Ok(n) => {
                packet = &packet[n..];
                attempts = 0;
                continue;
            }
            Err(ref err) if err.kind() == IoErrorKind::Interrupted => continue,
            Err(ref err)
                if matches!(err.kind(), IoErrorKind::WouldBlock | IoErrorKind::TimedOut) =>
            {
                attempts += 1
            }
            Err(err) => return Err(err.into()),
        }
        if attempts >= WRITE_ATTEMPTS {
            return Err(io::Error::new(IoErrorKind::WriteZero, "failed to write to socket").into());
        }
    }
    Ok(())
}

/// A raw NATS stream of bytes.
///
/// The stream uses the TCP protocol, optionally secured by TLS.
#[derive(Clone)]
pub(crate) struct NatsStream {
    flavor: Arc<Flavor>,
}

enum Flavor {
    Tcp(TcpStream),
    Tls(Box<Mutex<TlsStream>>),
}

struct TlsStream {
    tcp: TcpStream,
    session: ClientConnection,
    read_timeout: Option<Duration>,
}

impl NatsStream {
    /// Creates a NATS stream from a TCP stream and an optional TLS session.
    fn new(tcp: TcpStream, session: Option<ClientConnection>) -> io::Result<NatsStream> {
        let flavor = match session {
            None => Flavor::Tcp(tcp),
            Some(session) => {
                let read_timeout = tcp.read_timeout()?;
                tcp.set_nonblocking(true)?;
                Flavor::Tls(Box::new(Mutex::new(TlsStream {
                    tcp,
                    session,
                    read_timeout,
                })))
            }
        };
        Ok(NatsStream {
            flavor: Arc::new(flavor),
        })
    }

    fn is_tls(&self) -> bool {
        matches!(&*self.flavor, Flavor::Tls(_))
    }

    /// Drives the TLS handshake to completion. Any failure is a `Tls` error,
    /// so it is never retried.
    fn handshake(&self) -> Result<()> {
        let tls = match &*self.flavor {
            Flavor::Tcp(_) => return Ok(()),
            Flavor::Tls(tls) => tls,
        };
        tls_op(tls, |session, eof| {
            if !session.is_handshaking() {
                Ok(())
            } else if eof {
                Err(io::Error::new(
                    IoErrorKind::UnexpectedEof,
                    "connection closed during the handshake",
                ))
            } else {
                Err(IoErrorKind::WouldBlock.into())
            }
        })
        .map_err(|err| Error::with_source(ErrorKind::Tls, format!("handshake failed: {}", err)))
    }

    pub(crate) fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match &*self.flavor {
            Flavor::Tcp(tcp) => tcp.set_read_timeout(timeout),
            Flavor::Tls(tls) => {
                tls.lock().read_timeout = timeout;
                Ok(())
            }
        }
    }

    /// Will attempt to shutdown the underlying stream.
    pub(crate) fn shutdown(&self) {
        match &*self.flavor {
            Flavor::Tcp(tcp) => tcp.shutdown(Shutdown::Both),
            Flavor::Tls(tls) => tls.lock().tcp.shutdown(Shutdown::Both),
        }
        .ok();
    }
}

impl Read for NatsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        <&NatsStream as Read>::read(&mut &*self, buf)
    }
}

impl Read for &NatsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &*self.flavor {
            Flavor::Tcp(tcp) => (&*tcp).read(buf),
            Flavor::Tls(tls) => tls_op(tls, |session, eof| match session.reader().read(buf) {
                Ok(0) if !eof => Err(IoErrorKind::WouldBlock.into()),
                Err(err) if eof && err.kind() == IoErrorKind::WouldBlock => Ok(0),
                res => res,
            }),
        }
    }
}

impl Write for NatsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        <&NatsStream as Write>::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        <&NatsStream as Write>::flush(&mut &*self)
    }
}

impl Write for &NatsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &*self.flavor {
            Flavor::Tcp(tcp) => (&*tcp).write(buf),
            Flavor::Tls(tls) => tls_op(tls, |session, _| session.writer().write(buf)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &*self.flavor {
            Flavor::Tcp(tcp) => (&*tcp).flush(),
            Flavor::Tls(tls) => tls_op(tls, |session, _| {
                session.writer().flush()?;
                if session.wants_write() {
                    Err(IoErrorKind::WouldBlock.into())
                } else {
                    Ok(())
                }
            }),
        }
    }
}

/// Performs a blocking operation on a TLS stream.
///
/// However, note that the inner TCP stream is in non-blocking mode.
fn tls_op<T>(
    tls: &Mutex<TlsStream>,
    mut op: impl FnMut(&mut ClientConnection, bool) -> io::Result<T>,
) -> io::Result<T> {
    loop {
        let mut tls = tls.lock();
        let TlsStream { tcp, session, .. } = &mut *tls;
        let mut eof = false;

        // If necessary, read TLS messages.
        if session.wants_read() {
            match session.read_tls(tcp) {
                Ok(0) => eof = true,
                Ok(_) => {
                    session
                        .process_new_packets()
                        .map_err(|err| io::Error::new(IoErrorKind::InvalidData, err))?;
                }
                Err(err) if err.kind() == IoErrorKind::WouldBlock => {}
                Err(err) => return Err(err),
            }
        }

        // If necessary, write TLS messages.
        if session.wants_write() {
            match session.write_tls(tcp) {
                Ok(_) => {}
                Err(err) if err.kind() == IoErrorKind::WouldBlock => {}
                Err(err) => return Err(err),
            }
        }

        // Try the non-blocking read/write/flush operation.
        match op(session, eof) {
            Err(err) if err.kind() == IoErrorKind::WouldBlock => {}
            res => return res,
        }

        tls_wait(tls)?;
    }
}

/// Waits until the TLS stream becomes ready, or the read timeout elapses.
fn tls_wait(mut tls: MutexGuard<'_, TlsStream>) -> io::Result<()> {
    #[cfg(unix)]
    use {
        libc::{self as sys, poll, pollfd},
        std::os::unix::io::AsRawFd,
    };
    #[cfg(windows)]
    use {
        std::os::windows::io::AsRawSocket,
        winapi::um::winsock2::{self as sys, WSAPoll as poll, WSAPOLLFD as pollfd},
    };

    let TlsStream {
        tcp,
        session,
        read_timeout,
    } = &mut *tls;

    // Initialize a pollfd object with readiness events we're looking for.
    #[allow(trivial_numeric_casts)]
    let mut pollfd = pollfd {
        #[cfg(unix)]
        fd: tcp.as_raw_fd() as _,
        #[cfg(windows)]
        fd: tcp.as_raw_socket() as _,
        #[cfg(unix)]
        events: sys::POLLERR,
        #[cfg(windows)]
        events: 0,
        revents: 0,
    };
    if session.wants_read() {
        pollfd.events |= sys::POLLIN;
    }
    if session.wants_write() {
        pollfd.events |= sys::POLLOUT;
    }

    let timeout_ms: i32 = match read_timeout {
        Some(timeout) => i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX),
        None => -1,
    };

    // Make sure to drop the lock before blocking on `poll()`!
    // This way concurrent operations on the TLS stream won't block each other.
    drop(tls);

    // Wait until the TCP stream becomes ready.
    loop {
        #[allow(unsafe_code)]
        let ready = unsafe { poll(&mut pollfd, 1, timeout_ms) };
        match ready {
            0 => return Err(IoErrorKind::TimedOut.into()),
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() != IoErrorKind::Interrupted {
                    return Err(err);
                }
            }
            _ => return Ok(()),
        }
    }
}
