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

//! A single-threaded NATS server for tests.
//!
//! It speaks the client protocol (`CONNECT`, `PUB`/`HPUB`, `SUB`, `UNSUB`,
//! `PING`/`PONG`), answers requests nobody listens to with a `503` status
//! when the client asked for it, can advertise cluster URLs and lame-duck
//! mode, can require TLS with a self-signed certificate, and emulates the
//! JetStream API needed by pull consumers.

use std::{
    any::Any,
    collections::{BTreeMap, HashMap, VecDeque},
    fmt::Display,
    io::{self, Read, Write},
    mem::ManuallyDrop,
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread,
    thread::JoinHandle,
    time::Duration,
};

use nkeys::KeyPair;
use rand::{thread_rng, Rng};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use rustls::{ServerConnection, StreamOwned};
use serde_json::{json, Value};

mod jetstream;
mod protocol;

pub use jetstream::JetStreamState;

use jetstream::{ACK_PREFIX, API_PREFIX};
use protocol::Command;

/// How clients have to authenticate.
#[derive(Clone, Debug)]
enum Auth {
    None,
    Token(String),
    UserPass(String, String),
    NKey(String),
}

/// Server side of TLS, and the certificate clients have to trust.
#[derive(Clone, Debug)]
struct Tls {
    config: Arc<rustls::ServerConfig>,
    certificate: CertificateDer<'static>,
}

#[derive(Clone, Debug)]
struct Config {
    bugginess: Option<u32>,
    connect_urls: Vec<String>,
    auth: Auth,
    answer_pings: bool,
    tls: Option<Tls>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            bugginess: None,
            connect_urls: Vec::new(),
            auth: Auth::None,
            answer_pings: true,
            tls: None,
        }
    }
}

/// Changes requested while the server runs.
#[derive(Default)]
struct Control {
    version: u64,
    connect_urls: Option<Vec<String>>,
    lame_duck: bool,
    evict: bool,
}

/// A message on its way to subscribers.
#[derive(Debug, Clone)]
pub(crate) struct Outgoing {
    pub(crate) subject: String,
    /// Deliver to subscriptions on this subject instead of `subject`.
    pub(crate) inbox: Option<String>,
    pub(crate) reply: Option<String>,
    pub(crate) headers: Option<Vec<u8>>,
    pub(crate) body: Vec<u8>,
    /// Publishing client, 0 for the server itself.
    pub(crate) origin: usize,
    pub(crate) no_responders: bool,
}

struct Subscription {
    subject: String,
    queue: Option<String>,
    max: Option<u64>,
    delivered: u64,
}

/// A client socket, upgraded to TLS right after `INFO` when required.
enum Socket {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ServerConnection, TcpStream>>),
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Socket::Plain(tcp) => tcp.read(buf),
            Socket::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Socket::Plain(tcp) => tcp.write(buf),
            Socket::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Socket::Plain(tcp) => tcp.flush(),
            Socket::Tls(tls) => tls.flush(),
        }
    }
}

struct Client {
    client_id: usize,
    socket: Socket,
    buf: Vec<u8>,
    connected: bool,
    verbose: bool,
    echo: bool,
    headers: bool,
    no_responders: bool,
    pongs_sent: usize,
    subs: HashMap<String, Subscription>,
}

/// A test server for NATS-based systems that can inject
/// failures.
pub struct NatsTestServer {
    address: SocketAddr,
    config: Config,
    control: Arc<Mutex<Control>>,
    jetstream: Arc<Mutex<JetStreamState>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

pub struct NatsTestServerBuilder<A> {
    baddr: A,
    config: Config,
    jetstream: Arc<Mutex<JetStreamState>>,
}

/// A NATS test server, will be stopped on drop
impl NatsTestServer {
    pub fn build() -> NatsTestServerBuilder<&'static str> {
        NatsTestServerBuilder {
            baddr: "127.0.0.1:0",
            config: Config::default(),
            jetstream: Arc::default(),
        }
    }

    /// Get the socket address on which the test server is listening
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// The server address as a `nats://` URL.
    pub fn url(&self) -> String {
        format!("nats://{}", self.address)
    }

    /// Consume and stop this server, start building a new one on the same
    /// port with the same settings and JetStream contents. The return value
    /// is a builder and so you'll need to call `.spawn()` on it.
    pub fn restart(self) -> NatsTestServerBuilder<SocketAddr> {
        NatsTestServerBuilder {
            baddr: self.address,
            config: self.config.clone(),
            jetstream: self.jetstream.clone(),
        }
    }

    /// Leave the server running and join
    pub fn join(self) -> Result<(), Box<dyn Any + Send>> {
        let mut server = ManuallyDrop::new(self);
        match server.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }

    /// Sends a fresh `INFO` advertising `connect_urls` to every client.
    pub fn advertise(&self, connect_urls: Vec<String>) {
        let mut control = lock(&self.control);
        control.connect_urls = Some(connect_urls);
        control.version += 1;
    }

    /// Sends an `INFO` with `ldm` set to every client.
    pub fn enter_lame_duck_mode(&self) {
        let mut control = lock(&self.control);
        control.lame_duck = true;
        control.version += 1;
    }

    /// Drops every client connection, the listener stays up.
    pub fn evict_all(&self) {
        lock(&self.control).evict = true;
    }

    /// The emulated JetStream state, for assertions.
    pub fn jetstream(&self) -> MutexGuard<'_, JetStreamState> {
        lock(&self.jetstream)
    }

    /// The self-signed certificate clients have to trust, when TLS is
    /// required.
    pub fn tls_certificate(&self) -> Option<CertificateDer<'static>> {
        self.config.tls.as_ref().map(|tls| tls.certificate.clone())
    }
}

impl Drop for NatsTestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if let Err(_err) = handle.join() {
                log::warn!("Error joining TestNats server thread for shutdown");
            }
            log::debug!("Stopped server");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<A: ToSocketAddrs + Display + Send + 'static> NatsTestServerBuilder<A> {
    ///  Address for server to listen for NATS connections
    pub fn address<B>(self, baddr: B) -> NatsTestServerBuilder<B> {
        NatsTestServerBuilder {
            baddr,
            config: self.config,
            jetstream: self.jetstream,
        }
    }

    /// Set the denominator of the probablity of a bug
    pub fn bugginess(mut self, bugginess: u32) -> Self {
        self.config.bugginess = Some(bugginess);
        self
    }

    /// URLs advertised in `connect_urls`.
    pub fn connect_urls(mut self, connect_urls: Vec<String>) -> Self {
        self.config.connect_urls = connect_urls;
        self
    }

    pub fn token(mut self, token: &str) -> Self {
        self.config.auth = Auth::Token(token.to_string());
        self
    }

    pub fn user_pass(mut self, user: &str, pass: &str) -> Self {
        self.config.auth = Auth::UserPass(user.to_string(), pass.to_string());
        self
    }

    /// Require clients to sign the nonce with the key behind `public_key`.
    pub fn nkey(mut self, public_key: &str) -> Self {
        self.config.auth = Auth::NKey(public_key.to_string());
        self
    }

    /// When false, only the `PING` of the handshake gets a `PONG`.
    pub fn answer_pings(mut self, answer_pings: bool) -> Self {
        self.config.answer_pings = answer_pings;
        self
    }

    /// Require TLS after `INFO`, with a fresh self-signed certificate for
    /// `localhost`.
    pub fn tls(mut self) -> Self {
        let certified =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let certificate = certified.cert.der().clone();
        let key = PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());
        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![certificate.clone()], key.into())
            .unwrap();
        self.config.tls = Some(Tls {
            config: Arc::new(config),
            certificate,
        });
        self
    }

    /// Spawn the server on a thread, returns controller struct which will stop
    /// the server on drop
    pub fn spawn(self) -> NatsTestServer {
        let listener = TcpListener::bind(&self.baddr).unwrap();
        let listen_addr = listener.local_addr().unwrap();
        log::info!(
            "nats test server started on {} (requested {})",
            listen_addr,
            &self.baddr,
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        let control = Arc::new(Mutex::new(Control::default()));
        let server = Server {
            listener,
            config: self.config.clone(),
            control: control.clone(),
            jetstream: self.jetstream.clone(),
            shutdown: shutdown.clone(),
            nonce: thread_rng()
                .sample_iter(&rand::distributions::Alphanumeric)
                .take(22)
                .map(char::from)
                .collect(),
        };
        let handle = Some(thread::spawn(move || server.run()));

        NatsTestServer {
            address: listen_addr,
            config: self.config,
            control,
            jetstream: self.jetstream,
            handle,
            shutdown,
        }
    }
}

struct Server {
    listener: TcpListener,
    config: Config,
    control: Arc<Mutex<Control>>,
    jetstream: Arc<Mutex<JetStreamState>>,
    shutdown: Arc<AtomicBool>,
    nonce: String,
}

impl Server {
    fn info(&self, client_id: usize, connect_urls: &[String], lame_duck: bool) -> Vec<u8> {
        let address = self.listener.local_addr().ok();
        let mut info = json!({
            "server_id": "test",
            "server_name": "test",
            "host": address.map(|a| a.ip().to_string()).unwrap_or_default(),
            "port": address.map_or(0, |a| a.port()),
            "version": "2.10.0",
            "proto": 1,
            "headers": true,
            "jetstream": true,
            "max_payload": 1024 * 1024,
            "client_id": client_id,
            "auth_required": !matches!(self.config.auth, Auth::None),
            "tls_required": self.config.tls.is_some(),
            "nonce": self.nonce,
        });
        if !connect_urls.is_empty() {
            info["connect_urls"] = json!(connect_urls);
        }
        if lame_duck {
            info["ldm"] = json!(true);
        }
        format!("INFO {}\r\n", info).into_bytes()
    }

    /// Sends `INFO` on a fresh connection and upgrades it to TLS when
    /// required.
    fn accept(&self, mut socket: TcpStream, client_id: usize, info: &[u8]) -> io::Result<Client> {
        socket.set_nonblocking(false)?;
        socket.set_read_timeout(Some(Duration::from_millis(1)))?;
        socket.write_all(info)?;
        let socket = match &self.config.tls {
            None => Socket::Plain(socket),
            Some(tls) => {
                let session = ServerConnection::new(tls.config.clone())
                    .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
                Socket::Tls(Box::new(StreamOwned::new(session, socket)))
            }
        };
        Ok(Client::new(client_id, socket))
    }

    fn run(self) {
        self.listener.set_nonblocking(true).unwrap();
        lock(&self.jetstream).forget_waiting();

        let mut clients: BTreeMap<usize, Client> = BTreeMap::new();
        let mut max_client_id = 0;
        let mut seen_version = 0;
        let mut connect_urls = self.config.connect_urls.clone();
        let mut lame_duck = false;

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }

            // this makes it nice and bad
            let simulated_failure = !clients.is_empty()
                && self
                    .config
                    .bugginess
                    .map_or(false, |bugginess| thread_rng().gen_ratio(1, bugginess.max(1)));
            if simulated_failure {
                log::debug!("evicting all connected clients");
                clients.clear();
            }

            let (version, evict) = {
                let mut control = lock(&self.control);
                if let Some(urls) = control.connect_urls.take() {
                    connect_urls = urls;
                }
                lame_duck |= control.lame_duck;
                (control.version, std::mem::take(&mut control.evict))
            };
            if evict {
                log::debug!("evicting {} clients on request", clients.len());
                clients.clear();
            }
            if version != seen_version {
                seen_version = version;
                for (client_id, client) in clients.iter_mut() {
                    let info = self.info(*client_id, &connect_urls, lame_duck);
                    let _unchecked = client.socket.write_all(&info);
                }
            }

            // maybe accept a new client
            match self.listener.accept() {
                Ok((socket, _addr)) => {
                    log::debug!("new client connected");
                    max_client_id += 1;
                    let client_id = max_client_id;
                    let info = self.info(client_id, &connect_urls, lame_duck);
                    match self.accept(socket, client_id, &info) {
                        Ok(client) => {
                            clients.insert(client_id, client);
                        }
                        Err(err) => log::debug!("{}: failed to accept: {}", client_id, err),
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    if clients.is_empty() {
                        thread::sleep(Duration::from_millis(1));
                    }
                }
                Err(err) => log::debug!("accept failed: {}", err),
            }

            let mut to_evict = vec![];
            let mut in_flight = VecDeque::new();

            for (client_id, client) in &mut clients {
                match client.poll(&self.config, &self.nonce) {
                    Ok(published) => in_flight.extend(published),
                    Err(reason) => {
                        log::debug!("{}: {} caused eviction", client_id, reason);
                        to_evict.push(*client_id);
                    }
                }
            }

            while let Some(client_id) = to_evict.pop() {
                log::debug!("client {} evicted", client_id);
                clients.remove(&client_id);
            }

            in_flight
                .extend(lock(&self.jetstream).poll_waiting(|client| clients.contains_key(&client)));

            while let Some(message) = in_flight.pop_front() {
                log::trace!("emitting msg on {}", message.subject);
                if let Some(api) = message.subject.strip_prefix(API_PREFIX) {
                    let replies = lock(&self.jetstream).handle_api(
                        api,
                        &message.body,
                        message.reply.as_deref(),
                        message.origin,
                    );
                    in_flight.extend(replies);
                    continue;
                }
                if message.subject.starts_with(ACK_PREFIX) {
                    lock(&self.jetstream).ack(&message.subject, &message.body);
                    continue;
                }

                // deliveries made by the server are never stored again
                let captured = if message.origin == 0 {
                    None
                } else {
                    lock(&self.jetstream).capture(&message)
                };
                let delivered = route(&mut clients, &message);
                match (captured, &message.reply) {
                    (Some(acks), _) => in_flight.extend(acks),
                    (None, Some(reply)) if delivered == 0 && message.no_responders => {
                        in_flight.push_back(Outgoing::status(reply, 503, ""));
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Delivers `message` to every matching subscription, and to one member of
/// every matching queue group. Returns the number of deliveries.
fn route(clients: &mut BTreeMap<usize, Client>, message: &Outgoing) -> usize {
    let target = message.inbox.as_deref().unwrap_or(&message.subject);
    let mut targets = vec![];
    let mut groups: BTreeMap<String, Vec<(usize, String)>> = BTreeMap::new();

    for (client_id, client) in clients.iter() {
        if *client_id == message.origin && !client.echo {
            continue;
        }
        for (sid, sub) in &client.subs {
            if !subject_match(target, &sub.subject) {
                continue;
            }
            match &sub.queue {
                Some(queue) => groups
                    .entry(queue.clone())
                    .or_default()
                    .push((*client_id, sid.clone())),
                None => targets.push((*client_id, sid.clone())),
            }
        }
    }
    for members in groups.values() {
        let pick = thread_rng().gen_range(0..members.len());
        targets.push(members[pick].clone());
    }

    let mut delivered = 0;
    for (client_id, sid) in targets {
        let client = match clients.get_mut(&client_id) {
            Some(client) => client,
            None => continue,
        };
        let headers = message.headers.as_deref().filter(|_| client.headers);
        let frame = protocol::message_frame(
            &message.subject,
            &sid,
            message.reply.as_deref(),
            headers,
            &message.body,
        );
        log::trace!("{}: sending {} bytes", client_id, frame.len());
        if client.socket.write_all(&frame).is_ok() {
            delivered += 1;
            client.count_delivery(&sid);
        }
    }
    delivered
}

impl Client {
    fn new(client_id: usize, socket: Socket) -> Client {
        Client {
            client_id,
            socket,
            buf: Vec::new(),
            connected: false,
            verbose: false,
            echo: true,
            headers: false,
            no_responders: false,
            pongs_sent: 0,
            subs: HashMap::new(),
        }
    }

    /// Reads what is available and handles every complete command.
    fn poll(&mut self, config: &Config, nonce: &str) -> Result<Vec<Outgoing>, String> {
        let mut chunk = [0; 16 * 1024];
        loop {
            match self.socket.read(&mut chunk) {
                Ok(0) => return Err("connection closed".to_string()),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        break;
                    }
                }
                Err(err)
                    if err.kind() == io::ErrorKind::WouldBlock
                        || err.kind() == io::ErrorKind::TimedOut =>
                {
                    break
                }
                Err(err) => return Err(err.to_string()),
            }
        }

        let mut published = vec![];
        while let Some(command) = protocol::parse(&mut self.buf)? {
            log::trace!("{}: got command {:?}", self.client_id, command);
            if let Some(message) = self.handle_command(command, config, nonce)? {
                published.push(message);
            }
        }
        Ok(published)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), String> {
        self.socket.write_all(bytes).map_err(|err| err.to_string())
    }

    fn ok(&mut self) -> Result<(), String> {
        if self.verbose {
            self.write(b"+OK\r\n")?;
        }
        Ok(())
    }

    fn handle_command(
        &mut self,
        command: Command,
        config: &Config,
        nonce: &str,
    ) -> Result<Option<Outgoing>, String> {
        if !self.connected && !matches!(command, Command::Connect(_)) {
            let _unchecked = self.write(b"-ERR 'Authorization Violation'\r\n");
            return Err("command before CONNECT".to_string());
        }

        match command {
            Command::Connect(info) => {
                if !authorize(&config.auth, &info, nonce) {
                    let _unchecked = self.write(b"-ERR 'Authorization Violation'\r\n");
                    return Err("authorization violation".to_string());
                }
                self.connected = true;
                self.verbose = info["verbose"].as_bool().unwrap_or(false);
                self.echo = info["echo"].as_bool().unwrap_or(true);
                self.headers = info["headers"].as_bool().unwrap_or(false);
                self.no_responders = info["no_responders"].as_bool().unwrap_or(false);
                self.ok()?;
                Ok(None)
            }
            Command::Ping => {
                if config.answer_pings || self.pongs_sent == 0 {
                    self.write(b"PONG\r\n")?;
                    self.pongs_sent += 1;
                }
                Ok(None)
            }
            Command::Pong => Ok(None),
            Command::Sub {
                subject,
                queue,
                sid,
            } => {
                self.subs.insert(
                    sid,
                    Subscription {
                        subject,
                        queue,
                        max: None,
                        delivered: 0,
                    },
                );
                self.ok()?;
                Ok(None)
            }
            Command::Unsub { sid, max } => {
                match (self.subs.get_mut(&sid), max) {
                    (Some(sub), Some(max)) if sub.delivered < max => sub.max = Some(max),
                    _ => {
                        self.subs.remove(&sid);
                    }
                }
                self.ok()?;
                Ok(None)
            }
            Command::Pub {
                subject,
                reply,
                headers,
                body,
            } => {
                self.ok()?;
                Ok(Some(Outgoing {
                    subject,
                    inbox: None,
                    reply,
                    headers,
                    body,
                    origin: self.client_id,
                    no_responders: self.no_responders,
                }))
            }
        }
    }

    fn count_delivery(&mut self, sid: &str) {
        let done = match self.subs.get_mut(sid) {
            Some(sub) => {
                sub.delivered += 1;
                sub.max.map_or(false, |max| sub.delivered >= max)
            }
            None => false,
        };
        if done {
            self.subs.remove(sid);
        }
    }
}

fn authorize(auth: &Auth, info: &Value, nonce: &str) -> bool {
    match auth {
        Auth::None => true,
        Auth::Token(token) => info["auth_token"].as_str() == Some(token.as_str()),
        Auth::UserPass(user, pass) => {
            info["user"].as_str() == Some(user.as_str())
                && info["pass"].as_str() == Some(pass.as_str())
        }
        Auth::NKey(public_key) => {
            let signature = info["sig"]
                .as_str()
                .and_then(|sig| base64_url::decode(sig).ok());
            match (info["nkey"].as_str(), signature) {
                (Some(nkey), Some(signature)) if nkey == public_key => {
                    KeyPair::from_public_key(nkey)
                        .map(|kp| kp.verify(nonce.as_bytes(), &signature).is_ok())
                        .unwrap_or(false)
                }
                _ => false,
            }
        }
    }
}

/// Does the subject match the pattern
pub(crate) fn subject_match(subject: &str, subject_pattern: &str) -> bool {
    let mut pattern_parts = subject_pattern.split('.');
    for subject_part in subject.split('.') {
        if let Some(pattern_part) = pattern_parts.next() {
            if pattern_part == ">" {
                return true;
            } else if pattern_part == subject_part || pattern_part == "*" {
                continue;
            }
        }
        return false;
    }
    pattern_parts.next().is_none()
}

#[test]
fn test_subject_match() {
    assert!(subject_match("sub", "sub"));
    assert!(subject_match("sub", "*"));
    assert!(subject_match("sub", ">"));
    assert!(!subject_match("pub", "sub"));
    assert!(subject_match("sub.pub", "sub.pub"));
    assert!(subject_match("sub.pub", "sub.*"));
    assert!(subject_match("sub.pub", "*.pub"));
    assert!(subject_match("sub.pub", "*.*"));
    assert!(subject_match("sub.pub", ">"));
    assert!(!subject_match("sub.pub", "sub"));
    assert!(!subject_match("sub.pub", "pub"));
    assert!(!subject_match("sub", "sub.pub"));
}

#[test]
fn test_unused_server_cleanup() {
    let success = Arc::new(AtomicBool::new(false));
    {
        let success = success.clone();
        std::thread::spawn(move || {
            let server = NatsTestServer::build().spawn();
            std::thread::sleep(Duration::from_millis(1));
            std::mem::drop(server);
            success.store(true, Ordering::Release);
        });
    }
    std::thread::sleep(Duration::from_millis(50));
    assert!(success.load(Ordering::Acquire));
}

#[test]
fn test_pub_sub_2_clients() {
    use std::io::BufRead;

    fn connect(server: &NatsTestServer) -> io::BufReader<TcpStream> {
        let mut stream = TcpStream::connect(server.address()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
            .write_all(b"CONNECT {\"verbose\":false,\"pedantic\":false,\"lang\":\"rust\",\"version\":\"0\"}\r\nPING\r\n")
            .unwrap();
        let mut reader = io::BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(line.starts_with("INFO "));
        line.clear();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "PONG\r\n");
        reader
    }

    let server = NatsTestServer::build().spawn();
    let mut conn1 = connect(&server);
    let mut conn2 = connect(&server);

    conn1.get_mut().write_all(b"SUB * 1\r\nPING\r\n").unwrap();
    let mut line = String::new();
    conn1.read_line(&mut line).unwrap();
    assert_eq!(line, "PONG\r\n");

    conn2
        .get_mut()
        .write_all(b"PUB subject 7\r\nmessage\r\n")
        .unwrap();

    line.clear();
    conn1.read_line(&mut line).unwrap();
    assert_eq!(line, "MSG subject 1 7\r\n");
    line.clear();
    conn1.read_line(&mut line).unwrap();
    assert_eq!(line, "message\r\n");
}
