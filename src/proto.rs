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

//! Wire codec for the NATS text protocol.
//!
//! Control lines are CRLF terminated. `PUB`, `HPUB`, `MSG` and `HMSG` are
//! followed by a binary payload frame whose length is declared on the
//! control line.

use std::convert::TryFrom;
use std::io::prelude::*;
use std::io::{self, ErrorKind as IoErrorKind};
use std::str;
use std::thread;
use std::time::Duration;

use crate::connect::ConnectInfo;
use crate::error::{Error, ErrorKind, Result};
use crate::header::HeaderMap;
use crate::message::{AckKind, Payload};
use crate::{inject_io_failure, ServerInfo};

/// Upper bound for a single control line.
pub(crate) const MAX_CONTROL_LINE: usize = 1024 * 1024;

/// How many times a stalled frame read is retried before giving up.
const READ_ATTEMPTS: usize = 10;
const READ_RETRY_DELAY: Duration = Duration::from_millis(10);

/// A protocol operation, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// `INFO {["option_name":option_value],...}`
    Info(ServerInfo),

    /// `CONNECT {["option_name":option_value],...}`
    Connect(ConnectInfo),

    /// `PUB <subject> [reply-to] <#bytes>\r\n[payload]\r\n`, or `HPUB` when
    /// the payload carries headers.
    Pub {
        subject: String,
        reply_to: Option<String>,
        payload: Payload,
    },

    /// `SUB <subject> [queue group] <sid>`
    Sub {
        subject: String,
        queue_group: Option<String>,
        sid: u64,
    },

    /// `UNSUB <sid> [max_msgs]`
    Unsub { sid: u64, max_msgs: Option<u64> },

    /// `MSG <subject> <sid> [reply-to] <#bytes>\r\n[payload]\r\n`, or `HMSG`
    /// when the payload carries headers.
    Msg {
        subject: String,
        sid: u64,
        reply_to: Option<String>,
        payload: Payload,
    },

    /// `PING`
    Ping,

    /// `PONG`
    Pong,

    /// `+OK`
    Ok,

    /// `-ERR <error message>`
    Err(String),

    /// JetStream `+ACK`, sent as a `PUB` to the ack subject.
    Ack { subject: String },

    /// JetStream `-NAK`, with an optional redelivery delay.
    Nak {
        subject: String,
        delay: Option<Duration>,
    },

    /// JetStream `+WPI`, resets the redelivery timer.
    Progress { subject: String },
}

/// Positional arguments of a `MSG`/`HMSG` control line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgArgs {
    pub subject: String,
    pub sid: u64,
    pub reply_to: Option<String>,
    pub header_len: Option<usize>,
    pub total_len: usize,
}

/// Positional arguments of a `PUB`/`HPUB` control line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubArgs {
    pub subject: String,
    pub reply_to: Option<String>,
    pub header_len: Option<usize>,
    pub total_len: usize,
}

/// A parsed control line. Frame-carrying operations still need their payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Op(Op),
    Msg(MsgArgs),
    Pub(PubArgs),
}

fn parse_error<T>(msg: impl Into<String>) -> Result<T> {
    let msg = msg.into();
    log::trace!("control line parse error: {}", msg);
    Err(Error::with_source(ErrorKind::Parse, msg))
}

fn parse_number<T: str::FromStr>(token: &str, what: &str) -> Result<T> {
    token
        .parse()
        .or_else(|_| parse_error(format!("cannot parse {} from {:?}", what, token)))
}

fn looks_numeric(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

fn check_lengths(header_len: Option<usize>, total_len: usize) -> Result<()> {
    match header_len {
        Some(header_len) if header_len > total_len => Err(Error::with_source(
            ErrorKind::PayloadLength,
            format!(
                "header length {} exceeds total length {}",
                header_len, total_len
            ),
        )),
        _ => Ok(()),
    }
}

/// Disambiguates the positional fields of a `MSG`/`HMSG` line.
///
/// With four fields, a purely numeric third field is a header length rather
/// than a reply subject.
pub fn parse_msg_args(args: &[&str]) -> Result<MsgArgs> {
    let (subject, sid, reply_to, header_len, total_len) = match *args {
        [subject, sid, total_len] => (subject, sid, None, None, total_len),
        [subject, sid, third, total_len] if looks_numeric(third) => {
            (subject, sid, None, Some(third), total_len)
        }
        [subject, sid, reply_to, total_len] => (subject, sid, Some(reply_to), None, total_len),
        [subject, sid, reply_to, header_len, total_len] => {
            (subject, sid, Some(reply_to), Some(header_len), total_len)
        }
        _ => {
            return parse_error(format!(
                "invalid number of arguments after MSG: {}",
                args.len()
            ))
        }
    };

    let header_len = match header_len {
        Some(token) => Some(parse_number(token, "header length")?),
        None => None,
    };
    let total_len = parse_number(total_len, "payload length")?;
    check_lengths(header_len, total_len)?;

    Ok(MsgArgs {
        subject: subject.to_string(),
        sid: parse_number(sid, "sid")?,
        reply_to: reply_to.map(ToString::to_string),
        header_len,
        total_len,
    })
}

fn parse_pub_args(args: &[&str], with_headers: bool) -> Result<PubArgs> {
    let (subject, reply_to, header_len, total_len) = match (args, with_headers) {
        (&[subject, total_len], false) => (subject, None, None, total_len),
        (&[subject, reply_to, total_len], false) => (subject, Some(reply_to), None, total_len),
        (&[subject, header_len, total_len], true) => (subject, None, Some(header_len), total_len),
        (&[subject, reply_to, header_len, total_len], true) => {
            (subject, Some(reply_to), Some(header_len), total_len)
        }
        _ => {
            return parse_error(format!(
                "invalid number of arguments after PUB: {}",
                args.len()
            ))
        }
    };

    let header_len = match header_len {
        Some(token) => Some(parse_number(token, "header length")?),
        None => None,
    };
    let total_len = parse_number(total_len, "payload length")?;
    check_lengths(header_len, total_len)?;

    Ok(PubArgs {
        subject: subject.to_string(),
        reply_to: reply_to.map(ToString::to_string),
        header_len,
        total_len,
    })
}

/// Parses a single control line, with or without its trailing CRLF.
pub fn parse_line(line: &str) -> Result<Line> {
    let line = line.trim_end_matches(|c| c == '\r' || c == '\n');

    match line.to_ascii_uppercase().as_str() {
        "+OK" => return Ok(Line::Op(Op::Ok)),
        "PING" => return Ok(Line::Op(Op::Ping)),
        "PONG" => return Ok(Line::Op(Op::Pong)),
        _ => {}
    }

    let (kind, rest) = line.split_once(' ').unwrap_or((line, ""));
    let args: Vec<&str> = rest.split_ascii_whitespace().collect();

    let line = match kind.to_ascii_uppercase().as_str() {
        "INFO" => Line::Op(Op::Info(serde_json::from_str(rest.trim())?)),
        "CONNECT" => Line::Op(Op::Connect(serde_json::from_str(rest.trim())?)),
        "-ERR" => Line::Op(Op::Err(rest.trim().trim_matches('\'').to_string())),
        "MSG" => Line::Msg(parse_msg_args(&args)?),
        "HMSG" => {
            let args = parse_msg_args(&args)?;
            if args.header_len.is_none() {
                return parse_error("HMSG without a header length");
            }
            Line::Msg(args)
        }
        "PUB" => Line::Pub(parse_pub_args(&args, false)?),
        "HPUB" => Line::Pub(parse_pub_args(&args, true)?),
        "SUB" => match *args {
            [subject, sid] => Line::Op(Op::Sub {
                subject: subject.to_string(),
                queue_group: None,
                sid: parse_number(sid, "sid")?,
            }),
            [subject, queue_group, sid] => Line::Op(Op::Sub {
                subject: subject.to_string(),
                queue_group: Some(queue_group.to_string()),
                sid: parse_number(sid, "sid")?,
            }),
            _ => return parse_error("invalid number of arguments after SUB"),
        },
        "UNSUB" => match *args {
            [sid] => Line::Op(Op::Unsub {
                sid: parse_number(sid, "sid")?,
                max_msgs: None,
            }),
            [sid, max_msgs] => Line::Op(Op::Unsub {
                sid: parse_number(sid, "sid")?,
                max_msgs: Some(parse_number(max_msgs, "max_msgs")?),
            }),
            _ => return parse_error("invalid number of arguments after UNSUB"),
        },
        _ => {
            return Err(Error::with_source(
                ErrorKind::Protocol,
                format!("unknown protocol operation: {:?}", line),
            ))
        }
    };

    Ok(line)
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), IoErrorKind::WouldBlock | IoErrorKind::TimedOut)
}

// adapted from `std::io::BufRead::read_until`, with a size cap and a bounded
// number of retries when the socket read times out mid-line.
fn read_line<R: BufRead + ?Sized>(r: &mut R, buf: &mut Vec<u8>) -> Result<usize> {
    let mut attempts = 0;
    loop {
        let available = match r.fill_buf() {
            Ok(n) => n,
            Err(ref e) if e.kind() == IoErrorKind::Interrupted => continue,
            Err(ref e) if is_timeout(e) && !buf.is_empty() && attempts < READ_ATTEMPTS => {
                attempts += 1;
                thread::sleep(READ_RETRY_DELAY);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let (done, len) = match memchr::memchr(b'\n', available) {
            Some(i) => (true, i + 1),
            None => (false, available.len()),
        };
        if buf.len() + len > MAX_CONTROL_LINE {
            return parse_error("received command exceeded maximum control line");
        }
        buf.extend_from_slice(&available[..len]);
        r.consume(len);
        if done || len == 0 {
            return Ok(buf.len());
        }
    }
}

/// Reads `len` payload bytes. When the peer stalls, the read is retried a
/// bounded number of times and whatever arrived is returned, flagged as
/// incomplete.
fn read_payload<R: Read + ?Sized>(r: &mut R, len: usize) -> Result<(Vec<u8>, bool)> {
    let mut buf = vec![0; len];
    let mut filled = 0;
    let mut attempts = 0;
    while filled < len {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    IoErrorKind::UnexpectedEof,
                    "connection closed while reading payload",
                )
                .into())
            }
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == IoErrorKind::Interrupted => {}
            Err(ref e) if is_timeout(e) => {
                attempts += 1;
                if attempts >= READ_ATTEMPTS {
                    log::warn!(
                        "gave up reading payload after {} of {} bytes",
                        filled,
                        len
                    );
                    buf.truncate(filled);
                    return Ok((buf, false));
                }
                thread::sleep(READ_RETRY_DELAY);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok((buf, true))
}

fn read_frame<R: BufRead + ?Sized>(
    r: &mut R,
    header_len: Option<usize>,
    total_len: usize,
) -> Result<Payload> {
    let (mut buf, complete) = read_payload(r, total_len)?;

    if complete {
        let mut crlf = [0; 2];
        r.read_exact(&mut crlf)?;
        if &crlf != b"\r\n" {
            return Err(Error::with_source(
                ErrorKind::PayloadLength,
                format!("expected CRLF after {} payload bytes", total_len),
            ));
        }
    }

    match header_len {
        Some(header_len) => {
            let split = header_len.min(buf.len());
            let body = buf.split_off(split);
            let headers = HeaderMap::try_from(&buf[..])?;
            Ok(Payload { body, headers })
        }
        None => Ok(Payload::new(buf)),
    }
}

fn into_ack(subject: String, reply_to: Option<String>, payload: Payload) -> Op {
    if reply_to.is_none() && payload.headers.is_empty() {
        match AckKind::from_bytes(&payload.body) {
            Some(AckKind::Ack) => return Op::Ack { subject },
            Some(AckKind::Nak(delay)) => return Op::Nak { subject, delay },
            Some(AckKind::Progress) => return Op::Progress { subject },
            _ => {}
        }
    }
    Op::Pub {
        subject,
        reply_to,
        payload,
    }
}

/// Decodes a single operation, including its payload frame.
///
/// If the connection is closed, `None` will be returned.
pub fn decode(mut stream: impl BufRead) -> Result<Option<Op>> {
    // Inject random I/O failures when testing.
    inject_io_failure()?;

    let mut line = Vec::with_capacity(128);
    if read_line(&mut stream, &mut line)? == 0 {
        return Ok(None);
    }
    if !line.ends_with(b"\n") {
        return Err(io::Error::new(
            IoErrorKind::UnexpectedEof,
            "connection closed in the middle of a control line",
        )
        .into());
    }

    let line = str::from_utf8(&line)
        .map_err(|err| Error::with_source(ErrorKind::Parse, err))?;

    let op = match parse_line(line)? {
        Line::Op(op) => op,
        Line::Msg(args) => Op::Msg {
            payload: read_frame(&mut stream, args.header_len, args.total_len)?,
            subject: args.subject,
            sid: args.sid,
            reply_to: args.reply_to,
        },
        Line::Pub(args) => {
            let payload = read_frame(&mut stream, args.header_len, args.total_len)?;
            into_ack(args.subject, args.reply_to, payload)
        }
    };

    Ok(Some(op))
}

fn check_token(token: &str, what: &str) -> Result<()> {
    if token.is_empty() || token.bytes().any(|b| b.is_ascii_whitespace()) {
        return Err(Error::with_source(
            ErrorKind::InvalidArgument,
            format!("invalid {}: {:?}", what, token),
        ));
    }
    Ok(())
}

fn push_frame_line(
    buf: &mut Vec<u8>,
    op: &str,
    subject: &str,
    sid: Option<u64>,
    reply_to: Option<&str>,
    payload: &Payload,
) -> Result<()> {
    check_token(subject, "subject")?;
    if let Some(reply_to) = reply_to {
        check_token(reply_to, "reply subject")?;
    }

    let mut itoa = itoa::Buffer::new();
    let headers = if payload.headers.is_empty() {
        None
    } else {
        Some(payload.headers.to_bytes())
    };

    if headers.is_some() {
        buf.push(b'H');
    }
    buf.extend_from_slice(op.as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(subject.as_bytes());
    if let Some(sid) = sid {
        buf.push(b' ');
        buf.extend_from_slice(itoa.format(sid).as_bytes());
    }
    if let Some(reply_to) = reply_to {
        buf.push(b' ');
        buf.extend_from_slice(reply_to.as_bytes());
    }
    if let Some(headers) = &headers {
        buf.push(b' ');
        buf.extend_from_slice(itoa.format(headers.len()).as_bytes());
    }
    let header_len = headers.as_ref().map_or(0, Vec::len);
    buf.push(b' ');
    buf.extend_from_slice(itoa.format(header_len + payload.body.len()).as_bytes());
    buf.extend_from_slice(b"\r\n");
    if let Some(headers) = &headers {
        buf.extend_from_slice(headers);
    }
    buf.extend_from_slice(&payload.body);
    buf.extend_from_slice(b"\r\n");
    Ok(())
}

/// Renders an operation into its exact wire bytes, control line CRLF and
/// payload frame included.
pub fn render(op: &Op) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    let mut itoa = itoa::Buffer::new();

    match op {
        Op::Info(info) => {
            buf.extend_from_slice(b"INFO ");
            serde_json::to_writer(&mut buf, info)?;
            buf.extend_from_slice(b"\r\n");
        }
        Op::Connect(connect_info) => {
            buf.extend_from_slice(b"CONNECT ");
            serde_json::to_writer(&mut buf, connect_info)?;
            buf.extend_from_slice(b"\r\n");
        }
        Op::Pub {
            subject,
            reply_to,
            payload,
        } => push_frame_line(&mut buf, "PUB", subject, None, reply_to.as_deref(), payload)?,
        Op::Msg {
            subject,
            sid,
            reply_to,
            payload,
        } => push_frame_line(
            &mut buf,
            "MSG",
            subject,
            Some(*sid),
            reply_to.as_deref(),
            payload,
        )?,
        Op::Sub {
            subject,
            queue_group,
            sid,
        } => {
            check_token(subject, "subject")?;
            buf.extend_from_slice(b"SUB ");
            buf.extend_from_slice(subject.as_bytes());
            if let Some(queue_group) = queue_group {
                check_token(queue_group, "queue group")?;
                buf.push(b' ');
                buf.extend_from_slice(queue_group.as_bytes());
            }
            buf.push(b' ');
            buf.extend_from_slice(itoa.format(*sid).as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Op::Unsub { sid, max_msgs } => {
            buf.extend_from_slice(b"UNSUB ");
            buf.extend_from_slice(itoa.format(*sid).as_bytes());
            if let Some(max_msgs) = max_msgs {
                buf.push(b' ');
                buf.extend_from_slice(itoa.format(*max_msgs).as_bytes());
            }
            buf.extend_from_slice(b"\r\n");
        }
        Op::Ping => buf.extend_from_slice(b"PING\r\n"),
        Op::Pong => buf.extend_from_slice(b"PONG\r\n"),
        Op::Ok => buf.extend_from_slice(b"+OK\r\n"),
        Op::Err(message) => {
            if message.contains(|c| c == '\r' || c == '\n') {
                return Err(Error::with_source(
                    ErrorKind::InvalidArgument,
                    "error message contains a line break",
                ));
            }
            buf.extend_from_slice(b"-ERR '");
            buf.extend_from_slice(message.as_bytes());
            buf.extend_from_slice(b"'\r\n");
        }
        Op::Ack { subject } => {
            let payload = Payload::new(AckKind::Ack.to_bytes());
            push_frame_line(&mut buf, "PUB", subject, None, None, &payload)?;
        }
        Op::Nak { subject, delay } => {
            let payload = Payload::new(AckKind::Nak(*delay).to_bytes());
            push_frame_line(&mut buf, "PUB", subject, None, None, &payload)?;
        }
        Op::Progress { subject } => {
            let payload = Payload::new(AckKind::Progress.to_bytes());
            push_frame_line(&mut buf, "PUB", subject, None, None, &payload)?;
        }
    }

    Ok(buf)
}

/// Encodes an operation onto a stream.
pub(crate) fn encode(mut stream: impl Write, op: &Op) -> Result<()> {
    let bytes = render(op)?;
    stream.write_all(&bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::Protocol;

    fn round_trip(op: Op) {
        let bytes = render(&op).unwrap();
        let decoded = decode(&bytes[..]).unwrap();
        assert_eq!(decoded, Some(op), "wire: {:?}", String::from_utf8_lossy(&bytes));
    }

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Nats-Msg-Id", "1");
        headers.insert("X-Trace", "abc");
        headers
    }

    #[test]
    fn round_trip_control_ops() {
        round_trip(Op::Ping);
        round_trip(Op::Pong);
        round_trip(Op::Ok);
        round_trip(Op::Err("Authorization Violation".to_string()));
        round_trip(Op::Sub {
            subject: "orders.>".to_string(),
            queue_group: None,
            sid: 7,
        });
        round_trip(Op::Sub {
            subject: "orders.*".to_string(),
            queue_group: Some("workers".to_string()),
            sid: 8,
        });
        round_trip(Op::Unsub {
            sid: 7,
            max_msgs: None,
        });
        round_trip(Op::Unsub {
            sid: 7,
            max_msgs: Some(10),
        });
    }

    #[test]
    fn round_trip_info_and_connect() {
        round_trip(Op::Info(ServerInfo {
            server_id: "NABC".to_string(),
            host: "127.0.0.1".to_string(),
            port: 4222,
            max_payload: 1024 * 1024,
            proto: 1,
            headers: true,
            nonce: "nonce".to_string(),
            connect_urls: vec!["10.0.0.1:4222".to_string(), "10.0.0.2:4222".to_string()],
            lame_duck_mode: true,
            ..Default::default()
        }));

        round_trip(Op::Connect(ConnectInfo {
            verbose: false,
            pedantic: false,
            user_jwt: None,
            nkey: Some("UABC".to_string()),
            signature: Some("c2ln".to_string()),
            name: Some("svc".to_string()),
            echo: true,
            lang: crate::LANG.to_string(),
            version: crate::VERSION.to_string(),
            protocol: Protocol::Dynamic,
            tls_required: false,
            user: None,
            pass: None,
            auth_token: None,
            headers: true,
            no_responders: true,
        }));
    }

    #[test]
    fn round_trip_frames() {
        for reply_to in [None, Some("_INBOX.abc".to_string())] {
            for headers in [HeaderMap::new(), headers(), HeaderMap::with_status(404, "No Messages")] {
                for body in [&b""[..], &b"hello"[..], &b"line\r\nbreak"[..]] {
                    let payload = Payload {
                        body: body.to_vec(),
                        headers: headers.clone(),
                    };
                    round_trip(Op::Msg {
                        subject: "orders.new".to_string(),
                        sid: 42,
                        reply_to: reply_to.clone(),
                        payload: payload.clone(),
                    });
                    round_trip(Op::Pub {
                        subject: "orders.new".to_string(),
                        reply_to: reply_to.clone(),
                        payload,
                    });
                }
            }
        }
    }

    #[test]
    fn round_trip_acks() {
        let subject = "$JS.ACK.ORDERS.worker.1.2.3.1600000000000000000.0".to_string();
        round_trip(Op::Ack {
            subject: subject.clone(),
        });
        round_trip(Op::Nak {
            subject: subject.clone(),
            delay: None,
        });
        round_trip(Op::Nak {
            subject: subject.clone(),
            delay: Some(Duration::from_millis(250)),
        });
        round_trip(Op::Progress { subject });
    }

    #[test]
    fn ack_renders_as_pub() {
        let bytes = render(&Op::Ack {
            subject: "$JS.ACK.x".to_string(),
        })
        .unwrap();
        assert_eq!(bytes, b"PUB $JS.ACK.x 4\r\n+ACK\r\n".to_vec());
    }

    #[test]
    fn hpub_wire_format() {
        let bytes = render(&Op::Pub {
            subject: "foo".to_string(),
            reply_to: None,
            payload: Payload::from("hi").with_header("A", "b"),
        })
        .unwrap();
        assert_eq!(bytes, b"HPUB foo 18 20\r\nNATS/1.0\r\nA: b\r\n\r\nhi\r\n".to_vec());
    }

    #[test]
    fn msg_field_count_disambiguation() {
        let args = parse_msg_args(&["foo", "1", "5"]).unwrap();
        assert_eq!(args.reply_to, None);
        assert_eq!(args.header_len, None);
        assert_eq!(args.total_len, 5);

        let args = parse_msg_args(&["foo", "1", "inbox", "5"]).unwrap();
        assert_eq!(args.reply_to.as_deref(), Some("inbox"));
        assert_eq!(args.header_len, None);
        assert_eq!(args.total_len, 5);

        let args = parse_msg_args(&["foo", "1", "5", "10"]).unwrap();
        assert_eq!(args.reply_to, None);
        assert_eq!(args.header_len, Some(5));
        assert_eq!(args.total_len, 10);

        let args = parse_msg_args(&["foo", "1", "inbox", "5", "10"]).unwrap();
        assert_eq!(args.reply_to.as_deref(), Some("inbox"));
        assert_eq!(args.header_len, Some(5));
        assert_eq!(args.total_len, 10);
    }

    #[test]
    fn msg_args_errors() {
        assert_eq!(
            parse_msg_args(&["foo", "1"]).unwrap_err().kind(),
            ErrorKind::Parse
        );
        assert_eq!(
            parse_msg_args(&["foo", "x", "5"]).unwrap_err().kind(),
            ErrorKind::Parse
        );
        assert_eq!(
            parse_msg_args(&["foo", "1", "10", "5"]).unwrap_err().kind(),
            ErrorKind::PayloadLength
        );
    }

    #[test]
    fn literal_lines() {
        assert_eq!(parse_line("PING\r\n").unwrap(), Line::Op(Op::Ping));
        assert_eq!(parse_line("pong").unwrap(), Line::Op(Op::Pong));
        assert_eq!(parse_line("+OK\r\n").unwrap(), Line::Op(Op::Ok));
        assert_eq!(
            parse_line("-ERR 'Stale Connection'\r\n").unwrap(),
            Line::Op(Op::Err("Stale Connection".to_string()))
        );
    }

    #[test]
    fn unknown_operation_is_fatal() {
        let err = parse_line("HELLO world").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(decode(&b"WAT\r\n"[..]).is_err());
    }

    #[test]
    fn hmsg_requires_header_length() {
        let err = parse_line("HMSG foo 1 inbox 5").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn decode_reports_closed_stream() {
        assert_eq!(decode(&b""[..]).unwrap(), None);
        let err = decode(&b"MSG foo 1 5\r\nhel"[..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn decode_rejects_missing_trailer() {
        let err = decode(&b"MSG foo 1 2\r\nhixx"[..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PayloadLength);
    }

    #[test]
    fn decode_no_messages_sentinel() {
        let wire = b"HMSG _INBOX.x 3 28 28\r\nNATS/1.0 404 No Messages\r\n\r\n\r\n";
        match decode(&wire[..]).unwrap() {
            Some(Op::Msg { sid, payload, .. }) => {
                assert_eq!(sid, 3);
                assert!(payload.is_empty());
                assert_eq!(payload.headers.status_code(), Some(404));
            }
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[test]
    fn render_rejects_line_breaks_in_tokens() {
        let err = render(&Op::Pub {
            subject: "foo\r\nPUB bar".to_string(),
            reply_to: None,
            payload: Payload::default(),
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = render(&Op::Sub {
            subject: "foo".to_string(),
            queue_group: Some("a b".to_string()),
            sid: 1,
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
