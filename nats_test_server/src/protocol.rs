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

//! Client to server framing.

use serde_json::Value;

#[derive(Debug, PartialEq)]
pub(crate) enum Command {
    Connect(Value),
    Ping,
    Pong,
    Sub {
        subject: String,
        queue: Option<String>,
        sid: String,
    },
    Unsub {
        sid: String,
        max: Option<u64>,
    },
    Pub {
        subject: String,
        reply: Option<String>,
        headers: Option<Vec<u8>>,
        body: Vec<u8>,
    },
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_len(s: &str) -> Result<usize, String> {
    s.parse().map_err(|_| format!("bad length {:?}", s))
}

/// Takes one complete command off the front of `buf`. `Ok(None)` means
/// more bytes are needed.
pub(crate) fn parse(buf: &mut Vec<u8>) -> Result<Option<Command>, String> {
    let end = match find_crlf(buf) {
        Some(end) => end,
        None => return Ok(None),
    };
    let line = std::str::from_utf8(&buf[..end])
        .map_err(|_| "control line is not utf-8".to_string())?
        .to_string();
    let consumed = end + 2;

    let mut parts = line.split_whitespace();
    let op = parts.next().unwrap_or_default().to_ascii_uppercase();
    let args: Vec<&str> = parts.collect();

    let command = match op.as_str() {
        "PING" => Command::Ping,
        "PONG" => Command::Pong,
        "CONNECT" => {
            let json = line[op.len()..].trim();
            Command::Connect(serde_json::from_str(json).map_err(|err| err.to_string())?)
        }
        "SUB" => match args.as_slice() {
            [subject, sid] => Command::Sub {
                subject: subject.to_string(),
                queue: None,
                sid: sid.to_string(),
            },
            [subject, queue, sid] => Command::Sub {
                subject: subject.to_string(),
                queue: Some(queue.to_string()),
                sid: sid.to_string(),
            },
            _ => return Err(format!("bad SUB: {}", line)),
        },
        "UNSUB" => match args.as_slice() {
            [sid] => Command::Unsub {
                sid: sid.to_string(),
                max: None,
            },
            [sid, max] => Command::Unsub {
                sid: sid.to_string(),
                max: Some(parse_len(max)? as u64),
            },
            _ => return Err(format!("bad UNSUB: {}", line)),
        },
        "PUB" | "HPUB" => {
            let (subject, reply, header_len, total_len) = match (op.as_str(), args.as_slice()) {
                ("PUB", [subject, len]) => (subject, None, 0, parse_len(len)?),
                ("PUB", [subject, reply, len]) => (subject, Some(reply), 0, parse_len(len)?),
                ("HPUB", [subject, hdr, len]) => (subject, None, parse_len(hdr)?, parse_len(len)?),
                ("HPUB", [subject, reply, hdr, len]) => {
                    (subject, Some(reply), parse_len(hdr)?, parse_len(len)?)
                }
                _ => return Err(format!("bad {}: {}", op, line)),
            };
            if header_len > total_len {
                return Err(format!("header length exceeds total: {}", line));
            }

            let needed = consumed + total_len + 2;
            if buf.len() < needed {
                return Ok(None);
            }
            if &buf[consumed + total_len..needed] != b"\r\n" {
                return Err(format!("payload of {} not terminated by CRLF", subject));
            }

            let payload = &buf[consumed..consumed + total_len];
            let headers = if op == "HPUB" {
                Some(payload[..header_len].to_vec())
            } else {
                None
            };
            let command = Command::Pub {
                subject: subject.to_string(),
                reply: reply.map(|r| r.to_string()),
                headers,
                body: payload[header_len..].to_vec(),
            };
            buf.drain(..needed);
            return Ok(Some(command));
        }
        other => return Err(format!("unknown command {:?}", other)),
    };

    buf.drain(..consumed);
    Ok(Some(command))
}

/// Renders a `MSG`, or an `HMSG` when there are headers.
pub(crate) fn message_frame(
    subject: &str,
    sid: &str,
    reply: Option<&str>,
    headers: Option<&[u8]>,
    body: &[u8],
) -> Vec<u8> {
    let reply = reply.map(|r| format!(" {}", r)).unwrap_or_default();
    let mut frame = match headers {
        Some(headers) => format!(
            "HMSG {} {}{} {} {}\r\n",
            subject,
            sid,
            reply,
            headers.len(),
            headers.len() + body.len()
        )
        .into_bytes(),
        None => format!("MSG {} {}{} {}\r\n", subject, sid, reply, body.len()).into_bytes(),
    };
    if let Some(headers) = headers {
        frame.extend_from_slice(headers);
    }
    frame.extend_from_slice(body);
    frame.extend_from_slice(b"\r\n");
    frame
}

/// A header block carrying only a status line.
pub(crate) fn status_headers(code: u16, description: &str) -> Vec<u8> {
    format!("NATS/1.0 {} {}\r\n\r\n", code, description).into_bytes()
}

/// Looks a header up in a raw `NATS/1.0` block.
pub(crate) fn header_value(headers: &[u8], name: &str) -> Option<String> {
    let text = std::str::from_utf8(headers).ok()?;
    text.split("\r\n").skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case(name) {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}
