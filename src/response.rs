// Copyright (c) 2026 The Maison developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Responses and SSE frames, and their wire formats.

use std::borrow::Cow;
use std::io::{self, ErrorKind, Write};
use std::thread;
use std::time::Duration;

/// How many `WouldBlock` rounds a write tolerates before the socket is
/// declared dead. Writes are allowed to stall briefly, never indefinitely.
const WRITE_STALL_ROUNDS: u32 = 100;
const WRITE_STALL_PAUSE: Duration = Duration::from_millis(1);

/// A prototype of a response.
///
/// Nothing is sent until the response is written to a socket, so building one
/// is free. The defaults describe a successful HTML response:
///
/// ```
/// use maison::Response;
///
/// let response = Response::default();
/// assert_eq!(response.response_code, "200 OK");
/// assert_eq!(response.content_type, "text/html");
/// ```
pub struct Response {
    /// Full status line tail, e.g. `"404 Not Found"`.
    pub response_code: Cow<'static, str>,
    pub content_type: Cow<'static, str>,
    pub charset: Cow<'static, str>,
    /// Written as a bare `Set-Cookie` value when present.
    pub cookie: Option<String>,
    pub location: Option<Cow<'static, str>>,
    /// Adds `Connection: keep-alive` and the anti-caching `Expires` line.
    pub keep_alive: bool,
    pub body: Option<Vec<u8>>,
}

impl Default for Response {
    fn default() -> Response {
        Response {
            response_code: "200 OK".into(),
            content_type: "text/html".into(),
            charset: "utf-8".into(),
            cookie: None,
            location: None,
            keep_alive: false,
            body: None,
        }
    }
}

impl Response {
    /// An HTML response.
    pub fn html<B>(body: B) -> Response
    where
        B: Into<Vec<u8>>,
    {
        Response {
            body: Some(body.into()),
            ..Response::default()
        }
    }

    /// A response whose body is already-encoded JSON text.
    pub fn json<B>(body: B) -> Response
    where
        B: Into<Vec<u8>>,
    {
        Response {
            content_type: "application/json".into(),
            body: Some(body.into()),
            ..Response::default()
        }
    }

    /// The header block that opens a Server-Sent Events stream. No body; the
    /// frames follow separately.
    pub fn event_stream() -> Response {
        Response {
            content_type: "text/event-stream".into(),
            keep_alive: true,
            ..Response::default()
        }
    }

    /// A redirect. `permanent` picks `301` over `307`.
    pub fn redirect<L>(location: L, permanent: bool) -> Response
    where
        L: Into<Cow<'static, str>>,
    {
        Response {
            response_code: if permanent {
                "301 Moved Permanently".into()
            } else {
                "307 Temporary Redirect".into()
            },
            location: Some(location.into()),
            body: Some(b"Resource moved...".to_vec()),
            ..Response::default()
        }
    }

    pub fn bad_request() -> Response {
        Response {
            response_code: "400 Bad Request".into(),
            body: Some(b"Bad Request".to_vec()),
            ..Response::default()
        }
    }

    pub fn not_found() -> Response {
        Response {
            response_code: "404 Not Found".into(),
            body: Some(b"Not Found".to_vec()),
            ..Response::default()
        }
    }

    pub fn payload_too_large() -> Response {
        Response {
            response_code: "413 Payload Too Large".into(),
            body: Some(b"Payload Too Large".to_vec()),
            ..Response::default()
        }
    }

    pub fn internal_error() -> Response {
        Response {
            response_code: "500 Internal Server Error".into(),
            body: Some(b"Internal Server Error".to_vec()),
            ..Response::default()
        }
    }

    /// Serializes the response.
    ///
    /// Header lines use CRLF. `Set-Cookie` and `Location` appear when present,
    /// `Connection: keep-alive` and the `Expires` line appear together when
    /// `keep_alive` is set, and `Content-Length`, the blank separator and the
    /// body appear together when there is a body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.as_ref().map_or(0, Vec::len));

        out.extend_from_slice(b"HTTP/1.1 ");
        out.extend_from_slice(self.response_code.as_bytes());
        out.extend_from_slice(b"\r\nContent-Type: ");
        out.extend_from_slice(self.content_type.as_bytes());
        out.extend_from_slice(b"; charset=");
        out.extend_from_slice(self.charset.as_bytes());
        out.extend_from_slice(b"\r\nCache-Control: no-cache, no-store, must-revalidate\r\n");

        if let Some(cookie) = &self.cookie {
            out.extend_from_slice(b"Set-Cookie: ");
            out.extend_from_slice(cookie.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        if let Some(location) = &self.location {
            out.extend_from_slice(b"Location: ");
            out.extend_from_slice(location.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        if self.keep_alive {
            out.extend_from_slice(b"Connection: keep-alive\r\n");
            out.extend_from_slice(b"Expires: Thu, 01 Jan 1970 00:00:01 GMT\r\n");
        }
        if let Some(body) = &self.body {
            let mut len = itoa::Buffer::new();
            out.extend_from_slice(b"Content-Length: ");
            out.extend_from_slice(len.format(body.len()).as_bytes());
            out.extend_from_slice(b"\r\n\r\n");
            out.extend_from_slice(body);
        }

        out
    }

    /// Writes and flushes the response. The caller decides what a failure
    /// means; for most of the server it means the peer is gone.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_all_now(w, &self.to_bytes())?;
        w.flush()
    }
}

/// One unit of Server-Sent Events output.
///
/// Frames use newline terminators only; CRLF has no place inside an event
/// stream.
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub retry: Option<u32>,
    pub data: String,
}

impl SseEvent {
    /// A frame carrying only data.
    pub fn data<D>(data: D) -> SseEvent
    where
        D: Into<String>,
    {
        SseEvent {
            id: None,
            event: None,
            retry: None,
            data: data.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.data.len());

        if let Some(id) = &self.id {
            out.extend_from_slice(b"id: ");
            out.extend_from_slice(id.as_bytes());
            out.push(b'\n');
        }
        if let Some(event) = &self.event {
            out.extend_from_slice(b"event: ");
            out.extend_from_slice(event.as_bytes());
            out.push(b'\n');
        }
        if let Some(retry) = self.retry {
            let mut n = itoa::Buffer::new();
            out.extend_from_slice(b"retry: ");
            out.extend_from_slice(n.format(retry).as_bytes());
            out.push(b'\n');
        }
        out.extend_from_slice(b"data: ");
        out.extend_from_slice(self.data.as_bytes());
        out.extend_from_slice(b"\n\n");

        out
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_all_now(w, &self.to_bytes())?;
        w.flush()
    }
}

/// `write_all` against a non-blocking socket.
///
/// Retries `WouldBlock` with a short pause up to [`WRITE_STALL_ROUNDS`] times,
/// then gives up; a peer that cannot absorb a response within that window is
/// treated like a dead one.
pub(crate) fn write_all_now<W: Write>(w: &mut W, mut buf: &[u8]) -> io::Result<()> {
    let mut stalls = 0;
    while !buf.is_empty() {
        match w.write(buf) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => {
                stalls = 0;
                buf = &buf[n..];
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
            Err(ref e) if e.kind() == ErrorKind::WouldBlock && stalls < WRITE_STALL_ROUNDS => {
                stalls += 1;
                thread::sleep(WRITE_STALL_PAUSE);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
