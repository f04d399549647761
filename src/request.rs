// Copyright (c) 2026 The Maison developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The HTTP request parser.
//!
//! [`parse`] turns the raw bytes of a completed buffer into a [`Request`]. The
//! parser is pure and deliberately narrow: only `HTTP/1.1`, headers split on
//! the first `": "`, the whole `Cookie` value taken as the session token, and
//! at most one URL-encoded body line following the header terminator. Query
//! parameters and body parameters are merged into one ordered list, body last.

use std::error::Error;
use std::fmt;
use std::str;

use url::form_urlencoded;

/// A parsed request.
///
/// `parameters` keeps insertion order: query parameters first, then body
/// parameters. Lookup through [`Request::param`] is last-insertion-wins, so a
/// body value shadows a query value of the same name.
pub struct Request {
    pub resource: String,
    pub raw_query: Option<String>,
    /// Header names are case-folded to lowercase. The `cookie` header is not
    /// here; it becomes `session_token`.
    pub headers: Vec<(String, String)>,
    pub parameters: Vec<(String, String)>,
    pub session_token: Option<String>,
}

impl Request {
    /// Looks up a parameter by its case-folded name. The value inserted last
    /// wins.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Looks up a header by its case-folded name.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Builds a fake `Request` for tests.
    #[doc(hidden)]
    pub fn fake(resource: &str, params: Vec<(&str, &str)>) -> Request {
        Request {
            resource: resource.to_owned(),
            raw_query: None,
            headers: Vec::new(),
            parameters: params
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
            session_token: None,
        }
    }
}

/// Error that can happen while parsing a request.
#[derive(Debug)]
pub enum ParseError {
    /// The request is not valid UTF-8.
    NotUtf8,

    /// The request line does not have the shape `METHOD PATH VERSION`.
    BadRequestLine,

    /// Any version other than `HTTP/1.1` is refused.
    WrongVersion(String),

    /// A header line without a `": "` separator.
    BadHeader(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::NotUtf8 => write!(f, "request is not valid UTF-8"),
            ParseError::BadRequestLine => write!(f, "malformed request line"),
            ParseError::WrongVersion(v) => write!(f, "unsupported HTTP version: {}", v),
            ParseError::BadHeader(line) => write!(f, "malformed header line: {}", line),
        }
    }
}

impl Error for ParseError {}

/// Parses the raw bytes of a complete request.
pub fn parse(raw: &[u8]) -> Result<Request, ParseError> {
    let text = str::from_utf8(raw).map_err(|_| ParseError::NotUtf8)?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().unwrap_or("");
    let mut words = request_line.split(' ');
    let (method, path, version) = match (words.next(), words.next(), words.next(), words.next()) {
        (Some(m), Some(p), Some(v), None) if !m.is_empty() && !p.is_empty() => (m, p, v),
        _ => return Err(ParseError::BadRequestLine),
    };
    // The method plays no part in routing.
    let _ = method;
    if version != "HTTP/1.1" {
        return Err(ParseError::WrongVersion(version.to_owned()));
    }

    let mut parts = path.splitn(2, '?');
    let resource = parts.next().unwrap_or("/").to_owned();
    let raw_query = parts.next().map(|q| q.to_owned());

    let mut headers = Vec::new();
    let mut session_token = None;
    let mut body_line = "";
    loop {
        match lines.next() {
            // No empty separator: a complete buffer always has one, but the
            // parser doesn't rely on it.
            None => break,
            Some("") => {
                body_line = lines.next().unwrap_or("");
                break;
            }
            Some(line) => {
                let (name, value) = line
                    .split_once(": ")
                    .ok_or_else(|| ParseError::BadHeader(line.to_owned()))?;
                let name = name.to_ascii_lowercase();
                if name == "cookie" {
                    session_token = Some(value.to_owned());
                } else {
                    headers.push((name, value.to_owned()));
                }
            }
        }
    }

    let mut parameters = parse_params(raw_query.as_deref().unwrap_or(""));
    parameters.extend(parse_params(body_line));

    Ok(Request {
        resource,
        raw_query,
        headers,
        parameters,
        session_token,
    })
}

/// Splits a URL-encoded string into ordered `(name, value)` pairs.
///
/// Names are case-folded; values of bare names default to `""`. Percent
/// escapes and `+`-as-space are decoded in both positions.
pub fn parse_params(s: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(s.as_bytes())
        .map(|(k, v)| (k.to_lowercase(), v.into_owned()))
        .collect()
}

/// The inverse of [`parse_params`].
pub fn render_params(params: &[(String, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (k, v) in params {
        serializer.append_pair(k, v);
    }
    serializer.finish()
}
