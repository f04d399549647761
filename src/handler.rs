// Copyright (c) 2026 The Maison developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Handlers: the declarative unit of behavior.
//!
//! A [`Handler`] is a value built from a name, a list of parameter
//! declarations and a body callable. The server extracts, converts and checks
//! the declared parameters before the body ever runs; the body receives a
//! [`HandlerEnv`] with the bound values, the session, the raw parameter list
//! and the socket-facing `subscribe`/`publish` operations.
//!
//! ```
//! use maison::{Handler, Payload};
//!
//! let handler = Handler::new("even-small")
//!     .typed("n", "integer")
//!     .check(|b| b.int("n").map_or(false, |n| (2..=64).contains(&n)))
//!     .check(|b| b.int("n").map_or(false, |n| n % 2 == 0))
//!     .body(|env| Ok(Payload::from(env.int("n").unwrap())));
//! # let _ = handler;
//! ```

use std::borrow::Cow;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::io;
use std::rc::Rc;

use log::warn;
use serde_json::Value;

use crate::channel::{ChannelTable, SharedSocket};
use crate::params::{Bindings, ParamSpec};
use crate::request::Request;
use crate::session::Session;

/// How the server completes a request once the body has returned.
pub enum HandlerKind {
    /// Respond with the configured content type and close.
    Closing,

    /// Respond with `application/json`, the payload JSON-encoded, and close.
    Json,

    /// Open a `text/event-stream` and keep the socket for channel writes.
    Stream,

    /// Respond with a redirect and close; there is no body to run.
    Redirect {
        target: Cow<'static, str>,
        permanent: bool,
    },
}

/// What a handler body hands back to the server.
pub enum Payload {
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
}

impl Payload {
    /// The body of a closing response: text and bytes pass through, JSON
    /// strings lose their quotes, other JSON values print compactly.
    pub(crate) fn into_plain_bytes(self) -> Vec<u8> {
        match self {
            Payload::Empty => Vec::new(),
            Payload::Text(s) => s.into_bytes(),
            Payload::Bytes(b) => b,
            Payload::Json(v) => render_plain(&v).into_bytes(),
        }
    }

    /// The body of a JSON response: everything is encoded, so a `Text`
    /// payload comes out quoted.
    pub(crate) fn into_json_bytes(self) -> Result<Vec<u8>, HandlerError> {
        match self {
            Payload::Empty => Ok(b"null".to_vec()),
            Payload::Text(s) => Ok(serde_json::to_vec(&s)?),
            Payload::Json(v) => Ok(serde_json::to_vec(&v)?),
            Payload::Bytes(_) => Err(HandlerError::from(
                "binary payload cannot be encoded as JSON",
            )),
        }
    }

    /// The data of the initial SSE frame, if the body provided any.
    pub(crate) fn into_stream_data(self) -> Option<String> {
        match self {
            Payload::Empty => None,
            Payload::Text(s) => Some(s),
            Payload::Bytes(b) => Some(String::from_utf8_lossy(&b).into_owned()),
            Payload::Json(v) => Some(render_plain(&v)),
        }
    }
}

fn render_plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Payload {
        Payload::Text(s.to_owned())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Payload {
        Payload::Text(s)
    }
}

impl From<i64> for Payload {
    fn from(n: i64) -> Payload {
        Payload::Text(n.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Payload {
        Payload::Bytes(b)
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Payload {
        Payload::Json(v)
    }
}

/// Error raised by a handler body. Whatever it wraps, the client sees `500`.
pub struct HandlerError(Box<dyn Error>);

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HandlerError({})", self.0)
    }
}

impl From<io::Error> for HandlerError {
    fn from(err: io::Error) -> HandlerError {
        HandlerError(Box::new(err))
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> HandlerError {
        HandlerError(Box::new(err))
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> HandlerError {
        HandlerError(message.into())
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> HandlerError {
        HandlerError(message.into())
    }
}

/// What the body sees: the bound parameters, the session, the raw parameter
/// list, and the socket by way of `subscribe`.
pub struct HandlerEnv<'a> {
    pub(crate) sock: &'a SharedSocket,
    pub(crate) session: &'a Session,
    pub(crate) request: &'a Request,
    pub(crate) bindings: &'a Bindings,
    pub(crate) channels: &'a mut ChannelTable,
}

impl<'a> HandlerEnv<'a> {
    /// A bound parameter by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// A bound parameter as an integer.
    pub fn int(&self, name: &str) -> Option<i64> {
        self.bindings.int(name)
    }

    /// A bound parameter as a string.
    pub fn str(&self, name: &str) -> Option<&str> {
        self.bindings.str(name)
    }

    /// The session this request runs under.
    pub fn session(&self) -> &Session {
        self.session
    }

    /// The full ordered parameter mapping, exactly as parsed.
    pub fn parameters(&self) -> &[(String, String)] {
        &self.request.parameters
    }

    /// Subscribes this request's socket to a channel. Only meaningful in a
    /// stream handler; anywhere else the socket closes with the response and
    /// the next publish reaps it.
    pub fn subscribe(&mut self, channel: &str) {
        self.channels.subscribe(channel, self.sock.clone());
    }

    /// Broadcasts to a channel. Returns the number of deliveries.
    pub fn publish(&mut self, channel: &str, message: &str) -> usize {
        self.channels.publish(channel, message)
    }
}

type BodyFn = dyn Fn(&mut HandlerEnv) -> Result<Payload, HandlerError>;

/// A registered unit of behavior. Build one with [`Handler::new`],
/// [`Handler::at`] or [`Handler::redirect`].
pub struct Handler {
    uri: String,
    kind: HandlerKind,
    content_type: Cow<'static, str>,
    params: Vec<ParamSpec>,
    body: Option<Box<BodyFn>>,
}

impl Handler {
    /// Starts a closing handler registered under `/{name}`, case-folded. The
    /// special name `root` registers under `/`.
    pub fn new(name: &str) -> HandlerBuilder {
        Handler::at(&uri_for(name))
    }

    /// Starts a closing handler registered under an explicit URI, verbatim.
    pub fn at(uri: &str) -> HandlerBuilder {
        HandlerBuilder {
            uri: uri.to_owned(),
            kind: HandlerKind::Closing,
            content_type: "text/html".into(),
            params: Vec::new(),
        }
    }

    /// A finished redirect handler; it has no parameters and no body.
    pub fn redirect<T>(name: &str, target: T, permanent: bool) -> Handler
    where
        T: Into<Cow<'static, str>>,
    {
        Handler {
            uri: uri_for(name),
            kind: HandlerKind::Redirect {
                target: target.into(),
                permanent,
            },
            content_type: "text/html".into(),
            params: Vec::new(),
            body: None,
        }
    }

    pub(crate) fn uri(&self) -> &str {
        &self.uri
    }

    pub(crate) fn kind(&self) -> &HandlerKind {
        &self.kind
    }

    pub(crate) fn content_type(&self) -> &Cow<'static, str> {
        &self.content_type
    }

    pub(crate) fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub(crate) fn call_body(&self, env: &mut HandlerEnv) -> Result<Payload, HandlerError> {
        match &self.body {
            Some(body) => body(env),
            None => Ok(Payload::Empty),
        }
    }
}

fn uri_for(name: &str) -> String {
    if name == "root" {
        "/".to_owned()
    } else {
        format!("/{}", name.to_ascii_lowercase())
    }
}

/// A handler under construction. Finish it with [`body`](HandlerBuilder::body).
pub struct HandlerBuilder {
    uri: String,
    kind: HandlerKind,
    content_type: Cow<'static, str>,
    params: Vec<ParamSpec>,
}

impl HandlerBuilder {
    /// Makes this a JSON handler.
    pub fn json(mut self) -> HandlerBuilder {
        self.kind = HandlerKind::Json;
        self
    }

    /// Makes this a stream (SSE) handler.
    pub fn stream(mut self) -> HandlerBuilder {
        self.kind = HandlerKind::Stream;
        self
    }

    /// Content type of a closing response (default `text/html`).
    pub fn content_type<C>(mut self, content_type: C) -> HandlerBuilder
    where
        C: Into<Cow<'static, str>>,
    {
        self.content_type = content_type.into();
        self
    }

    /// Declares a bare, untyped parameter: required, bound to its raw
    /// URL-decoded string.
    pub fn param(mut self, name: &str) -> HandlerBuilder {
        self.params.push(ParamSpec::untyped(name));
        self
    }

    /// Declares a typed parameter.
    pub fn typed(mut self, name: &str, type_name: &str) -> HandlerBuilder {
        self.params.push(ParamSpec::typed(name, type_name));
        self
    }

    /// Attaches a predicate to the most recently declared parameter.
    ///
    /// # Panics
    ///
    /// Panics if no parameter has been declared yet; that is a handler
    /// definition mistake, caught at registration time.
    pub fn check<F>(mut self, predicate: F) -> HandlerBuilder
    where
        F: Fn(&Bindings) -> bool + 'static,
    {
        let spec = self
            .params
            .pop()
            .expect("check() must follow a parameter declaration");
        self.params.push(spec.check(predicate));
        self
    }

    /// Supplies the body and finishes the handler.
    pub fn body<F>(self, body: F) -> Handler
    where
        F: Fn(&mut HandlerEnv) -> Result<Payload, HandlerError> + 'static,
    {
        Handler {
            uri: self.uri,
            kind: self.kind,
            content_type: self.content_type,
            params: self.params,
            body: Some(Box::new(body)),
        }
    }
}

/// The URI to handler registry. One handler per URI; installing again
/// overwrites, with a warning.
pub struct HandlerTable {
    handlers: HashMap<String, Rc<Handler>>,
}

impl HandlerTable {
    pub fn new() -> HandlerTable {
        HandlerTable {
            handlers: HashMap::new(),
        }
    }

    pub fn install(&mut self, handler: Handler) {
        let uri = handler.uri().to_owned();
        if self.handlers.insert(uri.clone(), Rc::new(handler)).is_some() {
            warn!("handler for {} was redefined", uri);
        }
    }

    /// The handler registered for a resource, most recent binding.
    pub fn find(&self, resource: &str) -> Option<Rc<Handler>> {
        self.handlers.get(resource).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerTable {
    fn default() -> HandlerTable {
        HandlerTable::new()
    }
}

#[cfg(test)]
mod test {
    use super::{uri_for, Handler, HandlerKind, HandlerTable, Payload};

    #[test]
    fn names_fold_to_uris() {
        assert_eq!(uri_for("root"), "/");
        assert_eq!(uri_for("hello-world"), "/hello-world");
        assert_eq!(uri_for("Hello-World"), "/hello-world");
    }

    #[test]
    fn explicit_uris_keep_their_case() {
        let handler = Handler::at("/static/CSS/Main.css").body(|_| Ok(Payload::Empty));
        assert_eq!(handler.uri(), "/static/CSS/Main.css");
    }

    #[test]
    fn redefinition_replaces() {
        let mut table = HandlerTable::new();
        table.install(Handler::new("x").body(|_| Ok(Payload::from("first"))));
        table.install(Handler::new("x").body(|_| Ok(Payload::from("second"))));

        assert_eq!(table.len(), 1);
        assert!(table.find("/x").is_some());
    }

    #[test]
    fn redirect_has_no_body() {
        let handler = Handler::redirect("old", "/new", true);
        match handler.kind() {
            HandlerKind::Redirect { target, permanent } => {
                assert_eq!(target.as_ref(), "/new");
                assert!(*permanent);
            }
            _ => panic!(),
        }
    }

    #[test]
    fn payload_renderings() {
        assert_eq!(Payload::from("hi").into_plain_bytes(), b"hi".to_vec());
        assert_eq!(Payload::from(7).into_plain_bytes(), b"7".to_vec());
        assert_eq!(
            Payload::Json(serde_json::json!("quoted")).into_plain_bytes(),
            b"quoted".to_vec()
        );
        assert_eq!(
            Payload::Json(serde_json::json!([1, 2])).into_plain_bytes(),
            b"[1,2]".to_vec()
        );

        // the JSON rendering always encodes
        assert_eq!(
            Payload::from("hi").into_json_bytes().unwrap(),
            b"\"hi\"".to_vec()
        );
        assert!(Payload::Bytes(vec![0xff]).into_json_bytes().is_err());

        assert_eq!(Payload::Empty.into_stream_data(), None);
        assert_eq!(
            Payload::from("tick").into_stream_data(),
            Some("tick".to_owned())
        );
    }
}
