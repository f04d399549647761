// Copyright (c) 2026 The Maison developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The server: one thread, one readiness poll, and all the mutable tables.
//!
//! The event loop owns every socket. A readable listener means accept; a
//! readable connection means fill its buffer and classify it: over the size
//! bound (`413`), over the age or tries bound (`400`), terminated (parse and
//! dispatch), or still pending. Completed requests flow through session
//! resolution and the typed-parameter pipeline before the handler body runs;
//! the error taxonomy maps every failure to a status code, except I/O errors
//! while answering, which are swallowed because the peer is already gone.

use std::cell::RefCell;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::io::{self, ErrorKind};
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

use log::{debug, error, warn};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Registry, Token};

use crate::buffer::{Buffer, Fill};
use crate::channel::{ChannelTable, SharedSocket};
use crate::config::ServerConfig;
use crate::handler::{Handler, HandlerEnv, HandlerKind, HandlerTable};
use crate::params::{run_pipeline, HttpType, TypeTable};
use crate::request;
use crate::response::{write_all_now, Response, SseEvent};
use crate::session::{HookResult, Session, SessionTable};

const LISTENER: Token = Token(0);

/// Readiness wait bound; keeps the loop honest on platforms where a wakeup
/// can go missing.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Error that terminates [`BoundServer::run`]. When it does, every tracked
/// socket and the listener are closed.
#[derive(Debug)]
pub enum ServerError {
    Io(io::Error),

    /// The bind address resolved to nothing.
    NoAddress,

    /// A new-session hook failed. Hooks are privileged; their errors are
    /// deliberately fatal.
    Hook(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ServerError::Io(e) => write!(f, "I/O error: {}", e),
            ServerError::NoAddress => write!(f, "address resolved to nothing"),
            ServerError::Hook(e) => write!(f, "session hook failed: {}", e),
        }
    }
}

impl Error for ServerError {}

impl From<io::Error> for ServerError {
    fn from(err: io::Error) -> ServerError {
        ServerError::Io(err)
    }
}

/// A server under construction: handlers, types, sessions and channels, all
/// plain state. Nothing listens until [`run`](Server::run) or
/// [`bind`](Server::bind).
pub struct Server {
    config: ServerConfig,
    handlers: HandlerTable,
    types: TypeTable,
    sessions: SessionTable,
    channels: ChannelTable,
}

impl Server {
    pub fn new() -> Server {
        Server::with_config(ServerConfig::default())
    }

    /// # Panics
    ///
    /// Panics if any bound in `config` is zero.
    pub fn with_config(config: ServerConfig) -> Server {
        config.assert_positive();
        let sessions = SessionTable::new(config.max_session_idle, config.clean_sessions_every);
        Server {
            config,
            handlers: HandlerTable::new(),
            types: TypeTable::with_builtins(),
            sessions,
            channels: ChannelTable::new(),
        }
    }

    /// Registers a handler. Handlers registered later for the same URI fully
    /// replace earlier ones.
    pub fn install(&mut self, handler: Handler) {
        self.handlers.install(handler);
    }

    /// Direct access to the registry, e.g. for
    /// [`static_files::mount`](crate::static_files::mount).
    pub fn handlers_mut(&mut self) -> &mut HandlerTable {
        &mut self.handlers
    }

    /// Installs a parameter type under `name` (priority defaults to 0).
    pub fn define_type(&mut self, name: &str, ty: HttpType) {
        self.types.define(name, ty);
    }

    /// Registers a hook to run on every newly created session.
    pub fn new_session_hook<F>(&mut self, hook: F)
    where
        F: Fn(&Session) -> HookResult + 'static,
    {
        self.sessions.new_session_hook(hook);
    }

    pub fn clear_session_hooks(&mut self) {
        self.sessions.clear_session_hooks();
    }

    /// Broadcasts to a channel from outside any handler.
    pub fn publish(&mut self, channel: &str, message: &str) -> usize {
        self.channels.publish(channel, message)
    }

    /// Binds the listener without entering the loop, so the caller can learn
    /// the actual address first.
    pub fn bind<A: ToSocketAddrs>(self, addr: A) -> Result<BoundServer, ServerError> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or(ServerError::NoAddress)?;
        let mut listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        Ok(BoundServer {
            server: self,
            poll,
            listener,
            local_addr,
        })
    }

    /// Binds and serves forever. Returns only on a fatal error.
    pub fn run<A: ToSocketAddrs>(self, addr: A) -> Result<(), ServerError> {
        self.bind(addr)?.run()
    }

    fn handle_readable(
        &mut self,
        registry: &Registry,
        connections: &mut HashMap<Token, Connection>,
        token: Token,
    ) -> Result<(), ServerError> {
        let fill = {
            let conn = match connections.get_mut(&token) {
                // spurious wakeup for a connection already gone
                None => return Ok(()),
                Some(conn) => conn,
            };
            let buffer = conn.buffer.get_or_insert_with(Buffer::new);
            let mut stream = conn.stream.borrow_mut();
            buffer.fill(&mut *stream, self.config.max_request_size)
        };

        let verdict = {
            let conn = connections.get(&token).expect("connection vanished");
            let buffer = conn.buffer.as_ref().expect("buffer vanished");
            if fill == Fill::Eof {
                Verdict::Gone
            } else if buffer.too_big(self.config.max_request_size) {
                Verdict::Reject(Response::payload_too_large())
            } else if buffer.too_old(self.config.max_request_age) {
                Verdict::Reject(Response::bad_request())
            } else if buffer.too_needy(self.config.max_buffer_tries) {
                Verdict::Reject(Response::bad_request())
            } else if buffer.complete() {
                Verdict::Dispatch
            } else {
                Verdict::Wait
            }
        };

        match verdict {
            Verdict::Wait => Ok(()),

            Verdict::Gone => {
                let conn = connections.remove(&token).expect("connection vanished");
                let _ = registry.deregister(&mut *conn.stream.borrow_mut());
                debug!("connection closed by peer");
                Ok(())
            }

            Verdict::Reject(response) => {
                let conn = connections.remove(&token).expect("connection vanished");
                let _ = registry.deregister(&mut *conn.stream.borrow_mut());
                warn!("dropping connection: {}", response.response_code);
                close_with(&conn.stream, response);
                Ok(())
            }

            Verdict::Dispatch => {
                let mut conn = connections.remove(&token).expect("connection vanished");
                let _ = registry.deregister(&mut *conn.stream.borrow_mut());
                let raw = conn.buffer.take().expect("buffer vanished").into_contents();
                self.dispatch(conn.stream, &raw)
            }
        }
    }

    /// One complete request: parse, route, resolve the session, run the
    /// pipeline, run the body, finish per handler kind.
    fn dispatch(&mut self, sock: SharedSocket, raw: &[u8]) -> Result<(), ServerError> {
        let request = match request::parse(raw) {
            Ok(request) => request,
            Err(err) => {
                debug!("malformed request: {}", err);
                close_with(&sock, Response::bad_request());
                return Ok(());
            }
        };

        let handler = match self.handlers.find(&request.resource) {
            Some(handler) => handler,
            None => {
                debug!("no handler for {}", request.resource);
                close_with(&sock, Response::not_found());
                return Ok(());
            }
        };

        if let HandlerKind::Redirect { target, permanent } = handler.kind() {
            close_with(&sock, Response::redirect(target.clone(), *permanent));
            return Ok(());
        }

        let (token, client_had_cookie) = self
            .sessions
            .resolve(request.session_token.as_deref())
            .map_err(ServerError::Hook)?;

        let bindings = match run_pipeline(&self.types, handler.params(), &request) {
            Ok(bindings) => bindings,
            Err(err) => {
                debug!("{} rejected: {}", request.resource, err);
                close_with(&sock, Response::bad_request());
                return Ok(());
            }
        };

        let outcome = {
            let session = self.sessions.peek(&token).expect("session just resolved");
            let mut env = HandlerEnv {
                sock: &sock,
                session,
                request: &request,
                bindings: &bindings,
                channels: &mut self.channels,
            };
            panic::catch_unwind(AssertUnwindSafe(|| handler.call_body(&mut env)))
        };

        // the cookie goes out only to clients that didn't present a live one
        let cookie = if client_had_cookie { None } else { Some(token) };

        let payload = match outcome {
            Err(_) => {
                error!("handler for {} panicked", request.resource);
                close_with(&sock, Response::internal_error());
                return Ok(());
            }
            Ok(Err(err)) => {
                error!("handler for {} failed: {}", request.resource, err);
                close_with(&sock, Response::internal_error());
                return Ok(());
            }
            Ok(Ok(payload)) => payload,
        };

        match handler.kind() {
            HandlerKind::Closing => {
                let response = Response {
                    content_type: handler.content_type().clone(),
                    cookie,
                    body: Some(payload.into_plain_bytes()),
                    ..Response::default()
                };
                close_with(&sock, response);
            }

            HandlerKind::Json => match payload.into_json_bytes() {
                Ok(body) => {
                    let response = Response {
                        cookie,
                        ..Response::json(body)
                    };
                    close_with(&sock, response);
                }
                Err(err) => {
                    error!("handler for {} failed: {}", request.resource, err);
                    close_with(&sock, Response::internal_error());
                }
            },

            HandlerKind::Stream => {
                let response = Response {
                    cookie,
                    ..Response::event_stream()
                };
                let initial = SseEvent::data(
                    payload
                        .into_stream_data()
                        .unwrap_or_else(|| "Listening...".to_owned()),
                );
                let opened = {
                    let mut stream = sock.borrow_mut();
                    response
                        .write_to(&mut *stream)
                        .and_then(|()| write_all_now(&mut *stream, b"\r\n"))
                        .and_then(|()| initial.write_to(&mut *stream))
                };
                if opened.is_err() {
                    debug!("peer vanished while opening event stream");
                }
                // The socket stays open exactly as long as some channel holds
                // it; a stream body that never subscribed closes here.
            }

            HandlerKind::Redirect { .. } => unreachable!("redirects answered above"),
        }

        Ok(())
    }
}

impl Default for Server {
    fn default() -> Server {
        Server::new()
    }
}

enum Verdict {
    Wait,
    Gone,
    Reject(Response),
    Dispatch,
}

struct Connection {
    stream: SharedSocket,
    /// Allocated on the first readiness, per the connection lifecycle.
    buffer: Option<Buffer>,
}

/// Writes a response and shuts the socket down. Failures are swallowed; if
/// the write failed the peer is gone, and the shutdown makes any channel that
/// still holds the socket reap it on its next publish.
fn close_with(sock: &SharedSocket, response: Response) {
    let mut stream = sock.borrow_mut();
    if let Err(err) = response.write_to(&mut *stream) {
        debug!("response write failed: {}", err);
    }
    let _ = stream.shutdown(Shutdown::Both);
}

/// A bound, not yet running server.
pub struct BoundServer {
    server: Server,
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BoundServer {
    /// The address actually bound; useful after binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves forever. Returns only on a fatal error, at which point every
    /// tracked socket and the listener close on drop.
    pub fn run(mut self) -> Result<(), ServerError> {
        let mut events = Events::with_capacity(256);
        let mut connections: HashMap<Token, Connection> = HashMap::new();
        let mut next_token: usize = LISTENER.0 + 1;

        loop {
            self.poll.poll(&mut events, Some(POLL_TIMEOUT))?;

            for event in events.iter() {
                match event.token() {
                    LISTENER => accept_all(
                        self.poll.registry(),
                        &mut self.listener,
                        &mut connections,
                        &mut next_token,
                    )?,
                    token => self.server.handle_readable(
                        self.poll.registry(),
                        &mut connections,
                        token,
                    )?,
                }
            }
        }
    }
}

fn accept_all(
    registry: &Registry,
    listener: &mut TcpListener,
    connections: &mut HashMap<Token, Connection>,
    next_token: &mut usize,
) -> Result<(), ServerError> {
    loop {
        match listener.accept() {
            Ok((mut stream, peer)) => {
                let token = Token(*next_token);
                *next_token += 1;
                registry.register(&mut stream, token, Interest::READABLE)?;
                debug!("accepted connection from {}", peer);
                connections.insert(
                    token,
                    Connection {
                        stream: Rc::new(RefCell::new(stream)),
                        buffer: None,
                    },
                );
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(ServerError::Io(e)),
        }
    }
}
