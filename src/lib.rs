// Copyright (c) 2026 The Maison developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! A minimal single-threaded HTTP/1.1 server with SSE pub/sub and
//! declarative, typed request handlers.
//!
//! The whole server lives on one thread around one readiness poll: no locks,
//! no races, and completely predictable behavior. That includes the property
//! that a slow handler stalls everyone, which is an accepted trade for this
//! kind of small application. Sockets are read incrementally and never
//! blockingly, with hard bounds on request size, age and read passes.
//!
//! Handlers are declared with named, typed parameters. Before a body runs,
//! every declared parameter is extracted, converted through its type, checked
//! against the type's assertion and the handler's predicates; a request that
//! doesn't satisfy the declaration is answered `400` without the body ever
//! running:
//!
//! ```no_run
//! use maison::{Handler, Payload, Server};
//!
//! let mut server = Server::new();
//!
//! server.install(
//!     Handler::new("add")
//!         .typed("a", "integer")
//!         .typed("b", "integer")
//!         .body(|env| Ok(Payload::from(env.int("a").unwrap() + env.int("b").unwrap()))),
//! );
//!
//! server.run("0.0.0.0:4040").unwrap();
//! ```
//!
//! Server-Sent Events are first-class: a `stream` handler keeps its socket,
//! [`HandlerEnv::subscribe`] parks it in a named channel, and any later
//! request (or [`Server::publish`]) broadcasts to everyone still connected.
//! Dead subscribers are reaped by the failed write itself.
//!
//! TLS is deliberately absent; run the server behind a reverse proxy.

mod buffer;
mod channel;
mod config;
mod handler;
mod params;
mod request;
mod response;
mod server;
mod session;
pub mod static_files;

pub use crate::buffer::{Buffer, Fill};
pub use crate::channel::ChannelTable;
pub use crate::config::ServerConfig;
pub use crate::handler::{
    Handler, HandlerBuilder, HandlerEnv, HandlerError, HandlerKind, HandlerTable, Payload,
};
pub use crate::params::{
    run_pipeline, Bindings, HttpType, ParamSpec, PipelineError, TypeTable,
};
pub use crate::request::{parse_params, render_params, Request};
pub use crate::response::{Response, SseEvent};
pub use crate::server::{BoundServer, Server, ServerError};
pub use crate::session::{generate_token, HookResult, Session, SessionTable};
