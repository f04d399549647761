// Copyright (c) 2026 The Maison developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Resource bounds for the server.

use std::time::Duration;

/// The tunable limits of a [`Server`](crate::Server).
///
/// The defaults are intentionally conservative: the server is meant for small
/// applications, and every bound exists to shed a misbehaving peer rather than
/// to squeeze throughput out of a well-behaved one.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use maison::ServerConfig;
///
/// let config = ServerConfig {
///     max_request_size: 16 * 1024,
///     max_request_age: Duration::from_secs(10),
///     ..ServerConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of bytes buffered for a single request, body included
    /// (default: `50_000`).
    ///
    /// A connection that exceeds this receives `413 Payload Too Large` and is
    /// dropped.
    pub max_request_size: usize,

    /// Maximum age of a partially received request (default: 30 seconds).
    ///
    /// A connection still incomplete after this long receives `400 Bad Request`
    /// and is dropped. This is the main defense against slow-write peers.
    pub max_request_age: Duration,

    /// Maximum number of read passes a single request may consume
    /// (default: `1_000`).
    ///
    /// Every readiness wake-up on a connection costs one pass; a peer that
    /// dribbles its request one byte per wake-up runs out of passes long before
    /// it runs out of clock.
    pub max_buffer_tries: u32,

    /// Idle lifetime of a session (default: 30 minutes).
    ///
    /// Sessions untouched for longer are unreachable and removed lazily.
    pub max_session_idle: Duration,

    /// Number of session creations between sweeps of idle sessions
    /// (default: `1_000`).
    pub clean_sessions_every: u32,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            max_request_size: 50_000,
            max_request_age: Duration::from_secs(30),
            max_buffer_tries: 1_000,
            max_session_idle: Duration::from_secs(30 * 60),
            clean_sessions_every: 1_000,
        }
    }
}

impl ServerConfig {
    /// Every bound must be positive; a zero bound would drop every connection
    /// or evict every session on sight.
    pub(crate) fn assert_positive(&self) {
        assert!(self.max_request_size > 0, "max_request_size must be positive");
        assert!(
            self.max_request_age > Duration::ZERO,
            "max_request_age must be positive"
        );
        assert!(self.max_buffer_tries > 0, "max_buffer_tries must be positive");
        assert!(
            self.max_session_idle > Duration::ZERO,
            "max_session_idle must be positive"
        );
        assert!(
            self.clean_sessions_every > 0,
            "clean_sessions_every must be positive"
        );
    }
}
