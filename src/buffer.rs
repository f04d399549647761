// Copyright (c) 2026 The Maison developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Per-connection accumulation of an incoming request.
//!
//! A `Buffer` is created the first time a connection becomes readable and lives
//! until the request completes or the connection is dropped. It never blocks:
//! [`Buffer::fill`] drains whatever the socket has right now and returns. The
//! event loop then classifies the buffer with the termination predicates, in
//! this order: [`too_big`](Buffer::too_big), [`too_old`](Buffer::too_old),
//! [`too_needy`](Buffer::too_needy), [`complete`](Buffer::complete).

use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

/// End of the HTTP header block.
const TERMINATOR: &[u8] = b"\r\n\r\n";

const READ_CHUNK: usize = 1024;

/// What a call to [`Buffer::fill`] observed on the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// The socket has no more data for now; more may arrive later.
    Pending,

    /// The peer is gone (clean close or I/O error). The connection is
    /// dropped silently, whatever the buffer holds.
    Eof,
}

/// Accumulates the bytes of one request plus the bookkeeping needed to decide
/// when to give up on it.
pub struct Buffer {
    contents: Vec<u8>,
    started_at: Instant,
    tries: u32,
    found_terminator: bool,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer {
            contents: Vec::with_capacity(READ_CHUNK),
            started_at: Instant::now(),
            tries: 0,
            found_terminator: false,
        }
    }

    /// Drains every byte the stream can currently deliver without blocking.
    ///
    /// Each call costs one try. Reading stops as soon as the stream would
    /// block, the accumulated size exceeds `limit` (the loop will classify the
    /// buffer as too big), or the peer is gone. Bytes keep accumulating after
    /// the header terminator so that a URL-encoded body arriving in the same
    /// burst lands in the same contents.
    ///
    /// EOF always reports `Eof`, and any I/O error is mapped to it.
    pub fn fill<R: Read>(&mut self, stream: &mut R, limit: usize) -> Fill {
        self.tries += 1;

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return Fill::Eof,
                Ok(n) => {
                    // Only the window overlapping the new bytes can contain a
                    // terminator that wasn't there before.
                    let scan_from = self.contents.len().saturating_sub(TERMINATOR.len() - 1);
                    self.contents.extend_from_slice(&chunk[..n]);
                    if !self.found_terminator {
                        self.found_terminator = self.contents[scan_from..]
                            .windows(TERMINATOR.len())
                            .any(|w| w == TERMINATOR);
                    }
                    if self.contents.len() > limit {
                        return Fill::Pending;
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Fill::Pending,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return Fill::Eof,
            }
        }
    }

    /// The payload bound was violated. Dominates every other predicate.
    pub fn too_big(&self, limit: usize) -> bool {
        self.contents.len() > limit
    }

    /// The request has been in flight for too long.
    pub fn too_old(&self, max_age: Duration) -> bool {
        self.started_at.elapsed() > max_age
    }

    /// The request has consumed too many read passes.
    pub fn too_needy(&self, max_tries: u32) -> bool {
        self.tries > max_tries
    }

    /// The header terminator has been observed.
    pub fn complete(&self) -> bool {
        self.found_terminator
    }

    pub fn content_size(&self) -> usize {
        self.contents.len()
    }

    pub fn tries(&self) -> u32 {
        self.tries
    }

    pub fn into_contents(self) -> Vec<u8> {
        self.contents
    }
}
