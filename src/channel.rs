// Copyright (c) 2026 The Maison developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! SSE pub/sub channels.
//!
//! A channel is a named list of subscribed sockets. Subscribing prepends, so
//! [`publish`](ChannelTable::publish) delivers newest-subscriber-first. A
//! socket whose write or flush fails is dropped from the channel on the spot;
//! this is the only mechanism that reaps dead SSE connections.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use log::debug;
use mio::net::TcpStream;

use crate::response::SseEvent;

/// A socket shared between the connection table and any number of channels.
pub(crate) type SharedSocket = Rc<RefCell<TcpStream>>;

/// All channels and their subscribers.
#[derive(Default)]
pub struct ChannelTable {
    channels: HashMap<String, Vec<SharedSocket>>,
}

impl ChannelTable {
    pub fn new() -> ChannelTable {
        ChannelTable::default()
    }

    /// Prepends the socket to the channel, creating the channel if needed.
    /// A socket may sit in any number of channels.
    pub(crate) fn subscribe(&mut self, key: &str, sock: SharedSocket) {
        self.channels
            .entry(key.to_owned())
            .or_default()
            .insert(0, sock);
    }

    /// Broadcasts one `data` frame to every subscriber, in subscription order
    /// (newest first). The channel is rebuilt to hold only the sockets whose
    /// write and flush both succeeded. Returns the number of deliveries.
    pub fn publish(&mut self, key: &str, message: &str) -> usize {
        let subscribers = match self.channels.remove(key) {
            None => return 0,
            Some(list) => list,
        };
        let frame = SseEvent::data(message).to_bytes();

        let before = subscribers.len();
        let mut alive = Vec::with_capacity(before);
        for sock in subscribers {
            let delivered = {
                let mut stream = sock.borrow_mut();
                crate::response::write_all_now(&mut *stream, &frame)
                    .and_then(|()| stream.flush())
                    .is_ok()
            };
            if delivered {
                alive.push(sock);
            }
        }

        let count = alive.len();
        if count < before {
            debug!("channel {}: reaped {} dead subscriber(s)", key, before - count);
        }
        if !alive.is_empty() {
            self.channels.insert(key.to_owned(), alive);
        }
        count
    }

    /// Number of sockets currently subscribed to a channel.
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.channels.get(key).map_or(0, Vec::len)
    }
}
