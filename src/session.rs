// Copyright (c) 2026 The Maison developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Sessions handling.
//!
//! A session is a server-side record keyed by an unguessable 64-character
//! token that the client replays as its `Cookie`. Sessions are created lazily
//! on the first request without a live token and evicted lazily once idle for
//! longer than the configured window: either when the stale token is next
//! presented, or during the periodic sweep that runs every
//! `clean_sessions_every` creations.

use std::collections::HashMap;
use std::error::Error;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;

/// What a new-session hook may return. A hook error is fatal to the event
/// loop; hooks are privileged code.
pub type HookResult = Result<(), Box<dyn Error + Send + Sync>>;

type HookFn = dyn Fn(&Session) -> HookResult;

/// A live session.
pub struct Session {
    token: String,
    last_poked: Instant,
}

impl Session {
    /// The token identifying this session.
    pub fn token(&self) -> &str {
        &self.token
    }

    fn poke(&mut self) {
        self.last_poked = Instant::now();
    }

    fn idling(&self, max_idle: Duration) -> bool {
        self.last_poked.elapsed() > max_idle
    }
}

/// All live sessions, plus the hooks to run when one is born.
pub struct SessionTable {
    sessions: HashMap<String, Session>,
    hooks: Vec<Rc<HookFn>>,
    max_idle: Duration,
    clean_every: u32,
    created_since_sweep: u32,
}

impl SessionTable {
    pub(crate) fn new(max_idle: Duration, clean_every: u32) -> SessionTable {
        SessionTable {
            sessions: HashMap::new(),
            hooks: Vec::new(),
            max_idle,
            clean_every,
            created_since_sweep: 0,
        }
    }

    /// Creates a session, runs every registered hook on it, and returns its
    /// token. Every `clean_every` creations the whole table is swept for idle
    /// sessions first.
    pub fn new_session(&mut self) -> Result<String, Box<dyn Error + Send + Sync>> {
        self.created_since_sweep += 1;
        if self.created_since_sweep >= self.clean_every {
            self.created_since_sweep = 0;
            self.clean_sessions();
        }

        let token = generate_token();
        self.sessions.insert(
            token.clone(),
            Session {
                token: token.clone(),
                last_poked: Instant::now(),
            },
        );

        let hooks = self.hooks.clone();
        let session = self
            .sessions
            .get(token.as_str())
            .expect("session just inserted");
        for hook in hooks {
            hook(session)?;
        }

        Ok(token)
    }

    /// Looks up a token. A session found idling is removed and reported
    /// absent; a live one is poked.
    pub fn get_session(&mut self, token: &str) -> Option<&Session> {
        let idling = self.sessions.get(token)?.idling(self.max_idle);
        if idling {
            self.sessions.remove(token);
            return None;
        }
        let session = self.sessions.get_mut(token).expect("session just checked");
        session.poke();
        Some(&*session)
    }

    /// Turns whatever token the client presented into a live session: the
    /// presented one if it is still good, a fresh one otherwise. The flag says
    /// whether the presented token was good, which decides whether the
    /// response must set a cookie.
    pub(crate) fn resolve(
        &mut self,
        presented: Option<&str>,
    ) -> Result<(String, bool), Box<dyn Error + Send + Sync>> {
        if let Some(token) = presented {
            if self.get_session(token).is_some() {
                return Ok((token.to_owned(), true));
            }
        }
        Ok((self.new_session()?, false))
    }

    /// A look without a poke.
    pub(crate) fn peek(&self, token: &str) -> Option<&Session> {
        self.sessions.get(token)
    }

    /// Removes every idle session.
    pub fn clean_sessions(&mut self) {
        let max_idle = self.max_idle;
        self.sessions.retain(|_, s| !s.idling(max_idle));
    }

    pub fn new_session_hook<F>(&mut self, hook: F)
    where
        F: Fn(&Session) -> HookResult + 'static,
    {
        self.hooks.push(Rc::new(hook));
    }

    pub fn clear_session_hooks(&mut self) {
        self.hooks.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Generates a session token: 64 alphanumeric characters from the OS RNG.
/// 62^64 possibilities is reasonable, and nothing in it needs escaping.
pub fn generate_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod test {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::thread;
    use std::time::Duration;

    use super::{generate_token, SessionTable};

    fn table(max_idle: Duration) -> SessionTable {
        SessionTable::new(max_idle, 1_000)
    }

    #[test]
    fn tokens_are_long_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn resolve_creates_then_recognizes() {
        let mut sessions = table(Duration::from_secs(60));

        let (token, had) = sessions.resolve(None).unwrap();
        assert!(!had);

        let (again, had) = sessions.resolve(Some(&token)).unwrap();
        assert!(had);
        assert_eq!(again, token);
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn stale_token_is_evicted_and_replaced() {
        let mut sessions = table(Duration::from_millis(10));
        let (token, _) = sessions.resolve(None).unwrap();

        thread::sleep(Duration::from_millis(30));

        assert!(sessions.get_session(&token).is_none());
        let (fresh, had) = sessions.resolve(Some(&token)).unwrap();
        assert!(!had);
        assert_ne!(fresh, token);
    }

    #[test]
    fn get_session_pokes() {
        let mut sessions = table(Duration::from_millis(50));
        let (token, _) = sessions.resolve(None).unwrap();

        // keep touching it past the idle window; it must survive
        for _ in 0..4 {
            thread::sleep(Duration::from_millis(20));
            assert!(sessions.get_session(&token).is_some());
        }
    }

    #[test]
    fn hooks_run_on_creation_only() {
        let count = Rc::new(Cell::new(0));
        let mut sessions = table(Duration::from_secs(60));
        let seen = count.clone();
        sessions.new_session_hook(move |session| {
            assert_eq!(session.token().len(), 64);
            seen.set(seen.get() + 1);
            Ok(())
        });

        let (token, _) = sessions.resolve(None).unwrap();
        sessions.resolve(Some(&token)).unwrap();
        assert_eq!(count.get(), 1);

        sessions.clear_session_hooks();
        sessions.resolve(None).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn hook_errors_surface() {
        let mut sessions = table(Duration::from_secs(60));
        sessions.new_session_hook(|_| Err("refused".into()));
        assert!(sessions.new_session().is_err());
    }

    #[test]
    fn sweep_runs_every_nth_creation() {
        let mut sessions = SessionTable::new(Duration::from_millis(10), 3);

        sessions.new_session().unwrap();
        sessions.new_session().unwrap();
        thread::sleep(Duration::from_millis(30));

        // third creation triggers the sweep, clearing the two idle ones
        sessions.new_session().unwrap();
        assert_eq!(sessions.len(), 1);
    }
}
