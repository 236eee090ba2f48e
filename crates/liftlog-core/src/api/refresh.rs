//! Shared credential state and the single-flight refresh guard.
//!
//! Every request records the token `generation` it was sent with. A
//! rejected request only starts a refresh when no newer credentials exist
//! and no refresh is already running; otherwise it joins the running one
//! or replays with the credentials installed since.

use futures::future::{BoxFuture, Shared};

use crate::models::TokenPair;

/// Outcome of a refresh, shared by every request waiting on it
pub(crate) type RefreshFuture = Shared<BoxFuture<'static, Result<String, RefreshFailed>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RefreshFailed;

/// Credentials a request was sent with
#[derive(Debug, Clone)]
pub(crate) struct Credentials {
    pub access_token: Option<String>,
    pub generation: u64,
}

/// What a rejected request should do next
pub(crate) enum NextStep {
    /// Credentials changed after the request was sent; replay with these
    Replay(String),
    /// Credentials were cleared after the request was sent
    SignedOut,
    /// Wait on the refresh already in flight
    Join(RefreshFuture),
    /// No refresh running; the caller must start one with this refresh token
    Start {
        refresh_token: Option<String>,
        generation: u64,
    },
}

#[derive(Default)]
pub(crate) struct TokenState {
    tokens: Option<TokenPair>,
    /// Bumped on every change to `tokens`
    generation: u64,
    in_flight: Option<RefreshFuture>,
}

impl TokenState {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            access_token: self.tokens.as_ref().map(|t| t.token.clone()),
            generation: self.generation,
        }
    }

    pub fn tokens(&self) -> Option<&TokenPair> {
        self.tokens.as_ref()
    }

    /// Install or clear credentials from outside the refresh flow. Any
    /// refresh in flight is orphaned: it will not overwrite these.
    pub fn replace(&mut self, tokens: Option<TokenPair>) {
        self.tokens = tokens;
        self.generation += 1;
        self.in_flight = None;
    }

    pub fn next_step(&self, seen_generation: u64) -> NextStep {
        if self.generation != seen_generation {
            return match &self.tokens {
                Some(tokens) => NextStep::Replay(tokens.token.clone()),
                None => NextStep::SignedOut,
            };
        }
        match &self.in_flight {
            Some(flight) => NextStep::Join(flight.clone()),
            None => NextStep::Start {
                refresh_token: self.tokens.as_ref().map(|t| t.refresh_token.clone()),
                generation: self.generation,
            },
        }
    }

    /// Drop the credentials of `generation` after the backend rejected
    /// them even though they were fresh. Returns false if they were already
    /// replaced or cleared, so each generation is expired at most once.
    pub fn expire(&mut self, generation: u64) -> bool {
        if self.generation != generation || self.tokens.is_none() {
            return false;
        }
        self.replace(None);
        true
    }

    pub fn begin(&mut self, flight: RefreshFuture) {
        self.in_flight = Some(flight);
    }

    /// Record a refresh outcome. Returns false when the refresh was
    /// orphaned by `replace`, in which case nothing changes.
    pub fn finish(&mut self, started_at: u64, tokens: Option<TokenPair>) -> bool {
        if self.generation != started_at {
            return false;
        }
        self.tokens = tokens;
        self.generation += 1;
        self.in_flight = None;
        true
    }
}
