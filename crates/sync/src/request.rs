//! Per-hash request with a single timeout.
//!
//! State moves Idle -> Started on `start`, then to exactly one of Finished or
//! TimedOut. Both exits are compare-and-swap on the same atomic, so a finish
//! racing the timer yields one outcome.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use spvd_consensus::Hash256;

use crate::timer::{TimerHandle, TimerToken};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RequestKind {
    Block,
    Transaction,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Block => "block",
            RequestKind::Transaction => "transaction",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum RequestState {
    Idle = 0,
    Started = 1,
    Finished = 2,
    TimedOut = 3,
}

impl RequestState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Started,
            2 => Self::Finished,
            3 => Self::TimedOut,
            _ => Self::Idle,
        }
    }
}

pub struct Request {
    hash: Hash256,
    kind: RequestKind,
    state: Arc<AtomicU8>,
    timer: Option<(TimerHandle, TimerToken)>,
}

impl Request {
    pub fn new(kind: RequestKind, hash: Hash256) -> Self {
        Self {
            hash,
            kind,
            state: Arc::new(AtomicU8::new(RequestState::Idle as u8)),
            timer: None,
        }
    }

    pub fn hash(&self) -> &Hash256 {
        &self.hash
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn state(&self) -> RequestState {
        RequestState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Dispatches the request through `send` and arms its timeout. Only an
    /// idle request starts; later calls do nothing.
    pub fn start<S, F>(&mut self, send: S, timer: &TimerHandle, timeout: Duration, on_timeout: F)
    where
        S: FnOnce(RequestKind, &Hash256),
        F: FnOnce(RequestKind, Hash256) + Send + 'static,
    {
        if !transition(&self.state, RequestState::Idle, RequestState::Started) {
            return;
        }
        send(self.kind, &self.hash);

        let state = Arc::clone(&self.state);
        let kind = self.kind;
        let hash = self.hash;
        let token = timer.arm(timeout, move || {
            if transition(&state, RequestState::Started, RequestState::TimedOut) {
                on_timeout(kind, hash);
            }
        });
        self.timer = Some((timer.clone(), token));
    }

    /// Cancels the timeout. Returns whether this call moved the request to
    /// Finished; a request already finished or timed out is left alone.
    pub fn finish(&mut self) -> bool {
        let finished = transition(&self.state, RequestState::Started, RequestState::Finished);
        if let Some((timer, token)) = self.timer.take() {
            timer.cancel(token);
        }
        finished
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("kind", &self.kind)
            .field("hash", &spvd_primitives::hash::hash256_to_hex(&self.hash))
            .field("state", &self.state())
            .finish()
    }
}

fn transition(state: &AtomicU8, from: RequestState, to: RequestState) -> bool {
    state
        .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}
