//! Recording session state
//!
//! One cell holds the lifecycle state of the single capture session. Checks
//! and transitions happen under one lock; every change is published to
//! watchers.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use crate::error::{RecorderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Running,
    Paused,
    Stopping,
}

impl SessionState {
    pub fn is_idle(self) -> bool {
        self == SessionState::Idle
    }
}

/// Shared handle to the session state
#[derive(Debug, Clone)]
pub struct SessionStateCell {
    inner: Arc<StateInner>,
}

#[derive(Debug)]
struct StateInner {
    state: Mutex<SessionState>,
    publisher: watch::Sender<SessionState>,
}

impl Default for SessionStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateCell {
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(SessionState::Idle);
        Self {
            inner: Arc::new(StateInner {
                state: Mutex::new(SessionState::Idle),
                publisher,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> SessionState {
        *self.lock()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.publisher.subscribe()
    }

    /// Move Idle -> Starting, or fail if a session is already active
    pub fn claim(&self) -> Result<()> {
        let mut state = self.lock();
        if !state.is_idle() {
            log::warn!("Start rejected: session is {:?}", *state);
            return Err(RecorderError::SessionAlreadyActive);
        }
        self.publish(&mut state, SessionState::Starting);
        Ok(())
    }

    /// Move to `to` if the current state is one of `from`
    pub fn transition(&self, from: &[SessionState], to: SessionState) -> bool {
        let mut state = self.lock();
        if from.contains(&state) {
            self.publish(&mut state, to);
            true
        } else {
            false
        }
    }

    pub fn set(&self, to: SessionState) {
        let mut state = self.lock();
        self.publish(&mut state, to);
    }

    fn publish(&self, state: &mut MutexGuard<'_, SessionState>, to: SessionState) {
        if **state != to {
            log::debug!("Session state {:?} -> {:?}", **state, to);
        }
        **state = to;
        self.inner.publisher.send_replace(to);
    }
}
