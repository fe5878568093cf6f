//! Pending continuations for in-flight lifecycle requests
//!
//! Each slot holds at most one waiting caller. Resolving delivers the result
//! and clears the slot; resolving an empty slot does nothing, so a terminal
//! event that arrives after the caller gave up is harmless.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

use super::permission::CaptureAuthorization;
use super::session::RecordingArtifact;
use crate::error::{RecorderError, Result, SlotKind};

/// Caller handle held in a slot
pub type CallerHandle<T> = oneshot::Sender<Result<T>>;

/// A registered caller waiting for its one resolution
#[derive(Debug)]
pub struct Waiter<T> {
    id: u64,
    tx: CallerHandle<T>,
}

impl<T> Waiter<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Deliver the result. Returns false if the caller has gone away.
    pub fn deliver(self, result: Result<T>) -> bool {
        self.tx.send(result).is_ok()
    }
}

/// Single-slot mailbox
#[derive(Debug)]
pub struct Mailbox<T> {
    kind: SlotKind,
    next_id: AtomicU64,
    slot: Mutex<Option<Waiter<T>>>,
}

impl<T> Mailbox<T> {
    pub fn new(kind: SlotKind) -> Self {
        Self {
            kind,
            next_id: AtomicU64::new(1),
            slot: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Waiter<T>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Park a caller handle. Fails if another caller is already waiting.
    pub fn register(&self, tx: CallerHandle<T>) -> Result<u64> {
        let mut slot = self.lock();
        if slot.is_some() {
            log::warn!("Rejected {} request: slot already occupied", self.kind);
            return Err(RecorderError::SlotOccupied(self.kind));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *slot = Some(Waiter { id, tx });
        log::debug!("Registered {} request #{}", self.kind, id);
        Ok(id)
    }

    /// Register a fresh caller and return its receiving end
    pub fn open(&self) -> Result<(u64, oneshot::Receiver<Result<T>>)> {
        let (tx, rx) = oneshot::channel();
        let id = self.register(tx)?;
        Ok((id, rx))
    }

    /// Resolve the waiting caller, if any. Returns whether a result was delivered.
    pub fn resolve(&self, result: Result<T>) -> bool {
        match self.take() {
            Some(waiter) => {
                let id = waiter.id;
                let delivered = waiter.deliver(result);
                if !delivered {
                    log::debug!("{} request #{} was abandoned by its caller", self.kind, id);
                }
                delivered
            }
            None => {
                log::debug!("No pending {} request to resolve", self.kind);
                false
            }
        }
    }

    /// Remove the waiting caller without resolving it
    pub fn take(&self) -> Option<Waiter<T>> {
        self.lock().take()
    }

    /// Drop the registration `id` if it is still the one waiting
    pub fn cancel(&self, id: u64) -> bool {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|w| w.id == id) {
            *slot = None;
            log::debug!("Cancelled {} request #{}", self.kind, id);
            true
        } else {
            false
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.lock().is_some()
    }

    /// Cancel registration `id` when the guard drops
    ///
    /// Covers callers whose future is dropped before it resolves. Once the
    /// slot was resolved the cancel finds nothing and does nothing.
    pub fn guard(&self, id: u64) -> SlotGuard<'_, T> {
        SlotGuard { mailbox: self, id }
    }
}

/// Frees a slot registration when the waiting caller goes away
#[must_use]
pub struct SlotGuard<'a, T> {
    mailbox: &'a Mailbox<T>,
    id: u64,
}

impl<T> Drop for SlotGuard<'_, T> {
    fn drop(&mut self) {
        if self.mailbox.cancel(self.id) {
            log::debug!(
                "{} request #{} abandoned before it resolved",
                self.mailbox.kind,
                self.id
            );
        }
    }
}

/// The lifecycle slots shared by the gate, the manager and the session host
#[derive(Debug)]
pub struct PendingCallbacks {
    pub permission: Mailbox<CaptureAuthorization>,
    pub start: Mailbox<()>,
    pub stop: Mailbox<Option<RecordingArtifact>>,
}

impl Default for PendingCallbacks {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingCallbacks {
    pub fn new() -> Self {
        Self {
            permission: Mailbox::new(SlotKind::Permission),
            start: Mailbox::new(SlotKind::Start),
            stop: Mailbox::new(SlotKind::Stop),
        }
    }

    /// Fail every waiting caller; used when the host goes away
    pub fn fail_pending(&self) {
        if self.permission.resolve(Err(RecorderError::HostUnavailable)) {
            log::warn!("Failed pending permission request: host shut down");
        }
        if self.start.resolve(Err(RecorderError::HostUnavailable)) {
            log::warn!("Failed pending start request: host shut down");
        }
        if self.stop.resolve(Err(RecorderError::HostUnavailable)) {
            log::warn!("Failed pending stop request: host shut down");
        }
    }
}
