//! Screen capture consent
//!
//! Capture needs a fresh, user-granted authorization for every session. The
//! foreground context shows the consent flow; its answer comes back later
//! through a [`ConsentResponder`] and is matched to the waiting requester by
//! request id.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::callbacks::PendingCallbacks;
use crate::error::{RecorderError, Result};

/// Single-use grant to capture the screen
///
/// Not `Clone`: it is moved into the capture source when a session starts.
#[derive(Debug)]
pub struct CaptureAuthorization {
    token: u64,
    payload: serde_json::Value,
}

impl CaptureAuthorization {
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Raw grant data from the consent flow
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    #[cfg(test)]
    pub(crate) fn for_tests(token: u64) -> Self {
        Self {
            token,
            payload: serde_json::Value::Null,
        }
    }
}

/// User's answer to a consent prompt
#[derive(Debug, Clone, PartialEq)]
pub enum ConsentResponse {
    Granted(serde_json::Value),
    Denied,
}

/// Delivers consent answers back to the gate
#[derive(Debug, Clone)]
pub struct ConsentResponder {
    callbacks: Arc<PendingCallbacks>,
}

impl ConsentResponder {
    /// Complete consent request `request_id`
    ///
    /// A completion for a request other than the one waiting resolves the
    /// waiting requester as denied. With nobody waiting this is a no-op.
    pub fn complete(&self, request_id: u64, response: ConsentResponse) {
        let Some(waiter) = self.callbacks.permission.take() else {
            log::warn!(
                "Consent result for request #{} arrived with no request pending, ignoring",
                request_id
            );
            return;
        };

        let result = if waiter.id() != request_id {
            log::warn!(
                "Consent result for request #{} does not match pending request #{}",
                request_id,
                waiter.id()
            );
            Err(RecorderError::PermissionDenied)
        } else {
            match response {
                ConsentResponse::Granted(payload) => {
                    log::info!("Screen capture consent granted (request #{})", request_id);
                    Ok(CaptureAuthorization {
                        token: request_id,
                        payload,
                    })
                }
                ConsentResponse::Denied => {
                    log::info!("Screen capture consent denied (request #{})", request_id);
                    Err(RecorderError::PermissionDenied)
                }
            }
        };

        if !waiter.deliver(result) {
            log::debug!("Consent requester went away before the result arrived");
        }
    }
}

/// A consent prompt the host context should show
#[derive(Debug, Clone)]
pub struct ConsentRequest {
    pub request_id: u64,
    pub responder: ConsentResponder,
}

impl ConsentRequest {
    pub fn grant(&self, payload: serde_json::Value) {
        self.responder
            .complete(self.request_id, ConsentResponse::Granted(payload));
    }

    pub fn deny(&self) {
        self.responder
            .complete(self.request_id, ConsentResponse::Denied);
    }
}

/// Foreground context able to show the consent flow
pub trait ConsentHost: Send + Sync {
    /// Show the consent flow; the answer goes through `request.responder`
    fn launch_consent(&self, request: ConsentRequest) -> anyhow::Result<()>;
}

pub struct CapabilityGate {
    callbacks: Arc<PendingCallbacks>,
    host: Mutex<Option<Arc<dyn ConsentHost>>>,
    timeout: Option<Duration>,
}

impl CapabilityGate {
    pub fn new(callbacks: Arc<PendingCallbacks>, timeout: Option<Duration>) -> Self {
        Self {
            callbacks,
            host: Mutex::new(None),
            timeout,
        }
    }

    pub fn attach_host(&self, host: Arc<dyn ConsentHost>) {
        *self.host.lock().unwrap_or_else(PoisonError::into_inner) = Some(host);
    }

    pub fn detach_host(&self) {
        *self.host.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn responder(&self) -> ConsentResponder {
        ConsentResponder {
            callbacks: self.callbacks.clone(),
        }
    }

    /// Ask the user for a one-shot capture authorization
    pub async fn request_authorization(&self) -> Result<CaptureAuthorization> {
        let host = self
            .host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(RecorderError::NoHostContext)?;

        let (request_id, rx) = self.callbacks.permission.open()?;
        // frees the slot on every early return, and if this future is dropped
        let _pending = self.callbacks.permission.guard(request_id);
        log::info!("Requesting screen capture consent (request #{})", request_id);

        let request = ConsentRequest {
            request_id,
            responder: self.responder(),
        };
        if let Err(err) = host.launch_consent(request) {
            log::error!("Failed to launch consent flow: {:#}", err);
            return Err(RecorderError::NoHostContext);
        }

        let received = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    log::warn!(
                        "Consent request #{} timed out after {:?}",
                        request_id,
                        limit
                    );
                    return Err(RecorderError::StartFailed(
                        "timed out waiting for capture consent".to_string(),
                    ));
                }
            },
            None => rx.await,
        };

        received.unwrap_or(Err(RecorderError::HostUnavailable))
    }
}
