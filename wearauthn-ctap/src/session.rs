//! Per-connection session state
//!
//! The status channel lets transport code (for example a watch-face
//! indicator) observe what the authenticator is doing while a request is
//! suspended on the user. Status transitions are scoped: guards restore the
//! previous state on drop, so cancellation and early returns cannot leave the
//! authenticator stuck in `Processing`.

use crate::request_info::RequestInfo;

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthenticatorStatus {
    #[default]
    Idle,
    Processing,
    WaitingForUserPresence,
}

/// Shared handle to the authenticator status
#[derive(Debug, Clone)]
pub struct StatusHandle {
    tx: Arc<watch::Sender<AuthenticatorStatus>>,
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AuthenticatorStatus::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> AuthenticatorStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthenticatorStatus> {
        self.tx.subscribe()
    }

    fn set(&self, status: AuthenticatorStatus) {
        let previous = self.tx.send_replace(status);
        if previous != status {
            tracing::trace!(?previous, ?status, "authenticator status changed");
        }
    }

    /// `Processing` until the guard drops, then `Idle`
    pub fn processing(&self) -> StatusGuard {
        self.set(AuthenticatorStatus::Processing);
        StatusGuard {
            handle: self.clone(),
            restore: AuthenticatorStatus::Idle,
        }
    }

    /// `WaitingForUserPresence` until the guard drops, then back to `Processing`
    pub fn waiting_for_user(&self) -> StatusGuard {
        self.set(AuthenticatorStatus::WaitingForUserPresence);
        StatusGuard {
            handle: self.clone(),
            restore: AuthenticatorStatus::Processing,
        }
    }
}

#[must_use = "the status reverts as soon as the guard is dropped"]
pub struct StatusGuard {
    handle: StatusHandle,
    restore: AuthenticatorStatus,
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        self.handle.set(self.restore);
    }
}

/// Assertions left over from a GetAssertion call, served by GetNextAssertion
#[derive(Debug)]
pub struct AssertionCursor {
    assertions: Vec<Vec<u8>>,
    next: usize,
    request_info: RequestInfo,
}

impl AssertionCursor {
    /// `assertions` holds the encoded responses still to be handed out
    pub fn new(assertions: Vec<Vec<u8>>, request_info: RequestInfo) -> Self {
        Self {
            assertions,
            next: 0,
            request_info,
        }
    }

    pub fn next_assertion(&mut self) -> Option<Vec<u8>> {
        let assertion = self.assertions.get(self.next)?.clone();
        self.next += 1;
        Some(assertion)
    }

    pub fn is_exhausted(&self) -> bool {
        self.next >= self.assertions.len()
    }

    pub fn remaining(&self) -> usize {
        self.assertions.len().saturating_sub(self.next)
    }

    pub fn request_info(&self) -> &RequestInfo {
        &self.request_info
    }
}
