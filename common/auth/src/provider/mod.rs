//! Identity provider seam.
//!
//! The session store never verifies credentials itself. Everything goes through
//! an [`IdentityProvider`], which also reports identity changes on a stream the
//! store reconciles against the user registry.

pub mod memory;
pub mod rest;

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AuthResult;
use crate::identity::{Identity, ProfilePatch, ProviderKind};

pub use memory::{InMemoryIdentityProvider, ProviderOp};
pub use rest::{FederatedAuthorizer, FederatedCredential, RestIdentityProvider};

/// Identity-change notifications: `Some` when a user is signed in, `None` otherwise.
pub type IdentityChanges = mpsc::UnboundedReceiver<Option<Identity>>;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_account(&self, email: &str, password: &str) -> AuthResult<Identity>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Identity>;

    /// Run the interactive federated flow for `kind`.
    async fn sign_in_federated(&self, kind: ProviderKind) -> AuthResult<Identity>;

    async fn sign_out(&self) -> AuthResult<()>;

    async fn update_profile(&self, patch: &ProfilePatch) -> AuthResult<Identity>;

    /// Subscribe to identity changes. The current state is delivered first.
    fn subscribe(&self) -> IdentityChanges;
}

type Subscriber = mpsc::UnboundedSender<Option<Identity>>;

#[derive(Default)]
struct FeedState {
    current: Option<Identity>,
    subscribers: Vec<Subscriber>,
}

impl FeedState {
    fn fan_out(&mut self) {
        let change = self.current.clone();
        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

/// The provider's current identity and its subscribers, behind one lock.
///
/// Changing the identity and notifying subscribers happen in the same
/// critical section, as do reading it and registering a subscriber, so every
/// subscriber sees the changes in the order they were applied and none is lost.
#[derive(Default)]
pub(crate) struct ChangeFeed {
    state: Mutex<FeedState>,
}

impl ChangeFeed {
    pub(crate) fn current(&self) -> Option<Identity> {
        self.state.lock().expect("mutex poisoned").current.clone()
    }

    /// Register a subscriber; it receives the current identity first.
    pub(crate) fn subscribe(&self) -> IdentityChanges {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().expect("mutex poisoned");
        // A fresh receiver is still open, so the initial send cannot fail.
        let _ = tx.send(state.current.clone());
        state.subscribers.push(tx);
        rx
    }

    /// Replace the current identity and notify every subscriber.
    pub(crate) fn publish(&self, change: Option<Identity>) {
        let mut state = self.state.lock().expect("mutex poisoned");
        state.current = change;
        state.fan_out();
    }

    /// Sign the current identity out. Notifies only if someone was signed in.
    pub(crate) fn clear(&self) -> bool {
        let mut state = self.state.lock().expect("mutex poisoned");
        if state.current.take().is_none() {
            return false;
        }
        state.fan_out();
        true
    }

    /// Modify the signed-in identity in place and notify; `None` when signed out.
    pub(crate) fn update<F>(&self, apply: F) -> Option<Identity>
    where
        F: FnOnce(&mut Identity),
    {
        let mut state = self.state.lock().expect("mutex poisoned");
        let identity = state.current.as_mut()?;
        apply(identity);
        let updated = identity.clone();
        state.fan_out();
        Some(updated)
    }
}
