use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::{ChangeFeed, IdentityChanges, IdentityProvider};
use crate::error::{AuthError, AuthResult};
use crate::identity::{Identity, ProfilePatch, ProviderKind};

const MAX_FAILED_ATTEMPTS: u32 = 5;
const MIN_PASSWORD_LENGTH: usize = 6;

/// Provider operations that can have a failure injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOp {
    CreateAccount,
    SignIn,
    Federated,
    SignOut,
    UpdateProfile,
}

struct Account {
    identity: Identity,
    password: Option<String>,
    failed_attempts: u32,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    federated: HashMap<ProviderKind, Identity>,
    injected: HashMap<ProviderOp, AuthError>,
}

impl MemoryState {
    fn take_injected(&mut self, op: ProviderOp) -> AuthResult<()> {
        match self.injected.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// In-process identity provider for local runs and tests.
///
/// An account that fails password sign-in five times in a row is locked and
/// reports [`AuthError::RateLimited`] from then on. Federated sign-in succeeds
/// only for provider kinds registered with
/// [`with_federated_account`](Self::with_federated_account); otherwise the flow
/// is treated as cancelled by the user.
#[derive(Default)]
pub struct InMemoryIdentityProvider {
    state: Mutex<MemoryState>,
    feed: ChangeFeed,
}

fn account_key(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a password account without signing it in.
    pub fn with_account(self, identity: Identity, password: impl Into<String>) -> Self {
        {
            let mut state = self.state.lock().expect("mutex poisoned");
            state.accounts.insert(
                account_key(&identity.email),
                Account {
                    identity,
                    password: Some(password.into()),
                    failed_attempts: 0,
                },
            );
        }
        self
    }

    /// Identity returned when the interactive flow for `kind` completes.
    pub fn with_federated_account(self, kind: ProviderKind, identity: Identity) -> Self {
        self.state
            .lock()
            .expect("mutex poisoned")
            .federated
            .insert(kind, identity);
        self
    }

    /// Make the next call of `op` fail with `err`.
    pub fn inject_failure(&self, op: ProviderOp, err: AuthError) {
        self.state
            .lock()
            .expect("mutex poisoned")
            .injected
            .insert(op, err);
    }

    pub fn current(&self) -> Option<Identity> {
        self.feed.current()
    }

    /// Emit an identity change that did not originate from a call on this
    /// provider, such as a sign-out in another window or an expired credential.
    pub fn notify(&self, change: Option<Identity>) {
        self.feed.publish(change);
    }

    fn sign_in_as(&self, identity: Identity) -> Identity {
        debug!(uid = %identity.uid, "in-memory provider signed in");
        self.feed.publish(Some(identity.clone()));
        identity
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn create_account(&self, email: &str, password: &str) -> AuthResult<Identity> {
        let identity = {
            let mut state = self.state.lock().expect("mutex poisoned");
            state.take_injected(ProviderOp::CreateAccount)?;

            let key = account_key(email);
            if state.accounts.contains_key(&key) {
                return Err(AuthError::EmailInUse);
            }
            if password.chars().count() < MIN_PASSWORD_LENGTH {
                return Err(AuthError::WeakPassword);
            }

            let identity = Identity::new(Uuid::new_v4().to_string(), email.trim());
            state.accounts.insert(
                key,
                Account {
                    identity: identity.clone(),
                    password: Some(password.to_string()),
                    failed_attempts: 0,
                },
            );
            identity
        };

        Ok(self.sign_in_as(identity))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Identity> {
        let identity = {
            let mut state = self.state.lock().expect("mutex poisoned");
            state.take_injected(ProviderOp::SignIn)?;

            let account = state
                .accounts
                .get_mut(&account_key(email))
                .ok_or(AuthError::AccountNotFound)?;

            if account.failed_attempts >= MAX_FAILED_ATTEMPTS {
                return Err(AuthError::RateLimited);
            }

            if account.password.as_deref() != Some(password) {
                account.failed_attempts += 1;
                return Err(AuthError::InvalidCredential);
            }

            account.failed_attempts = 0;
            account.identity.clone()
        };

        Ok(self.sign_in_as(identity))
    }

    async fn sign_in_federated(&self, kind: ProviderKind) -> AuthResult<Identity> {
        let identity = {
            let mut state = self.state.lock().expect("mutex poisoned");
            state.take_injected(ProviderOp::Federated)?;

            let identity = state
                .federated
                .get(&kind)
                .cloned()
                .ok_or(AuthError::FederatedCancelled)?;
            state
                .accounts
                .entry(account_key(&identity.email))
                .or_insert_with(|| Account {
                    identity: identity.clone(),
                    password: None,
                    failed_attempts: 0,
                });
            identity
        };

        Ok(self.sign_in_as(identity))
    }

    async fn sign_out(&self) -> AuthResult<()> {
        self.state
            .lock()
            .expect("mutex poisoned")
            .take_injected(ProviderOp::SignOut)?;
        if self.feed.clear() {
            debug!("in-memory provider signed out");
        }
        Ok(())
    }

    async fn update_profile(&self, patch: &ProfilePatch) -> AuthResult<Identity> {
        self.state
            .lock()
            .expect("mutex poisoned")
            .take_injected(ProviderOp::UpdateProfile)?;

        let updated = self
            .feed
            .update(|identity| identity.apply(patch))
            .ok_or(AuthError::NotSignedIn)?;
        if let Some(account) = self
            .state
            .lock()
            .expect("mutex poisoned")
            .accounts
            .get_mut(&account_key(&updated.email))
        {
            account.identity = updated.clone();
        }
        Ok(updated)
    }

    fn subscribe(&self) -> IdentityChanges {
        self.feed.subscribe()
    }
}
