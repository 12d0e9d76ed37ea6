#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use portal_auth::{
    AuthError, AuthResult, Identity, IdentityChanges, IdentityProvider, InMemoryUserRegistry,
    ProfilePatch, ProviderKind, RegistryError, Role, SessionSnapshot, SessionStore, UserRecord,
    UserRegistry, UserUpsert,
};
use tokio::sync::{mpsc, Notify, Semaphore};

pub const WAIT: Duration = Duration::from_secs(2);

/// Wait until the store publishes a snapshot matching `predicate`.
pub async fn wait_until<F>(store: &SessionStore, predicate: F) -> Arc<SessionSnapshot>
where
    F: FnMut(&Arc<SessionSnapshot>) -> bool,
{
    let mut receiver = store.subscribe();
    let snapshot = Arc::clone(
        &tokio::time::timeout(WAIT, receiver.wait_for(predicate))
            .await
            .expect("timed out waiting for session snapshot")
            .expect("session store closed"),
    );
    snapshot
}

/// Registry whose lookups block until the test releases them.
#[derive(Clone)]
pub struct GatedRegistry {
    pub inner: InMemoryUserRegistry,
    gate: Arc<Semaphore>,
    started: Arc<AtomicUsize>,
    started_signal: Arc<Notify>,
}

impl GatedRegistry {
    pub fn new(inner: InMemoryUserRegistry) -> Self {
        Self {
            inner,
            gate: Arc::new(Semaphore::new(0)),
            started: Arc::new(AtomicUsize::new(0)),
            started_signal: Arc::new(Notify::new()),
        }
    }

    /// Let `count` pending or future lookups through.
    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }

    pub async fn wait_for_lookups(&self, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.started.load(Ordering::SeqCst) < count {
                self.started_signal.notified().await;
            }
        })
        .await
        .expect("timed out waiting for role lookup");
    }
}

#[async_trait]
impl UserRegistry for GatedRegistry {
    async fn find_user(&self, email: &str) -> Result<Option<UserRecord>, RegistryError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.started_signal.notify_one();
        self.gate
            .acquire()
            .await
            .map_err(|err| RegistryError::Transport(err.to_string()))?
            .forget();
        self.inner.find_user(email).await
    }

    async fn upsert_user(&self, user: &UserUpsert) -> Result<(), RegistryError> {
        self.inner.upsert_user(user).await
    }

    async fn set_role(&self, email: &str, role: Role) -> Result<(), RegistryError> {
        self.inner.set_role(email, role).await
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, RegistryError> {
        self.inner.list_users().await
    }
}

/// Provider that never reports an identity change, keeping the store pending.
#[derive(Default)]
pub struct SilentProvider {
    senders: Mutex<Vec<mpsc::UnboundedSender<Option<Identity>>>>,
}

#[async_trait]
impl IdentityProvider for SilentProvider {
    async fn create_account(&self, _email: &str, _password: &str) -> AuthResult<Identity> {
        Err(AuthError::Provider("silent".into()))
    }

    async fn sign_in_with_password(&self, _email: &str, _password: &str) -> AuthResult<Identity> {
        Err(AuthError::Provider("silent".into()))
    }

    async fn sign_in_federated(&self, _kind: ProviderKind) -> AuthResult<Identity> {
        Err(AuthError::Provider("silent".into()))
    }

    async fn sign_out(&self) -> AuthResult<()> {
        Ok(())
    }

    async fn update_profile(&self, _patch: &ProfilePatch) -> AuthResult<Identity> {
        Err(AuthError::NotSignedIn)
    }

    fn subscribe(&self) -> IdentityChanges {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx);
        rx
    }
}
