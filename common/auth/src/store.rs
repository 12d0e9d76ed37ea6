//! Process-wide session store.
//!
//! The store owns a single [`SessionSnapshot`] inside a `watch` channel and
//! replaces it wholesale on every transition. Transitions are driven only by
//! the identity provider's change notifications; the action methods ask the
//! provider to do something and leave publishing to the notification that
//! follows.
//!
//! Every notification is numbered with an epoch. A role lookup publishes its
//! result only if no snapshot for a newer epoch has been published in the
//! meantime, so a slow lookup for a user who has already signed out can never
//! resurrect that user's session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use portal_observability::SessionMetrics;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{AuthError, AuthResult, SessionError};
use crate::guards::RouteGuard;
use crate::identity::{Identity, ProfilePatch, ProviderKind};
use crate::profile::ProfileUpdateError;
use crate::provider::{IdentityChanges, IdentityProvider};
use crate::registry::{UserRegistry, UserUpsert};
use crate::roles::Role;
use crate::snapshot::{RoleResolution, Session, SessionSnapshot, SessionStatus};
use crate::validation::is_valid_email;

struct StoreInner {
    provider: Arc<dyn IdentityProvider>,
    registry: Arc<dyn UserRegistry>,
    snapshot: watch::Sender<Arc<SessionSnapshot>>,
    last_epoch: AtomicU64,
    metrics: Option<SessionMetrics>,
}

pub struct SessionStore {
    inner: Arc<StoreInner>,
    guard: RouteGuard,
    listener: JoinHandle<()>,
}

pub struct SessionStoreBuilder {
    provider: Arc<dyn IdentityProvider>,
    registry: Arc<dyn UserRegistry>,
    guard: RouteGuard,
    metrics: Option<SessionMetrics>,
}

impl SessionStoreBuilder {
    pub fn with_config(mut self, config: &SessionConfig) -> Self {
        self.guard = RouteGuard::from_config(config);
        self
    }

    pub fn with_guard(mut self, guard: RouteGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_metrics(mut self, metrics: SessionMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Subscribe to the provider and start reconciling. Must run inside a tokio runtime.
    pub fn start(self) -> SessionStore {
        let (snapshot, _) = watch::channel(Arc::new(SessionSnapshot::pending()));
        let inner = Arc::new(StoreInner {
            provider: self.provider,
            registry: self.registry,
            snapshot,
            last_epoch: AtomicU64::new(0),
            metrics: self.metrics,
        });

        let changes = inner.provider.subscribe();
        let listener = tokio::spawn(listen(Arc::downgrade(&inner), changes));

        SessionStore {
            inner,
            guard: self.guard,
            listener,
        }
    }
}

async fn listen(inner: Weak<StoreInner>, mut changes: IdentityChanges) {
    while let Some(change) = changes.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.reconcile(change);
    }
    debug!("identity change stream closed");
}

impl SessionStore {
    pub fn builder(
        provider: Arc<dyn IdentityProvider>,
        registry: Arc<dyn UserRegistry>,
    ) -> SessionStoreBuilder {
        SessionStoreBuilder {
            provider,
            registry,
            guard: RouteGuard::default(),
            metrics: None,
        }
    }

    /// Start a store with default guard paths and no metrics.
    pub fn start(provider: Arc<dyn IdentityProvider>, registry: Arc<dyn UserRegistry>) -> Self {
        Self::builder(provider, registry).start()
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.inner.snapshot.borrow().clone()
    }

    /// Observe snapshot replacements.
    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionSnapshot>> {
        self.inner.snapshot.subscribe()
    }

    /// Wait until the first identity-change notification has been reconciled.
    pub async fn settled(&self) -> Arc<SessionSnapshot> {
        let mut receiver = self.subscribe();
        let settled = receiver
            .wait_for(|snapshot| snapshot.status() != SessionStatus::Pending)
            .await
            .map(|snapshot| snapshot.clone());
        match settled {
            Ok(snapshot) => snapshot,
            Err(_) => self.snapshot(),
        }
    }

    pub fn guard(&self) -> &RouteGuard {
        &self.guard
    }

    pub fn metrics(&self) -> Option<&SessionMetrics> {
        self.inner.metrics.as_ref()
    }

    /// Create an account. The password policy is the caller's responsibility.
    pub async fn sign_up(&self, email: &str, password: &str) -> AuthResult<Identity> {
        if !is_valid_email(email) {
            return Err(AuthError::InvalidEmail);
        }
        let result = self.inner.provider.create_account(email.trim(), password).await;
        log_outcome("sign_up", &result);
        result
    }

    /// Verify credentials. The snapshot only changes once the provider reports it.
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<Identity> {
        let result = self.inner.provider.sign_in_with_password(email.trim(), password).await;
        log_outcome("sign_in", &result);
        result
    }

    /// Federated sign-in, followed by an idempotent registry upsert of the identity.
    pub async fn sign_in_with_provider(&self, kind: ProviderKind) -> Result<Identity, SessionError> {
        let result = self.inner.provider.sign_in_federated(kind).await;
        log_outcome("sign_in_federated", &result);
        let identity = result?;

        self.inner
            .registry
            .upsert_user(&UserUpsert::from(&identity))
            .await
            .map_err(|source| {
                warn!(provider = %kind, email = %identity.email, error = %source, "registry upsert after federated sign-in failed");
                SessionError::RegistrySync {
                    email: identity.email.clone(),
                    source,
                }
            })?;

        Ok(identity)
    }

    /// Ask the provider to sign out; the following notification clears the session.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let result = self.inner.provider.sign_out().await;
        log_outcome("sign_out", &result);
        result
    }

    /// Write display name and avatar to the provider, then to the registry.
    ///
    /// Both writes are attempted even if the first one fails.
    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<(), ProfileUpdateError> {
        let email = self
            .snapshot()
            .identity()
            .map(|identity| identity.email.clone())
            .ok_or(ProfileUpdateError::NotSignedIn)?;
        if patch.is_empty() {
            return Ok(());
        }

        let provider = self.inner.provider.update_profile(&patch).await.map(|_| ());
        let registry = self
            .inner
            .registry
            .upsert_user(&UserUpsert {
                email: email.clone(),
                name: patch.display_name.clone(),
                image: patch.photo_url.clone(),
            })
            .await;

        let outcome = ProfileUpdateError::from_steps(provider, registry);
        if let Err(err) = &outcome {
            warn!(email = %email, error = %err, "profile update incomplete");
        }
        outcome
    }

    /// Look the current user's role up again, e.g. after an administrator changed it.
    ///
    /// The result is published under the epoch of the snapshot it refreshes, so
    /// any identity change reported meanwhile takes precedence.
    pub async fn refresh_role(&self) -> Arc<SessionSnapshot> {
        let current = self.snapshot();
        let Some(identity) = current.identity().cloned() else {
            return current;
        };

        let epoch = current.epoch;
        let (role, resolution) =
            resolve_role(self.inner.registry.as_ref(), &identity, self.inner.metrics.as_ref())
                .await;
        self.inner.publish(
            epoch,
            Session::Authenticated {
                identity,
                role,
                resolution,
            },
        );
        self.snapshot()
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl StoreInner {
    fn next_epoch(&self) -> u64 {
        self.last_epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn reconcile(self: &Arc<Self>, change: Option<Identity>) {
        let epoch = self.next_epoch();
        let Some(identity) = change else {
            self.publish(epoch, Session::Anonymous);
            return;
        };

        self.publish(
            epoch,
            Session::Authenticated {
                identity: identity.clone(),
                role: Role::default(),
                resolution: RoleResolution::Pending,
            },
        );

        let registry = Arc::clone(&self.registry);
        let metrics = self.metrics.clone();
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let (role, resolution) = resolve_role(registry.as_ref(), &identity, metrics.as_ref()).await;
            match store.upgrade() {
                Some(store) => {
                    store.publish(
                        epoch,
                        Session::Authenticated {
                            identity,
                            role,
                            resolution,
                        },
                    );
                }
                None => debug!(epoch, "session store dropped; discarding role lookup"),
            }
        });
    }

    /// Replace the snapshot unless a newer epoch has already been published.
    fn publish(&self, epoch: u64, session: Session) -> bool {
        let snapshot = SessionSnapshot::new(epoch, session);
        let status = snapshot.status();
        let role = snapshot.role();

        let accepted = self.snapshot.send_if_modified(|current| {
            if epoch < current.epoch {
                return false;
            }
            *current = Arc::new(snapshot);
            true
        });

        if accepted {
            info!(epoch, status = status.as_str(), role = ?role, "session snapshot published");
            if let Some(metrics) = &self.metrics {
                metrics.transition(status.as_str());
            }
        } else {
            debug!(epoch, "stale session update discarded");
            if let Some(metrics) = &self.metrics {
                metrics.stale_publish();
            }
        }
        accepted
    }
}

async fn resolve_role(
    registry: &dyn UserRegistry,
    identity: &Identity,
    metrics: Option<&SessionMetrics>,
) -> (Role, RoleResolution) {
    let (role, resolution, outcome) = match registry.find_user(&identity.email).await {
        Ok(Some(record)) => match record.role() {
            Some(role) => (role, RoleResolution::Resolved, "resolved"),
            None => (Role::default(), RoleResolution::Defaulted, "no_role"),
        },
        Ok(None) => (Role::default(), RoleResolution::Defaulted, "not_found"),
        Err(err) => {
            warn!(email = %identity.email, error = %err, "role lookup failed; defaulting to user");
            (Role::default(), RoleResolution::Defaulted, "failed")
        }
    };

    if let Some(metrics) = metrics {
        metrics.role_lookup(outcome);
    }
    (role, resolution)
}

fn log_outcome<T>(operation: &'static str, result: &AuthResult<T>) {
    match result {
        Ok(_) => debug!(operation, "identity provider call succeeded"),
        Err(err) => info!(operation, code = err.code(), "identity provider call failed"),
    }
}
