use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RegistryError;
use crate::identity::Identity;
use crate::roles::Role;

pub type RegistryResult<T> = Result<T, RegistryError>;

/// User profile as stored by the backend registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserRecord {
    /// Parsed role, `None` when absent or unrecognised.
    pub fn role(&self) -> Option<Role> {
        self.role.as_deref().and_then(|value| value.parse().ok())
    }
}

/// Body of the idempotent `PUT /users` upsert, keyed by email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpsert {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl From<&Identity> for UserUpsert {
    fn from(identity: &Identity) -> Self {
        Self {
            email: identity.email.clone(),
            name: identity.display_name.clone(),
            image: identity.photo_url.clone(),
        }
    }
}

#[async_trait]
pub trait UserRegistry: Send + Sync {
    /// `GET /users/{email}`; `Ok(None)` when the registry has no record.
    async fn find_user(&self, email: &str) -> RegistryResult<Option<UserRecord>>;

    /// `PUT /users`
    async fn upsert_user(&self, user: &UserUpsert) -> RegistryResult<()>;

    /// `PATCH /users/role/{email}`
    async fn set_role(&self, email: &str, role: Role) -> RegistryResult<()>;

    /// `GET /admin/all-users`
    async fn list_users(&self) -> RegistryResult<Vec<UserRecord>>;
}

#[derive(Clone)]
pub struct HttpUserRegistry {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct RoleBody {
    role: Role,
}

impl HttpUserRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Build a client that gives up on registry calls after `timeout`.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> RegistryResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// URL for a per-user route; the email is a single percent-encoded segment.
    fn user_url(&self, prefix: &str, email: &str) -> String {
        self.url(&format!("{prefix}/{}", urlencoding::encode(email.trim())))
    }

    fn ensure_success(response: &reqwest::Response) -> RegistryResult<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(RegistryError::Status {
                status: response.status().as_u16(),
                url: response.url().to_string(),
            })
        }
    }
}

#[async_trait]
impl UserRegistry for HttpUserRegistry {
    async fn find_user(&self, email: &str) -> RegistryResult<Option<UserRecord>> {
        let url = self.user_url("/users", email);
        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(email, "registry has no record");
            return Ok(None);
        }
        Self::ensure_success(&response)?;

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str::<Option<UserRecord>>(&body)
            .map_err(|err| RegistryError::Decode(err.to_string()))
    }

    async fn upsert_user(&self, user: &UserUpsert) -> RegistryResult<()> {
        let response = self.client.put(self.url("/users")).json(user).send().await?;
        Self::ensure_success(&response)?;
        debug!(email = %user.email, "registry upsert accepted");
        Ok(())
    }

    async fn set_role(&self, email: &str, role: Role) -> RegistryResult<()> {
        let url = self.user_url("/users/role", email);
        let response = self.client.patch(&url).json(&RoleBody { role }).send().await?;
        Self::ensure_success(&response)
    }

    async fn list_users(&self) -> RegistryResult<Vec<UserRecord>> {
        let response = self.client.get(self.url("/admin/all-users")).send().await?;
        Self::ensure_success(&response)?;
        let users: Option<Vec<UserRecord>> = response.json().await?;
        Ok(users.unwrap_or_default())
    }
}

/// Registry kept in process memory, for local runs and tests.
#[derive(Clone, Default)]
pub struct InMemoryUserRegistry {
    users: Arc<RwLock<HashMap<String, UserRecord>>>,
    unavailable: Arc<RwLock<bool>>,
}

impl InMemoryUserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, email: impl Into<String>, role: Role) {
        let email = email.into();
        let mut guard = self.users.write().expect("rwlock poisoned");
        guard.insert(
            email.to_ascii_lowercase(),
            UserRecord {
                email,
                name: None,
                image: None,
                role: Some(role.to_string()),
                extra: serde_json::Map::new(),
            },
        );
    }

    pub fn get(&self, email: &str) -> Option<UserRecord> {
        let guard = self.users.read().expect("rwlock poisoned");
        guard.get(&email.to_ascii_lowercase()).cloned()
    }

    /// Make every call fail with a transport error until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().expect("rwlock poisoned") = unavailable;
    }

    fn check_available(&self) -> RegistryResult<()> {
        if *self.unavailable.read().expect("rwlock poisoned") {
            Err(RegistryError::Transport("registry unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl UserRegistry for InMemoryUserRegistry {
    async fn find_user(&self, email: &str) -> RegistryResult<Option<UserRecord>> {
        self.check_available()?;
        Ok(self.get(email))
    }

    async fn upsert_user(&self, user: &UserUpsert) -> RegistryResult<()> {
        self.check_available()?;
        let mut guard = self.users.write().expect("rwlock poisoned");
        let record = guard
            .entry(user.email.to_ascii_lowercase())
            .or_insert_with(|| UserRecord {
                email: user.email.clone(),
                name: None,
                image: None,
                role: Some(Role::User.to_string()),
                extra: serde_json::Map::new(),
            });
        if user.name.is_some() {
            record.name = user.name.clone();
        }
        if user.image.is_some() {
            record.image = user.image.clone();
        }
        Ok(())
    }

    async fn set_role(&self, email: &str, role: Role) -> RegistryResult<()> {
        self.check_available()?;
        let mut guard = self.users.write().expect("rwlock poisoned");
        let record = guard.get_mut(&email.to_ascii_lowercase()).ok_or_else(|| {
            RegistryError::Status {
                status: 404,
                url: format!("/users/role/{email}"),
            }
        })?;
        record.role = Some(role.to_string());
        Ok(())
    }

    async fn list_users(&self) -> RegistryResult<Vec<UserRecord>> {
        self.check_available()?;
        let guard = self.users.read().expect("rwlock poisoned");
        let mut users: Vec<UserRecord> = guard.values().cloned().collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }
}
