use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ChangeFeed, IdentityChanges, IdentityProvider};
use crate::error::{AuthError, AuthResult};
use crate::identity::{Identity, ProfilePatch, ProviderKind};

/// Credential produced by the interactive part of a federated login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FederatedCredential {
    IdToken(String),
    AccessToken(String),
}

impl FederatedCredential {
    fn post_body(&self, kind: ProviderKind) -> String {
        let (field, token) = match self {
            FederatedCredential::IdToken(token) => ("id_token", token),
            FederatedCredential::AccessToken(token) => ("access_token", token),
        };
        format!(
            "{field}={}&providerId={}",
            urlencoding::encode(token),
            kind.provider_id()
        )
    }
}

/// Drives the interactive consent step (popup, device code, browser hand-off)
/// and returns the provider credential.
#[async_trait]
pub trait FederatedAuthorizer: Send + Sync {
    async fn authorize(&self, kind: ProviderKind) -> AuthResult<FederatedCredential>;
}

struct RestAccount {
    identity: Identity,
    id_token: String,
}

/// Identity provider backed by an identity-toolkit style REST API.
///
/// The signed-in account lives in memory only; identity-change notifications
/// are emitted locally after each successful call.
pub struct RestIdentityProvider {
    client: Client,
    base_url: String,
    api_key: String,
    request_uri: String,
    authorizer: Option<Arc<dyn FederatedAuthorizer>>,
    account: Mutex<Option<RestAccount>>,
    feed: ChangeFeed,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdpRequest<'a> {
    post_body: String,
    request_uri: &'a str,
    return_secure_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    id_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    photo_url: Option<&'a str>,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    #[serde(alias = "profilePicture")]
    photo_url: Option<String>,
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl RestIdentityProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, api_key)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            request_uri: "http://localhost".to_string(),
            authorizer: None,
            account: Mutex::new(None),
            feed: ChangeFeed::default(),
        }
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn FederatedAuthorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Redirect URI reported to the API for federated sign-in.
    pub fn with_request_uri(mut self, uri: impl Into<String>) -> Self {
        self.request_uri = uri.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/v1/accounts:{method}?key={}", self.base_url, self.api_key)
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> AuthResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.endpoint(method))
            .json(body)
            .send()
            .await
            .map_err(|err| AuthError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = match serde_json::from_str::<ErrorEnvelope>(&text) {
                Ok(envelope) => AuthError::from_provider_code(&envelope.error.message),
                Err(_) => AuthError::Provider(format!("HTTP {status}")),
            };
            warn!(method, status = status.as_u16(), code = err.code(), "identity provider call failed");
            return Err(err);
        }

        response
            .json()
            .await
            .map_err(|err| AuthError::Provider(format!("malformed response: {err}")))
    }

    fn establish(&self, response: AccountResponse, fallback_email: Option<&str>) -> AuthResult<Identity> {
        let email = response
            .email
            .or_else(|| fallback_email.map(str::to_string))
            .ok_or_else(|| AuthError::Provider("account has no email".to_string()))?;
        let id_token = response
            .id_token
            .ok_or_else(|| AuthError::Provider("response missing idToken".to_string()))?;

        let identity = Identity {
            uid: response.local_id,
            display_name: response.display_name,
            email,
            photo_url: response.photo_url,
        };

        // Held across the publish so the stored token and the announced
        // identity always belong to the same sign-in.
        let mut account = self.account.lock().expect("mutex poisoned");
        *account = Some(RestAccount {
            identity: identity.clone(),
            id_token,
        });
        self.feed.publish(Some(identity.clone()));
        debug!(uid = %identity.uid, "rest provider session established");
        Ok(identity)
    }
}

#[async_trait]
impl IdentityProvider for RestIdentityProvider {
    async fn create_account(&self, email: &str, password: &str) -> AuthResult<Identity> {
        let request = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let response: AccountResponse = self.call("signUp", &request).await?;
        self.establish(response, Some(email))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Identity> {
        let request = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let response: AccountResponse = self.call("signInWithPassword", &request).await?;
        self.establish(response, Some(email))
    }

    async fn sign_in_federated(&self, kind: ProviderKind) -> AuthResult<Identity> {
        let authorizer = self
            .authorizer
            .as_ref()
            .ok_or_else(|| AuthError::Provider(format!("no authorizer configured for {kind}")))?;
        let credential = authorizer.authorize(kind).await?;

        let request = IdpRequest {
            post_body: credential.post_body(kind),
            request_uri: &self.request_uri,
            return_secure_token: true,
        };
        let response: AccountResponse = self.call("signInWithIdp", &request).await?;
        self.establish(response, None)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        let mut account = self.account.lock().expect("mutex poisoned");
        if account.take().is_some() {
            self.feed.clear();
        }
        Ok(())
    }

    async fn update_profile(&self, patch: &ProfilePatch) -> AuthResult<Identity> {
        let (id_token, email) = {
            let guard = self.account.lock().expect("mutex poisoned");
            let account = guard.as_ref().ok_or(AuthError::NotSignedIn)?;
            (account.id_token.clone(), account.identity.email.clone())
        };

        let request = UpdateRequest {
            id_token: &id_token,
            display_name: patch.display_name.as_deref(),
            photo_url: patch.photo_url.as_deref(),
            return_secure_token: true,
        };
        let mut response: AccountResponse = self.call("update", &request).await?;
        if response.id_token.is_none() {
            response.id_token = Some(id_token);
        }
        self.establish(response, Some(&email))
    }

    fn subscribe(&self) -> IdentityChanges {
        self.feed.subscribe()
    }
}
