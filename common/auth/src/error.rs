use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

/// Failures reported by the identity provider, classified for display.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("email address is not valid")]
    InvalidEmail,
    #[error("invalid email or password")]
    InvalidCredential,
    #[error("no account exists for this email")]
    AccountNotFound,
    #[error("too many attempts, try again later")]
    RateLimited,
    #[error("an account already exists for this email")]
    EmailInUse,
    #[error("password rejected by the identity provider")]
    WeakPassword,
    #[error("account has been disabled")]
    UserDisabled,
    #[error("federated sign-in was cancelled")]
    FederatedCancelled,
    #[error("no user is signed in")]
    NotSignedIn,
    #[error("identity provider error '{0}'")]
    Provider(String),
    #[error("identity provider unreachable: {0}")]
    Transport(String),
}

impl AuthError {
    /// Classify an opaque provider error code.
    ///
    /// Accepts both SDK style codes (`auth/user-not-found`) and REST style codes
    /// (`EMAIL_NOT_FOUND`, `WEAK_PASSWORD : Password should be at least 6 characters`).
    pub fn from_provider_code(code: &str) -> Self {
        let head = code.split(':').next().unwrap_or_default().trim();
        match head {
            "auth/invalid-email" | "INVALID_EMAIL" => AuthError::InvalidEmail,
            "auth/invalid-credential"
            | "auth/wrong-password"
            | "INVALID_PASSWORD"
            | "INVALID_LOGIN_CREDENTIALS" => AuthError::InvalidCredential,
            "auth/user-not-found" | "EMAIL_NOT_FOUND" => AuthError::AccountNotFound,
            "auth/too-many-requests" | "TOO_MANY_ATTEMPTS_TRY_LATER" => AuthError::RateLimited,
            "auth/email-already-in-use" | "EMAIL_EXISTS" => AuthError::EmailInUse,
            "auth/weak-password" | "WEAK_PASSWORD" => AuthError::WeakPassword,
            "auth/user-disabled" | "USER_DISABLED" => AuthError::UserDisabled,
            "auth/popup-closed-by-user" | "auth/cancelled-popup-request" => {
                AuthError::FederatedCancelled
            }
            _ => AuthError::Provider(code.trim().to_string()),
        }
    }

    /// Stable short code for UI messages and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidEmail => "invalid-email",
            AuthError::InvalidCredential => "invalid-credential",
            AuthError::AccountNotFound => "account-not-found",
            AuthError::RateLimited => "rate-limited",
            AuthError::EmailInUse => "email-in-use",
            AuthError::WeakPassword => "weak-password",
            AuthError::UserDisabled => "user-disabled",
            AuthError::FederatedCancelled => "federated-cancelled",
            AuthError::NotSignedIn => "not-signed-in",
            AuthError::Provider(_) => "provider",
            AuthError::Transport(_) => "transport",
        }
    }
}

/// Failures talking to the backend user registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Transport(String),
    #[error("registry returned HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("failed to decode registry response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RegistryError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

/// Failures of store operations that touch both the provider and the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("signed in but failed to sync '{email}' to the user registry: {source}")]
    RegistrySync {
        email: String,
        #[source]
        source: RegistryError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_sdk_codes() {
        assert_eq!(
            AuthError::from_provider_code("auth/invalid-credential"),
            AuthError::InvalidCredential
        );
        assert_eq!(
            AuthError::from_provider_code("auth/wrong-password"),
            AuthError::InvalidCredential
        );
        assert_eq!(
            AuthError::from_provider_code("auth/user-not-found"),
            AuthError::AccountNotFound
        );
        assert_eq!(
            AuthError::from_provider_code("auth/too-many-requests"),
            AuthError::RateLimited
        );
        assert_eq!(
            AuthError::from_provider_code("auth/email-already-in-use"),
            AuthError::EmailInUse
        );
    }

    #[test]
    fn classifies_rest_codes_with_detail_suffix() {
        assert_eq!(
            AuthError::from_provider_code("WEAK_PASSWORD : Password should be at least 6 characters"),
            AuthError::WeakPassword
        );
        assert_eq!(
            AuthError::from_provider_code("TOO_MANY_ATTEMPTS_TRY_LATER : blocked"),
            AuthError::RateLimited
        );
        assert_eq!(
            AuthError::from_provider_code("EMAIL_NOT_FOUND"),
            AuthError::AccountNotFound
        );
    }

    #[test]
    fn unknown_codes_stay_opaque() {
        let err = AuthError::from_provider_code("auth/quota-exceeded");
        assert_eq!(err, AuthError::Provider("auth/quota-exceeded".into()));
        assert_eq!(err.code(), "provider");
    }
}
