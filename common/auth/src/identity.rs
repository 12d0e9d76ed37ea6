use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identity as reported by the external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Provider-issued subject id.
    pub uid: String,
    pub display_name: Option<String>,
    pub email: String,
    pub photo_url: Option<String>,
}

impl Identity {
    pub fn new(uid: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: None,
            email: email.into(),
            photo_url: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }

    /// Apply a profile patch, leaving fields the patch does not carry untouched.
    pub fn apply(&mut self, patch: &ProfilePatch) {
        if let Some(name) = &patch.display_name {
            self.display_name = Some(name.clone());
        }
        if let Some(url) = &patch.photo_url {
            self.photo_url = Some(url.clone());
        }
    }
}

/// Federated login providers offered on the sign-in page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    GitHub,
    Facebook,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Google, ProviderKind::GitHub, ProviderKind::Facebook];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Google => "google",
            ProviderKind::GitHub => "github",
            ProviderKind::Facebook => "facebook",
        }
    }

    /// Provider id used by identity-toolkit style REST APIs.
    pub fn provider_id(&self) -> &'static str {
        match self {
            ProviderKind::Google => "google.com",
            ProviderKind::GitHub => "github.com",
            ProviderKind::Facebook => "facebook.com",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "google" | "google.com" => Ok(ProviderKind::Google),
            "github" | "github.com" => Ok(ProviderKind::GitHub),
            "facebook" | "facebook.com" => Ok(ProviderKind::Facebook),
            other => Err(format!("unsupported provider '{other}'")),
        }
    }
}

/// Partial profile update: only the fields that are `Some` are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePatch {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.photo_url.is_none()
    }
}
