use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::identity::Identity;
use crate::roles::Role;

/// Coarse session status observed by route guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Authenticated,
    Anonymous,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::Anonymous => "anonymous",
        }
    }
}

/// Whether the role on an authenticated session came from the registry yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleResolution {
    /// Lookup still in flight; the role is the provisional default.
    Pending,
    /// Role read from the registry record.
    Resolved,
    /// Lookup failed or found no record; the default role applies.
    Defaulted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Session {
    Pending,
    Anonymous,
    Authenticated {
        identity: Identity,
        role: Role,
        resolution: RoleResolution,
    },
}

impl Session {
    pub fn status(&self) -> SessionStatus {
        match self {
            Session::Pending => SessionStatus::Pending,
            Session::Anonymous => SessionStatus::Anonymous,
            Session::Authenticated { .. } => SessionStatus::Authenticated,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Session::Authenticated { identity, .. } => Some(identity),
            _ => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            Session::Authenticated { role, .. } => Some(*role),
            _ => None,
        }
    }
}

/// Immutable record of the session, replaced wholesale on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Sequence number of the identity-change notification this snapshot belongs to.
    /// Zero until the first notification arrives.
    pub epoch: u64,
    pub published_at: DateTime<Utc>,
    #[serde(flatten)]
    pub session: Session,
}

impl SessionSnapshot {
    pub fn pending() -> Self {
        Self::new(0, Session::Pending)
    }

    pub fn new(epoch: u64, session: Session) -> Self {
        Self {
            epoch,
            published_at: Utc::now(),
            session,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.session.identity()
    }

    pub fn role(&self) -> Option<Role> {
        self.session.role()
    }

    pub fn is_admin(&self) -> bool {
        self.role().is_some_and(|role| role.is_admin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_snapshot_carries_no_identity_or_role() {
        let snapshot = SessionSnapshot::new(3, Session::Anonymous);
        assert_eq!(snapshot.status(), SessionStatus::Anonymous);
        assert!(snapshot.identity().is_none());
        assert!(snapshot.role().is_none());
        assert!(!snapshot.is_admin());
    }

    #[test]
    fn serializes_with_status_tag() {
        let snapshot = SessionSnapshot::new(
            1,
            Session::Authenticated {
                identity: Identity::new("u1", "a@example.com"),
                role: Role::Admin,
                resolution: RoleResolution::Resolved,
            },
        );
        let value = serde_json::to_value(&snapshot).expect("serialize");
        assert_eq!(value["status"], "authenticated");
        assert_eq!(value["role"], "admin");
        assert_eq!(value["identity"]["email"], "a@example.com");
        assert_eq!(value["epoch"], 1);
    }
}
