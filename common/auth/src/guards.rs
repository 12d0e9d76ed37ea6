use serde::Serialize;
use tracing::debug;

use crate::config::SessionConfig;
use crate::snapshot::{RoleResolution, Session, SessionSnapshot};

const FROM_PARAM: &str = "from";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardPolicy {
    /// Any signed-in user.
    Authenticated,
    /// Signed-in users whose registry role is admin.
    Admin,
}

impl GuardPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardPolicy::Authenticated => "authenticated",
            GuardPolicy::Admin => "admin",
        }
    }
}

/// Why a guard redirected. The two kinds send the visitor to different places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DenialReason {
    /// Nobody is signed in: go to the sign-in page and come back afterwards.
    Unauthenticated,
    /// Signed in but lacking the role: go to the application root.
    Forbidden,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redirect {
    pub to: String,
    /// Originally requested location, preserved for the post sign-in return.
    pub from: Option<String>,
    pub reason: DenialReason,
}

impl Redirect {
    /// Target URL with the preserved location encoded as a `from` query parameter.
    pub fn location(&self) -> String {
        match &self.from {
            Some(from) => {
                let separator = if self.to.contains('?') { '&' } else { '?' };
                format!(
                    "{}{separator}{FROM_PARAM}={}",
                    self.to,
                    urlencoding::encode(from)
                )
            }
            None => self.to.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum GuardDecision {
    /// Session not settled yet; show a placeholder and re-evaluate on the next snapshot.
    Loading,
    Redirect(Redirect),
    Render,
}

impl GuardDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardDecision::Loading => "loading",
            GuardDecision::Redirect(_) => "redirect",
            GuardDecision::Render => "render",
        }
    }
}

/// Route guard policies bound to the portal's redirect targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteGuard {
    sign_in_path: String,
    home_path: String,
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self::new("/login", "/")
    }
}

impl RouteGuard {
    pub fn new(sign_in_path: impl Into<String>, home_path: impl Into<String>) -> Self {
        Self {
            sign_in_path: sign_in_path.into(),
            home_path: home_path.into(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.sign_in_path.clone(), config.home_path.clone())
    }

    pub fn sign_in_path(&self) -> &str {
        &self.sign_in_path
    }

    pub fn home_path(&self) -> &str {
        &self.home_path
    }

    /// Decide what to do with a request for `requested` under `policy`.
    pub fn evaluate(
        &self,
        policy: GuardPolicy,
        snapshot: &SessionSnapshot,
        requested: &str,
    ) -> GuardDecision {
        let decision = match (&snapshot.session, policy) {
            (Session::Pending, _) => GuardDecision::Loading,
            (Session::Anonymous, _) => GuardDecision::Redirect(Redirect {
                to: self.sign_in_path.clone(),
                from: Some(requested.to_string()),
                reason: DenialReason::Unauthenticated,
            }),
            (Session::Authenticated { .. }, GuardPolicy::Authenticated) => GuardDecision::Render,
            (
                Session::Authenticated {
                    resolution: RoleResolution::Pending,
                    ..
                },
                GuardPolicy::Admin,
            ) => GuardDecision::Loading,
            (Session::Authenticated { role, .. }, GuardPolicy::Admin) if role.is_admin() => {
                GuardDecision::Render
            }
            (Session::Authenticated { .. }, GuardPolicy::Admin) => {
                GuardDecision::Redirect(Redirect {
                    to: self.home_path.clone(),
                    from: None,
                    reason: DenialReason::Forbidden,
                })
            }
        };

        debug!(
            policy = policy.as_str(),
            requested,
            epoch = snapshot.epoch,
            decision = decision.as_str(),
            "route guard evaluated"
        );
        decision
    }

    pub fn require_session(&self, snapshot: &SessionSnapshot, requested: &str) -> GuardDecision {
        self.evaluate(GuardPolicy::Authenticated, snapshot, requested)
    }

    pub fn require_admin(&self, snapshot: &SessionSnapshot, requested: &str) -> GuardDecision {
        self.evaluate(GuardPolicy::Admin, snapshot, requested)
    }

    /// Where to send a user after a successful sign-in.
    ///
    /// Only same-origin absolute paths are honoured; anything else, including a
    /// loop back to the sign-in page, falls back to the home path.
    pub fn post_sign_in_destination(&self, from: Option<&str>) -> String {
        match from.map(str::trim) {
            Some(path)
                if path.starts_with('/')
                    && !path.starts_with("//")
                    && !path.contains('\\')
                    && !path.chars().any(|c| c.is_control() || c.is_whitespace())
                    && !self.is_sign_in_path(path) =>
            {
                path.to_string()
            }
            _ => self.home_path.clone(),
        }
    }

    fn is_sign_in_path(&self, path: &str) -> bool {
        let bare = path.split(['?', '#']).next().unwrap_or(path);
        bare == self.sign_in_path
    }
}

/// Extract the preserved `from` location from a sign-in page query string.
pub fn from_query(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == FROM_PARAM)
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(|value| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::roles::Role;

    fn authenticated(role: Role, resolution: RoleResolution) -> SessionSnapshot {
        SessionSnapshot::new(
            1,
            Session::Authenticated {
                identity: Identity::new("u1", "a@example.com"),
                role,
                resolution,
            },
        )
    }

    #[test]
    fn session_guard_follows_status() {
        let guard = RouteGuard::default();

        assert_eq!(
            guard.require_session(&SessionSnapshot::pending(), "/mypaybills"),
            GuardDecision::Loading
        );
        assert_eq!(
            guard.require_session(&SessionSnapshot::new(1, Session::Anonymous), "/mypaybills"),
            GuardDecision::Redirect(Redirect {
                to: "/login".into(),
                from: Some("/mypaybills".into()),
                reason: DenialReason::Unauthenticated,
            })
        );
        assert_eq!(
            guard.require_session(&authenticated(Role::User, RoleResolution::Defaulted), "/mypaybills"),
            GuardDecision::Render
        );
    }

    #[test]
    fn admin_guard_redirects_users_to_root() {
        let guard = RouteGuard::default();
        let decision = guard.require_admin(
            &authenticated(Role::User, RoleResolution::Resolved),
            "/dashboard/manage-users",
        );
        assert_eq!(
            decision,
            GuardDecision::Redirect(Redirect {
                to: "/".into(),
                from: None,
                reason: DenialReason::Forbidden,
            })
        );
        assert_eq!(
            guard.require_admin(&authenticated(Role::Admin, RoleResolution::Resolved), "/dashboard"),
            GuardDecision::Render
        );
    }

    #[test]
    fn admin_guard_sends_anonymous_visitors_to_sign_in() {
        let guard = RouteGuard::default();
        let decision = guard.require_admin(&SessionSnapshot::new(2, Session::Anonymous), "/dashboard");
        match decision {
            GuardDecision::Redirect(redirect) => {
                assert_eq!(redirect.reason, DenialReason::Unauthenticated);
                assert_eq!(redirect.location(), "/login?from=%2Fdashboard");
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn admin_guard_waits_for_role_resolution() {
        let guard = RouteGuard::default();
        assert_eq!(
            guard.require_admin(&authenticated(Role::User, RoleResolution::Pending), "/dashboard"),
            GuardDecision::Loading
        );
        assert_eq!(
            guard.require_session(&authenticated(Role::User, RoleResolution::Pending), "/profile"),
            GuardDecision::Render
        );
    }

    #[test]
    fn post_sign_in_destination_rejects_foreign_targets() {
        let guard = RouteGuard::default();
        assert_eq!(guard.post_sign_in_destination(Some("/bill/42")), "/bill/42");
        assert_eq!(guard.post_sign_in_destination(None), "/");
        assert_eq!(guard.post_sign_in_destination(Some("https://evil.example")), "/");
        assert_eq!(guard.post_sign_in_destination(Some("//evil.example")), "/");
        assert_eq!(guard.post_sign_in_destination(Some("/login?from=%2Fx")), "/");
        assert_eq!(guard.post_sign_in_destination(Some("/\t/evil.example")), "/");
        assert_eq!(guard.post_sign_in_destination(Some("/\r\n/evil.example")), "/");
        assert_eq!(guard.post_sign_in_destination(Some("/bill /42")), "/");
        assert_eq!(
            guard.post_sign_in_destination(from_query(Some("from=%2F%09%2Fevil.example")).as_deref()),
            "/"
        );
    }

    #[test]
    fn from_query_round_trips_redirect_location() {
        let redirect = Redirect {
            to: "/login".into(),
            from: Some("/bill/7?tab=history".into()),
            reason: DenialReason::Unauthenticated,
        };
        let location = redirect.location();
        let query = location.split_once('?').map(|(_, q)| q);
        assert_eq!(from_query(query).as_deref(), Some("/bill/7?tab=history"));
        assert_eq!(from_query(Some("x=1")), None);
        assert_eq!(from_query(None), None);
    }
}
