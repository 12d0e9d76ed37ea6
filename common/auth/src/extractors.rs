use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts, OriginalUri};
use axum::http::{header::RETRY_AFTER, request::Parts, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::guards::{GuardDecision, GuardPolicy, Redirect};
use crate::snapshot::SessionSnapshot;
use crate::store::SessionStore;

/// Current snapshot, whatever its status.
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Arc<SessionSnapshot>);

/// Admits signed-in users; carries the snapshot that was checked.
#[derive(Debug, Clone)]
pub struct RequireSession(pub Arc<SessionSnapshot>);

/// Admits signed-in administrators; carries the snapshot that was checked.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub Arc<SessionSnapshot>);

/// A guard that did not render: either still loading or redirecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardRejection {
    Loading,
    Redirect(Redirect),
}

impl IntoResponse for GuardRejection {
    fn into_response(self) -> Response {
        match self {
            GuardRejection::Loading => (
                StatusCode::SERVICE_UNAVAILABLE,
                [(RETRY_AFTER, "1")],
                "Loading...",
            )
                .into_response(),
            GuardRejection::Redirect(redirect) => {
                axum::response::Redirect::to(&redirect.location()).into_response()
            }
        }
    }
}

fn requested_location(parts: &Parts) -> String {
    let uri = parts
        .extensions
        .get::<OriginalUri>()
        .map(|original| &original.0)
        .unwrap_or(&parts.uri);
    uri.path_and_query()
        .map(|value| value.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

fn check<S>(
    parts: &Parts,
    state: &S,
    policy: GuardPolicy,
) -> Result<Arc<SessionSnapshot>, GuardRejection>
where
    Arc<SessionStore>: FromRef<S>,
{
    let store = Arc::<SessionStore>::from_ref(state);
    let snapshot = store.snapshot();
    let decision = store
        .guard()
        .evaluate(policy, &snapshot, &requested_location(parts));

    if let Some(metrics) = store.metrics() {
        metrics.guard_decision(policy.as_str(), decision.as_str());
    }

    match decision {
        GuardDecision::Render => Ok(snapshot),
        GuardDecision::Loading => Err(GuardRejection::Loading),
        GuardDecision::Redirect(redirect) => Err(GuardRejection::Redirect(redirect)),
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentSession
where
    Arc<SessionStore>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(_parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(Arc::<SessionStore>::from_ref(state).snapshot()))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequireSession
where
    Arc<SessionStore>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GuardRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        check(parts, state, GuardPolicy::Authenticated).map(Self)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequireAdmin
where
    Arc<SessionStore>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GuardRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        check(parts, state, GuardPolicy::Admin).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guards::DenialReason;
    use axum::http::{header::LOCATION, Request};

    #[test]
    fn loading_rejection_asks_client_to_retry() {
        let response = GuardRejection::Loading.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "1");
    }

    #[test]
    fn redirect_rejection_sets_location() {
        let response = GuardRejection::Redirect(Redirect {
            to: "/login".into(),
            from: Some("/mypaybills".into()),
            reason: DenialReason::Unauthenticated,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            "/login?from=%2Fmypaybills"
        );
    }

    #[test]
    fn requested_location_prefers_original_uri() {
        let (mut parts, _) = Request::builder()
            .uri("/users?page=2")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(requested_location(&parts), "/users?page=2");

        parts
            .extensions
            .insert(OriginalUri("/dashboard/users?page=2".parse().unwrap()));
        assert_eq!(requested_location(&parts), "/dashboard/users?page=2");
    }
}
