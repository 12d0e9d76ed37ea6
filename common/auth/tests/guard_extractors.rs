use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::routing::get;
use axum::Router;
use portal_auth::{
    CurrentSession, Identity, InMemoryIdentityProvider, InMemoryUserRegistry, RequireAdmin,
    RequireSession, Role, RoleResolution, Session, SessionConfig, SessionStatus, SessionStore,
};
use portal_observability::SessionMetrics;
use tower::ServiceExt;

mod support;
use support::{wait_until, SilentProvider};

async fn bills(RequireSession(snapshot): RequireSession) -> String {
    snapshot
        .identity()
        .map(|identity| identity.email.clone())
        .unwrap_or_default()
}

async fn users(RequireAdmin(_): RequireAdmin) -> &'static str {
    "all users"
}

async fn whoami(CurrentSession(snapshot): CurrentSession) -> &'static str {
    snapshot.status().as_str()
}

fn app(store: Arc<SessionStore>) -> Router {
    Router::new()
        .route("/mypaybills", get(bills))
        .route("/dashboard/users", get(users))
        .route("/whoami", get(whoami))
        .with_state(store)
}

async fn call(store: &Arc<SessionStore>, uri: &str) -> axum::response::Response {
    app(Arc::clone(store))
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

fn location(response: &axum::response::Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .expect("location header")
        .to_str()
        .unwrap()
}

fn seeded() -> (Arc<InMemoryIdentityProvider>, InMemoryUserRegistry) {
    let provider = InMemoryIdentityProvider::new()
        .with_account(Identity::new("admin-uid", "admin@smartbill.com"), "Admin123")
        .with_account(Identity::new("user-uid", "x@example.com"), "GoodPass1");
    let registry = InMemoryUserRegistry::new();
    registry.insert("admin@smartbill.com", Role::Admin);
    registry.insert("x@example.com", Role::User);
    (Arc::new(provider), registry)
}

fn role_settled(snapshot: &Arc<portal_auth::SessionSnapshot>) -> bool {
    matches!(
        snapshot.session,
        Session::Authenticated {
            resolution: RoleResolution::Resolved,
            ..
        }
    )
}

#[tokio::test]
async fn anonymous_visitor_is_sent_to_sign_in_with_origin() {
    let (provider, registry) = seeded();
    let store = Arc::new(SessionStore::start(provider, Arc::new(registry)));
    store.settled().await;

    let response = call(&store, "/mypaybills").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login?from=%2Fmypaybills");

    let response = call(&store, "/dashboard/users?page=2").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response),
        "/login?from=%2Fdashboard%2Fusers%3Fpage%3D2"
    );
}

#[tokio::test]
async fn signed_in_user_reaches_bills_but_not_admin_pages() {
    let (provider, registry) = seeded();
    let store = Arc::new(SessionStore::start(provider, Arc::new(registry)));
    store.settled().await;
    store.sign_in("x@example.com", "GoodPass1").await.expect("sign in");
    wait_until(&store, role_settled).await;

    let response = call(&store, "/mypaybills").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = call(&store, "/dashboard/users").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
}

#[tokio::test]
async fn admin_reaches_admin_pages() {
    let (provider, registry) = seeded();
    let store = Arc::new(SessionStore::start(provider, Arc::new(registry)));
    store.settled().await;
    store
        .sign_in("admin@smartbill.com", "Admin123")
        .await
        .expect("sign in");
    wait_until(&store, role_settled).await;

    let response = call(&store, "/dashboard/users").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn guards_report_loading_before_first_notification() {
    let store = Arc::new(SessionStore::start(
        Arc::new(SilentProvider::default()),
        Arc::new(InMemoryUserRegistry::new()),
    ));
    assert_eq!(store.snapshot().status(), SessionStatus::Pending);

    for uri in ["/mypaybills", "/dashboard/users"] {
        let response = call(&store, uri).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
    }

    let response = call(&store, "/whoami").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn configured_paths_and_metrics_follow_decisions() {
    let (provider, registry) = seeded();
    let config = SessionConfig::new("http://registry.invalid")
        .with_sign_in_path("/signin")
        .with_home_path("/home");
    let metrics = SessionMetrics::new().expect("metrics");
    let store = Arc::new(
        SessionStore::builder(provider, Arc::new(registry))
            .with_config(&config)
            .with_metrics(metrics.clone())
            .start(),
    );
    store.settled().await;

    let response = call(&store, "/mypaybills").await;
    assert_eq!(location(&response), "/signin?from=%2Fmypaybills");

    store.sign_in("x@example.com", "GoodPass1").await.expect("sign in");
    wait_until(&store, role_settled).await;
    let response = call(&store, "/dashboard/users").await;
    assert_eq!(location(&response), "/home");

    assert_eq!(
        metrics
            .guard_decisions_total
            .with_label_values(&["authenticated", "redirect"])
            .get(),
        1
    );
    assert_eq!(
        metrics
            .guard_decisions_total
            .with_label_values(&["admin", "redirect"])
            .get(),
        1
    );
}
