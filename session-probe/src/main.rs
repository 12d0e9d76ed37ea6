use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use portal_auth::{
    GuardDecision, GuardPolicy, HttpUserRegistry, PasswordPolicy, RestIdentityProvider,
    RoleResolution, Session, SessionConfig, SessionSnapshot, SessionStatus, SessionStore,
};
use portal_observability::SessionMetrics;
use tracing::info;
use tracing_subscriber::EnvFilter;

const PASSWORD_ENV: &str = "PORTAL_PROBE_PASSWORD";

/// Sign in against the portal's identity provider and user registry, then
/// report what the session store and route guards make of the result.
///
/// Backends are configured through the `PORTAL_*` environment variables.
#[derive(Parser, Debug)]
#[command(name = "session-probe")]
#[command(version)]
struct Cli {
    /// Account email
    #[arg(long)]
    email: String,

    /// Account password; read from PORTAL_PROBE_PASSWORD when omitted
    #[arg(long)]
    password: Option<String>,

    /// Create the account instead of signing in to an existing one
    #[arg(long)]
    sign_up: bool,

    /// Path to check with the signed-in-only guard (repeatable)
    #[arg(long = "path")]
    paths: Vec<String>,

    /// Path to check with the admin-only guard (repeatable)
    #[arg(long = "admin-path")]
    admin_paths: Vec<String>,

    /// Seconds to wait for each session transition
    #[arg(long, default_value_t = 10)]
    wait_secs: u64,

    /// Print the session metrics before exiting
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let password = match cli.password.clone() {
        Some(password) => password,
        None => env::var(PASSWORD_ENV)
            .with_context(|| format!("--password or {PASSWORD_ENV} must be set"))?,
    };
    let wait = Duration::from_secs(cli.wait_secs);

    let config = SessionConfig::from_env()?;
    let identity_url = config
        .identity_url
        .clone()
        .context("PORTAL_IDENTITY_URL must be set")?;
    let api_key = config
        .identity_api_key
        .clone()
        .context("PORTAL_IDENTITY_API_KEY must be set")?;

    let registry =
        HttpUserRegistry::with_timeout(config.registry_url.clone(), config.registry_timeout)?;
    let provider = RestIdentityProvider::new(identity_url, api_key);
    let metrics = SessionMetrics::new()?;

    let store = SessionStore::builder(Arc::new(provider), Arc::new(registry))
        .with_config(&config)
        .with_metrics(metrics.clone())
        .start();
    info!(registry = %config.registry_url, "session store started");

    let initial = tokio::time::timeout(wait, store.settled())
        .await
        .context("identity provider never reported an initial state")?;
    report("initial", &initial)?;

    if cli.sign_up {
        let violations = PasswordPolicy::default().violations(&password);
        if !violations.is_empty() {
            bail!("password rejected by policy: {violations:?}");
        }
        store.sign_up(&cli.email, &password).await.context("sign-up failed")?;
    } else {
        store.sign_in(&cli.email, &password).await.context("sign-in failed")?;
    }

    let signed_in = wait_for(&store, wait, |snapshot| {
        matches!(
            snapshot.session,
            Session::Authenticated {
                resolution: RoleResolution::Resolved | RoleResolution::Defaulted,
                ..
            }
        )
    })
    .await?;
    report("signed in", &signed_in)?;

    for path in &cli.paths {
        check(&store, &metrics, GuardPolicy::Authenticated, &signed_in, path);
    }
    for path in &cli.admin_paths {
        check(&store, &metrics, GuardPolicy::Admin, &signed_in, path);
    }

    store.sign_out().await.context("sign-out failed")?;
    let signed_out = wait_for(&store, wait, |snapshot| {
        snapshot.status() == SessionStatus::Anonymous
    })
    .await?;
    report("signed out", &signed_out)?;

    if cli.metrics {
        print!("{}", metrics.render()?);
    }
    Ok(())
}

async fn wait_for<F>(
    store: &SessionStore,
    wait: Duration,
    predicate: F,
) -> Result<Arc<SessionSnapshot>>
where
    F: FnMut(&Arc<SessionSnapshot>) -> bool,
{
    let mut receiver = store.subscribe();
    let snapshot = tokio::time::timeout(wait, receiver.wait_for(predicate))
        .await
        .context("timed out waiting for session transition")?
        .context("session store closed")?;
    Ok(Arc::clone(&snapshot))
}

fn report(label: &str, snapshot: &SessionSnapshot) -> Result<()> {
    println!("{label}: {}", serde_json::to_string(snapshot)?);
    Ok(())
}

fn check(
    store: &SessionStore,
    metrics: &SessionMetrics,
    policy: GuardPolicy,
    snapshot: &SessionSnapshot,
    path: &str,
) {
    let decision = store.guard().evaluate(policy, snapshot, path);
    metrics.guard_decision(policy.as_str(), decision.as_str());
    let outcome = match &decision {
        GuardDecision::Redirect(redirect) => format!("redirect {}", redirect.location()),
        other => other.as_str().to_string(),
    };
    println!("{} {path}: {outcome}", policy.as_str());
}
