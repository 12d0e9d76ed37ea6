use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Prometheus counters describing session store and route guard activity.
#[derive(Clone)]
pub struct SessionMetrics {
    pub registry: Registry,
    pub transitions_total: IntCounterVec,
    pub role_lookups_total: IntCounterVec,
    pub stale_publishes_total: IntCounter,
    pub guard_decisions_total: IntCounterVec,
}

impl SessionMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Register the session counters on an existing registry.
    pub fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        let transitions_total = IntCounterVec::new(
            Opts::new(
                "session_transitions_total",
                "Session snapshots published grouped by status",
            ),
            &["status"],
        )?;
        let role_lookups_total = IntCounterVec::new(
            Opts::new(
                "session_role_lookups_total",
                "Registry role lookups grouped by outcome",
            ),
            &["outcome"],
        )?;
        let stale_publishes_total = IntCounter::new(
            "session_stale_publishes_total",
            "Role lookups discarded because a newer identity change was already published",
        )?;
        let guard_decisions_total = IntCounterVec::new(
            Opts::new(
                "session_guard_decisions_total",
                "Route guard evaluations grouped by policy and decision",
            ),
            &["policy", "decision"],
        )?;

        registry.register(Box::new(transitions_total.clone()))?;
        registry.register(Box::new(role_lookups_total.clone()))?;
        registry.register(Box::new(stale_publishes_total.clone()))?;
        registry.register(Box::new(guard_decisions_total.clone()))?;

        Ok(Self {
            registry,
            transitions_total,
            role_lookups_total,
            stale_publishes_total,
            guard_decisions_total,
        })
    }

    pub fn transition(&self, status: &str) {
        self.transitions_total.with_label_values(&[status]).inc();
    }

    pub fn role_lookup(&self, outcome: &str) {
        self.role_lookups_total.with_label_values(&[outcome]).inc();
    }

    pub fn stale_publish(&self) {
        self.stale_publishes_total.inc();
    }

    pub fn guard_decision(&self, policy: &str, decision: &str) {
        self.guard_decisions_total
            .with_label_values(&[policy, decision])
            .inc();
    }

    /// Render every registered metric in the text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
