use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};

/// Metrics for the submitter.
#[derive(Debug)]
pub(crate) struct Metrics {
    /// Current number of known actors
    pub actors: Gauge,
    /// Number of tasks accepted for submission
    pub submitted: Counter,
    /// Number of tasks completed by a successful reply
    pub completed: Counter,
    /// Number of task failures reported to the finisher
    pub failed: Counter,
    /// Number of completed tasks replayed after a reconnect
    pub resent: Counter,
    /// Number of kill requests sent
    pub kills: Counter,
    /// Number of excess-queueing warnings raised
    pub warnings: Counter,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: &E) -> Self {
        let actors = Gauge::default();
        let submitted = Counter::default();
        let completed = Counter::default();
        let failed = Counter::default();
        let resent = Counter::default();
        let kills = Counter::default();
        let warnings = Counter::default();
        context.register("actors", "Current number of known actors", actors.clone());
        context.register(
            "tasks_submitted",
            "Number of tasks accepted for submission",
            submitted.clone(),
        );
        context.register(
            "tasks_completed",
            "Number of tasks completed by a successful reply",
            completed.clone(),
        );
        context.register(
            "tasks_failed",
            "Number of task failures reported to the finisher",
            failed.clone(),
        );
        context.register(
            "tasks_resent",
            "Number of completed tasks replayed after a reconnect",
            resent.clone(),
        );
        context.register("kills_sent", "Number of kill requests sent", kills.clone());
        context.register(
            "queueing_warnings",
            "Number of excess-queueing warnings raised",
            warnings.clone(),
        );
        Self {
            actors,
            submitted,
            completed,
            failed,
            resent,
            kills,
            warnings,
        }
    }
}
