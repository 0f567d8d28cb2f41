use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for observability
///
/// Counters for failover activity. Use `snapshot()` to get a point-in-time
/// view of all metrics, or the individual getters for specific values.
///
/// # Example
/// ```ignore
/// let metrics = manager.metrics();
///
/// println!("Failovers: {}", metrics.failovers());
/// println!("Probe failures: {}", metrics.probe_failures());
///
/// let snapshot = metrics.snapshot();
/// ```
#[derive(Debug, Default)]
pub struct Metrics {
    failovers_total: AtomicU64,
    restores_total: AtomicU64,
    backup_attempts_total: AtomicU64,
    origins_exhausted_total: AtomicU64,
    probes_total: AtomicU64,
    probe_failures_total: AtomicU64,
    diagnosis_cycles_total: AtomicU64,
    binds_total: AtomicU64,
    unbinds_total: AtomicU64,
    teardown_failures_total: AtomicU64,
    status_events_total: AtomicU64,
    network_issues_total: AtomicU64,
    call_timeouts_total: AtomicU64,
}

impl Metrics {
    /// Create a new Metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Getters ==========

    /// Get total failover escalations started (manual or diagnosed)
    pub fn failovers(&self) -> u64 {
        self.failovers_total.load(Ordering::Relaxed)
    }

    /// Get total restores to the primary origin
    pub fn restores(&self) -> u64 {
        self.restores_total.load(Ordering::Relaxed)
    }

    /// Get total backup origins tried
    pub fn backup_attempts(&self) -> u64 {
        self.backup_attempts_total.load(Ordering::Relaxed)
    }

    /// Get total times the backup list ran out
    pub fn origins_exhausted(&self) -> u64 {
        self.origins_exhausted_total.load(Ordering::Relaxed)
    }

    /// Get total probes issued
    pub fn probes(&self) -> u64 {
        self.probes_total.load(Ordering::Relaxed)
    }

    /// Get total failed probes
    pub fn probe_failures(&self) -> u64 {
        self.probe_failures_total.load(Ordering::Relaxed)
    }

    /// Get total diagnosis cycles started
    pub fn diagnosis_cycles(&self) -> u64 {
        self.diagnosis_cycles_total.load(Ordering::Relaxed)
    }

    /// Get total client instances bound
    pub fn binds(&self) -> u64 {
        self.binds_total.load(Ordering::Relaxed)
    }

    /// Get total client instances unbound
    pub fn unbinds(&self) -> u64 {
        self.unbinds_total.load(Ordering::Relaxed)
    }

    /// Get total failed or timed out instance releases
    pub fn teardown_failures(&self) -> u64 {
        self.teardown_failures_total.load(Ordering::Relaxed)
    }

    /// Get total status events seen from live instances
    pub fn status_events(&self) -> u64 {
        self.status_events_total.load(Ordering::Relaxed)
    }

    /// Get total network-issue status events
    pub fn network_issues(&self) -> u64 {
        self.network_issues_total.load(Ordering::Relaxed)
    }

    /// Get total timed out attempts of calls made through `call_with_failover`
    pub fn call_timeouts(&self) -> u64 {
        self.call_timeouts_total.load(Ordering::Relaxed)
    }

    // ========== Recording methods (called internally) ==========

    pub(crate) fn record_failover(&self) {
        self.failovers_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_restore(&self) {
        self.restores_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_backup_attempt(&self) {
        self.backup_attempts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_origins_exhausted(&self) {
        self.origins_exhausted_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a probe and whether it passed
    pub(crate) fn record_probe(&self, ok: bool) {
        self.probes_total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.probe_failures_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_diagnosis_cycle(&self) {
        self.diagnosis_cycles_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bind(&self) {
        self.binds_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unbind(&self) {
        self.unbinds_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_teardown_failure(&self) {
        self.teardown_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a status event and whether it reported network issues
    pub(crate) fn record_status_event(&self, network_issue: bool) {
        self.status_events_total.fetch_add(1, Ordering::Relaxed);
        if network_issue {
            self.network_issues_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_call_timeout(&self) {
        self.call_timeouts_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time snapshot of all metrics for export
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            failovers_total: self.failovers_total.load(Ordering::Acquire),
            restores_total: self.restores_total.load(Ordering::Acquire),
            backup_attempts_total: self.backup_attempts_total.load(Ordering::Acquire),
            origins_exhausted_total: self.origins_exhausted_total.load(Ordering::Acquire),
            probes_total: self.probes_total.load(Ordering::Acquire),
            probe_failures_total: self.probe_failures_total.load(Ordering::Acquire),
            diagnosis_cycles_total: self.diagnosis_cycles_total.load(Ordering::Acquire),
            binds_total: self.binds_total.load(Ordering::Acquire),
            unbinds_total: self.unbinds_total.load(Ordering::Acquire),
            teardown_failures_total: self.teardown_failures_total.load(Ordering::Acquire),
            status_events_total: self.status_events_total.load(Ordering::Acquire),
            network_issues_total: self.network_issues_total.load(Ordering::Acquire),
            call_timeouts_total: self.call_timeouts_total.load(Ordering::Acquire),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub failovers_total: u64,
    pub restores_total: u64,
    pub backup_attempts_total: u64,
    pub origins_exhausted_total: u64,
    pub probes_total: u64,
    pub probe_failures_total: u64,
    pub diagnosis_cycles_total: u64,
    pub binds_total: u64,
    pub unbinds_total: u64,
    pub teardown_failures_total: u64,
    pub status_events_total: u64,
    pub network_issues_total: u64,
    pub call_timeouts_total: u64,
}
