//! Global atomic counters for Vista observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. on shutdown).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Atomic counters. No allocation or locking on the hot path.
pub struct Metrics {
    builds_published: AtomicU64,
    capabilities_issued: AtomicU64,
    redemptions_denied: AtomicU64,
    vcs_invocations: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            builds_published: AtomicU64::new(0),
            capabilities_issued: AtomicU64::new(0),
            redemptions_denied: AtomicU64::new(0),
            vcs_invocations: AtomicU64::new(0),
        }
    }

    pub fn inc_builds_published(&self) {
        self.builds_published.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "builds_published", "counter incremented");
    }

    pub fn inc_capabilities_issued(&self) {
        self.capabilities_issued.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "capabilities_issued", "counter incremented");
    }

    pub fn inc_redemptions_denied(&self) {
        self.redemptions_denied.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "redemptions_denied", "counter incremented");
    }

    pub fn inc_vcs_invocations(&self) {
        self.vcs_invocations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "vcs_invocations", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            builds_published = self.builds_published(),
            capabilities_issued = self.capabilities_issued(),
            redemptions_denied = self.redemptions_denied(),
            vcs_invocations = self.vcs_invocations(),
        );
    }

    pub fn builds_published(&self) -> u64 {
        self.builds_published.load(Ordering::Relaxed)
    }

    pub fn capabilities_issued(&self) -> u64 {
        self.capabilities_issued.load(Ordering::Relaxed)
    }

    pub fn redemptions_denied(&self) -> u64 {
        self.redemptions_denied.load(Ordering::Relaxed)
    }

    pub fn vcs_invocations(&self) -> u64 {
        self.vcs_invocations.load(Ordering::Relaxed)
    }
}
