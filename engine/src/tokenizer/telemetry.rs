//! Per-backend call counters

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name under which estimation-only calls are recorded
pub const ESTIMATION_BACKEND: &str = "estimation";

/// Counters for one backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryCounters {
    pub call_count: u64,
    pub error_count: u64,
    pub estimation_fallback_count: u64,
}

/// Mutable counters keyed by backend name
///
/// Owned by the token service and handed by `&mut` to whoever records a call.
#[derive(Debug, Default)]
pub struct Telemetry {
    backends: BTreeMap<String, TelemetryCounters>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A call answered by `backend`
    pub fn record_call(&mut self, backend: &str) {
        self.entry(backend).call_count += 1;
    }

    /// A call where `backend` failed and estimation answered instead
    pub fn record_backend_error(&mut self, backend: &str) {
        let counters = self.entry(backend);
        counters.call_count += 1;
        counters.error_count += 1;
        counters.estimation_fallback_count += 1;
    }

    /// A call that never reached a backend
    pub fn record_estimation(&mut self) {
        let counters = self.entry(ESTIMATION_BACKEND);
        counters.call_count += 1;
        counters.estimation_fallback_count += 1;
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot { backends: self.backends.clone() }
    }

    /// Zero every counter
    pub fn reset(&mut self) {
        self.backends.clear();
    }

    fn entry(&mut self, backend: &str) -> &mut TelemetryCounters {
        self.backends.entry(backend.to_owned()).or_default()
    }
}

/// Read-only copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub backends: BTreeMap<String, TelemetryCounters>,
}

impl TelemetrySnapshot {
    /// Counters for one backend (zero if never used)
    pub fn get(&self, backend: &str) -> TelemetryCounters {
        self.backends.get(backend).copied().unwrap_or_default()
    }

    /// Sum over all backends
    pub fn total(&self) -> TelemetryCounters {
        self.backends.values().fold(TelemetryCounters::default(), |acc, c| TelemetryCounters {
            call_count: acc.call_count + c.call_count,
            error_count: acc.error_count + c.error_count,
            estimation_fallback_count: acc.estimation_fallback_count
                + c.estimation_fallback_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_per_backend() {
        let mut telemetry = Telemetry::new();
        telemetry.record_call("tiktoken");
        telemetry.record_call("tiktoken");
        telemetry.record_backend_error("tiktoken");
        telemetry.record_estimation();

        let snapshot = telemetry.snapshot();
        let tiktoken = snapshot.get("tiktoken");
        assert_eq!(tiktoken.call_count, 3);
        assert_eq!(tiktoken.error_count, 1);
        assert_eq!(tiktoken.estimation_fallback_count, 1);

        let estimation = snapshot.get(ESTIMATION_BACKEND);
        assert_eq!(estimation.call_count, 1);
        assert_eq!(estimation.error_count, 0);

        assert_eq!(snapshot.total().call_count, 4);
        assert_eq!(snapshot.total().estimation_fallback_count, 2);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let mut telemetry = Telemetry::new();
        telemetry.record_call("tiktoken");
        let before = telemetry.snapshot();
        telemetry.reset();

        assert_eq!(telemetry.snapshot().total(), TelemetryCounters::default());
        // Earlier snapshots are unaffected
        assert_eq!(before.get("tiktoken").call_count, 1);
    }
}
