use crate::Readiness;
use prometheus::{IntCounterVec, IntGauge, register_int_counter_vec, register_int_gauge};
use std::sync::LazyLock;

pub static DATASTORE_READY: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "datastore_ready",
        "1 if the last readiness check reached the datastore, 0 if not"
    )
    .expect("register datastore_ready")
});

pub static READINESS_CHECKS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "readiness_checks_total",
        "Readiness checks by outcome",
        &["outcome"]
    )
    .expect("register readiness_checks_total")
});

pub(crate) fn record(readiness: &Readiness) {
    let outcome = readiness.failure().map_or("ready", |failure| failure.kind());
    READINESS_CHECKS_TOTAL.with_label_values(&[outcome]).inc();
    DATASTORE_READY.set(i64::from(readiness.is_ready()));
}

#[cfg(test)]
mod tests {
    use super::{READINESS_CHECKS_TOTAL, record};
    use crate::{ProbeFailure, Readiness};
    use std::time::Duration;

    #[test]
    fn outcomes_are_counted_by_kind() {
        let before = READINESS_CHECKS_TOTAL.with_label_values(&["timeout"]).get();
        record(&Readiness::NotReady(ProbeFailure::TimedOut(Duration::from_secs(1))));
        let after = READINESS_CHECKS_TOTAL.with_label_values(&["timeout"]).get();
        assert!(after > before);
    }
}
