//! Metric names and descriptions

use metrics::describe_counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub const REGISTRAR_JOIN_ATTEMPTS: &str = "registrar_join_attempts_total";
pub const REGISTRAR_RETRIES: &str = "registrar_retries_total";
pub const SIGNALING_RECONNECTS: &str = "signaling_reconnects_total";
pub const SIGNALING_DUPLICATES_DROPPED: &str = "signaling_duplicates_dropped_total";
pub const SIGNALING_BACKPRESSURE: &str = "signaling_backpressure_total";
pub const NEGOTIATION_GLARE: &str = "negotiation_glare_total";
pub const NEGOTIATION_CYCLES: &str = "negotiation_cycles_total";
pub const SESSIONS_FAILED: &str = "sessions_failed_total";

/// Describe every metric once, after a recorder is installed
pub fn describe_metrics() {
    describe_counter!(REGISTRAR_JOIN_ATTEMPTS, "Room join requests sent to the room service");
    describe_counter!(
        REGISTRAR_RETRIES,
        "Room join retries scheduled after the room service was unreachable"
    );
    describe_counter!(SIGNALING_RECONNECTS, "Relay reconnect attempts");
    describe_counter!(
        SIGNALING_DUPLICATES_DROPPED,
        "Relay messages dropped as duplicates by sequence marker"
    );
    describe_counter!(
        SIGNALING_BACKPRESSURE,
        "Queued relay sends failed because the offline queue overflowed"
    );
    describe_counter!(NEGOTIATION_GLARE, "Offer collisions resolved by role precedence");
    describe_counter!(NEGOTIATION_CYCLES, "Offer/answer cycles that reached a stable state");
    describe_counter!(SESSIONS_FAILED, "Sessions that ended in a failed state");
}

/// Install the Prometheus recorder and describe the metrics
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}
