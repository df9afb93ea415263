//! Metrics collection.
//!
//! Prometheus-compatible metrics with typed recording functions. Every
//! label value comes from a closed enum, so label cardinality is bounded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::bridge::HardwareSync;
use crate::error::{StrategyError, TrafficMindError, TransportError};
use crate::phase::Phase;
use crate::strategy::{DecisionSource, StrategyKind};

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const ALL_PHASES: [Phase; 4] = [Phase::NsGreen, Phase::EwGreen, Phase::AllYellow, Phase::AllRed];

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without an
/// HTTP endpoint.
///
/// # Errors
///
/// Returns `TrafficMindError::Io` if the recorder or HTTP listener cannot
/// be installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), TrafficMindError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| TrafficMindError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

/// Registers metric descriptions with the global recorder.
fn describe_metrics() {
    describe_counter!("trafficmind_ticks_total", "Decision loop ticks executed");
    describe_histogram!(
        "trafficmind_tick_duration_ms",
        "Wall time of one decision tick in milliseconds"
    );
    describe_counter!(
        "trafficmind_decisions_total",
        "Decisions applied, by source"
    );
    describe_counter!(
        "trafficmind_strategy_faults_total",
        "Strategy errors and budget overruns"
    );
    describe_histogram!(
        "trafficmind_strategy_latency_ms",
        "Strategy call latency in milliseconds"
    );
    describe_counter!(
        "trafficmind_phase_transitions_total",
        "Completed phase transitions"
    );
    describe_gauge!("trafficmind_current_phase", "Phase currently shown (1 = shown)");
    describe_gauge!(
        "trafficmind_override_active",
        "Emergency override active (1) or not (0)"
    );
    describe_counter!(
        "trafficmind_transport_faults_total",
        "Signal link write/read failures"
    );
    describe_counter!(
        "trafficmind_sensor_frames_total",
        "Sensor read-back lines, by outcome"
    );
    describe_gauge!(
        "trafficmind_hardware_synced",
        "Hardware link in sync (1) or not (0)"
    );
}

/// Records one decision tick.
pub fn record_tick(duration: Duration) {
    counter!("trafficmind_ticks_total").increment(1);
    histogram!("trafficmind_tick_duration_ms").record(duration.as_secs_f64() * 1000.0);
}

/// Records the source of an applied decision.
pub fn record_decision(source: DecisionSource) {
    counter!("trafficmind_decisions_total", "source" => source.label()).increment(1);
}

/// Records a strategy fault.
pub fn record_strategy_fault(kind: StrategyKind, error: &StrategyError) {
    let cause = match error {
        StrategyError::Timeout { .. } => "timeout",
        StrategyError::Inference(_) => "inference",
        StrategyError::TaskAborted(_) => "aborted",
    };
    counter!(
        "trafficmind_strategy_faults_total",
        "strategy" => kind.as_str(),
        "cause" => cause,
    )
    .increment(1);
}

/// Records how long a strategy call took.
pub fn record_strategy_latency(kind: StrategyKind, duration: Duration) {
    histogram!("trafficmind_strategy_latency_ms", "strategy" => kind.as_str())
        .record(duration.as_secs_f64() * 1000.0);
}

/// Records a phase transition and moves the current-phase gauge.
pub fn record_phase_transition(from: Phase, to: Phase) {
    counter!(
        "trafficmind_phase_transitions_total",
        "from" => from.to_string(),
        "to" => to.to_string(),
    )
    .increment(1);
    set_current_phase(to);
}

/// Sets the current-phase gauge, zeroing every other phase.
pub fn set_current_phase(current: Phase) {
    for phase in ALL_PHASES {
        let value = if phase == current { 1.0 } else { 0.0 };
        gauge!("trafficmind_current_phase", "phase" => phase.to_string()).set(value);
    }
}

/// Sets the override gauge.
pub fn set_override_active(active: bool) {
    gauge!("trafficmind_override_active").set(if active { 1.0 } else { 0.0 });
}

/// Records a link failure.
pub fn record_transport_fault(error: &TransportError) {
    let kind = match error {
        TransportError::Io(_) => "io",
        TransportError::ConnectionFailed(_) => "connection_failed",
        TransportError::ConnectionClosed(_) => "connection_closed",
        TransportError::Timeout(_) => "timeout",
    };
    counter!("trafficmind_transport_faults_total", "kind" => kind).increment(1);
}

/// Records a sensor read-back line.
pub fn record_sensor_frame(accepted: bool) {
    let outcome = if accepted { "accepted" } else { "rejected" };
    counter!("trafficmind_sensor_frames_total", "outcome" => outcome).increment(1);
}

/// Sets the hardware-sync gauge.
pub fn set_hardware_sync(status: HardwareSync) {
    let synced = if status == HardwareSync::Synced { 1.0 } else { 0.0 };
    gauge!("trafficmind_hardware_synced").set(synced);
}
