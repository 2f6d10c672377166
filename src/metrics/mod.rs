//! Prometheus metrics for the lifecycle coordinator
//!
//! This module tracks:
//! - Control-plane transitions by kind and outcome
//! - Forced stops after a graceful shutdown timed out
//! - Offline-required actions currently in flight
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization never happens or fails, recording functions are no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};
use std::sync::{Mutex, OnceLock};

use crate::coordinator::TransitionKind;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all coordinator metrics
struct CoordinatorMetrics {
    transitions: CounterVec,
    forced_stops: Counter,
    envelopes_in_flight: Gauge,
}

/// Global storage for coordinator metrics
static COORDINATOR_METRICS: OnceLock<CoordinatorMetrics> = OnceLock::new();

/// Serializes registration so concurrent callers never register twice
static INIT_LOCK: Mutex<()> = Mutex::new(());

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; later calls are no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = powercycle::metrics::init_metrics() {
///     tracing::warn!("Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _lock = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if COORDINATOR_METRICS.get().is_some() {
        return Ok(());
    }

    let metrics = CoordinatorMetrics {
        transitions: register_counter_vec!(
            "powercycle_transitions_total",
            "Control-plane transitions by kind and outcome",
            &["kind", "outcome"]
        )?,
        forced_stops: register_counter!(
            "powercycle_forced_stops_total",
            "Forced stops issued after a graceful shutdown timed out"
        )?,
        envelopes_in_flight: register_gauge!(
            "powercycle_envelopes_in_flight",
            "Offline-required actions currently inside a power-cycle envelope"
        )?,
    };

    // Cannot fail: guarded by INIT_LOCK and checked above.
    let _ = COORDINATOR_METRICS.set(metrics);

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    COORDINATOR_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a finished control-plane transition
pub fn record_transition(kind: TransitionKind, success: bool) {
    let Some(m) = COORDINATOR_METRICS.get() else {
        return;
    };

    m.transitions
        .with_label_values(&[kind.as_str(), outcome_label(success)])
        .inc();
}

fn outcome_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Current value of a transition counter, zero before initialization
#[cfg(test)]
pub(crate) fn transition_count(kind: TransitionKind, success: bool) -> f64 {
    COORDINATOR_METRICS
        .get()
        .map(|m| {
            m.transitions
                .with_label_values(&[kind.as_str(), outcome_label(success)])
                .get()
        })
        .unwrap_or(0.0)
}

/// Record a forced stop
pub fn record_forced_stop() {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.forced_stops.inc();
    }
}

/// An offline-required action entered its envelope
pub fn envelope_entered() {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.envelopes_in_flight.inc();
    }
}

/// An offline-required action left its envelope
pub fn envelope_left() {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.envelopes_in_flight.dec();
    }
}

// ============================================================================
// Tests
// ============================================================================
