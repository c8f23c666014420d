//! Lightweight metrics helpers for Kiln.
//!
//! Thin wrappers around the `metrics` crate macros. No exporter is embedded;
//! the embedding application installs whatever recorder it uses, and without
//! one every call here is a no-op.
//!
//! Provided metrics:
//! * `kiln_method_calls_total` (counter; labels `instance`, `method`, `action`)
//! * `kiln_method_failures_total` (counter; labels `instance`, `method`)
//! * `kiln_trace_hits_total` (counter; label `instance`)
//! * `kiln_temperature_transitions_total` (counter; labels `from`, `to`)
//! * `kiln_execution_leases` (gauge per instance)
use std::{collections::HashMap, sync::Mutex};

use metrics::{Unit, counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::Lazy;

use crate::core::{Action, Method, Temperature};

pub const KILN_METHOD_CALLS_TOTAL: &str = "kiln_method_calls_total";
pub const KILN_METHOD_FAILURES_TOTAL: &str = "kiln_method_failures_total";
pub const KILN_TRACE_HITS_TOTAL: &str = "kiln_trace_hits_total";
pub const KILN_TEMPERATURE_TRANSITIONS_TOTAL: &str = "kiln_temperature_transitions_total";
pub const KILN_EXECUTION_LEASES: &str = "kiln_execution_leases";

/// Last lease count published per instance
pub static LEASE_GAUGES: Lazy<Mutex<HashMap<String, f64>>> = Lazy::new(|| {
    describe_counter!(
        KILN_METHOD_CALLS_TOTAL,
        Unit::Count,
        "Compiled methods dispatched, by instance, method and outcome."
    );
    describe_counter!(
        KILN_METHOD_FAILURES_TOTAL,
        Unit::Count,
        "Compiled methods that returned fail."
    );
    describe_counter!(
        KILN_TRACE_HITS_TOTAL,
        Unit::Count,
        "Trace points reached by compiled programs."
    );
    describe_counter!(
        KILN_TEMPERATURE_TRANSITIONS_TOTAL,
        Unit::Count,
        "Instance temperature transitions."
    );
    describe_gauge!(
        KILN_EXECUTION_LEASES,
        "Execution leases currently held on each instance."
    );

    Mutex::new(HashMap::new())
});

fn adjust_leases(instance: &str, delta: f64) {
    let value = match LEASE_GAUGES.lock() {
        Ok(mut gauges) => {
            let value = gauges.entry(instance.to_string()).or_insert(0.0);
            *value = (*value + delta).max(0.0);
            *value
        }
        Err(_) => {
            tracing::error!("Failed to acquire lock for lease gauges");
            return;
        }
    };
    gauge!(KILN_EXECUTION_LEASES, "instance" => instance.to_string()).set(value);
}

pub fn lease_taken(instance: &str) {
    adjust_leases(instance, 1.0);
}

pub fn lease_released(instance: &str) {
    adjust_leases(instance, -1.0);
}

pub fn record_method_call(instance: &str, method: Method, action: Action) {
    counter!(
        KILN_METHOD_CALLS_TOTAL,
        "instance" => instance.to_string(),
        "method" => method.name(),
        "action" => action.name()
    )
    .increment(1);
}

pub fn record_method_failure(instance: &str, method: Method) {
    counter!(
        KILN_METHOD_FAILURES_TOTAL,
        "instance" => instance.to_string(),
        "method" => method.name()
    )
    .increment(1);
}

pub fn record_trace_hit(instance: &str) {
    counter!(KILN_TRACE_HITS_TOTAL, "instance" => instance.to_string()).increment(1);
}

pub fn record_transition(from: Temperature, to: Temperature) {
    counter!(
        KILN_TEMPERATURE_TRANSITIONS_TOTAL,
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    Lazy::force(&LEASE_GAUGES);
    tracing::debug!("Kiln metric descriptions registered");
    Ok(())
}

/// Lease counts as last published, keyed by instance name.
pub fn current_leases() -> HashMap<String, f64> {
    LEASE_GAUGES
        .lock()
        .map(|gauges| gauges.clone())
        .unwrap_or_default()
}
