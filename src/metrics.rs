//! Metrics emitted by the UBNS client.
//!
//! Uses the `metrics` facade only; installing a recorder/exporter is the
//! host gateway's job.  Without a recorder every macro is a no-op.

use metrics::{describe_counter, describe_histogram};

// -- Metric name constants ----------------------------------------------------

/// Naming RPCs issued (counter). Labels: rpc, outcome.
pub const UBNS_RPC_TOTAL: &str = "bleepstore_ubns_rpc_total";

/// Naming RPC latency in seconds (histogram). Labels: rpc.
pub const UBNS_RPC_DURATION_SECONDS: &str = "bleepstore_ubns_rpc_duration_seconds";

/// Compensating RPCs (counter). Labels: protocol, outcome.
pub const UBNS_ROLLBACKS_TOTAL: &str = "bleepstore_ubns_rollbacks_total";

/// Channel rebuild attempts (counter). Labels: outcome.
pub const UBNS_CHANNEL_UPDATES_TOTAL: &str = "bleepstore_ubns_channel_updates_total";

/// Register metric descriptions with the global recorder. Call once after
/// the host installs its recorder.
pub fn describe_metrics() {
    describe_counter!(UBNS_RPC_TOTAL, "Naming authority RPCs by outcome");
    describe_histogram!(
        UBNS_RPC_DURATION_SECONDS,
        "Naming authority RPC duration in seconds"
    );
    describe_counter!(
        UBNS_ROLLBACKS_TOTAL,
        "Compensating naming RPCs by protocol and outcome"
    );
    describe_counter!(
        UBNS_CHANNEL_UPDATES_TOTAL,
        "Naming channel rebuilds by outcome"
    );
}
