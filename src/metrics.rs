//! Metrics for the sync protocol.
//!
//! ## Available Metrics
//!
//! ### Counters
//! - `windowed_sync_load_new_total` - Load-new requests answered by a server
//! - `windowed_sync_load_previous_total` - Load-previous requests answered by a server
//! - `windowed_sync_resets_total` - Responses that told a client to reset
//! - `windowed_sync_items_added_total` - Items appended to a server sequence
//! - `windowed_sync_items_updated_total` - Items edited in a server sequence
//! - `windowed_sync_clears_total` - Sequence clears
//! - `windowed_sync_echo_suppressed_total` - Own appends recognized in server echoes
//! - `windowed_sync_append_retries_total` - Append batches scheduled for retry
//! - `windowed_sync_append_dropped_total` - Append batches dropped after a failure
//!
//! ### Gauges
//! - `windowed_sync_append_queue_depth` - Items queued or in flight in a write queue

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Initialize metric descriptions.
///
/// Call this once at application startup to register all metric descriptions.
pub fn init_metrics() {
    describe_counter!(
        "windowed_sync_load_new_total",
        "Total number of load-new requests answered"
    );
    describe_counter!(
        "windowed_sync_load_previous_total",
        "Total number of load-previous requests answered"
    );
    describe_counter!(
        "windowed_sync_resets_total",
        "Total number of responses that forced a client reset"
    );
    describe_counter!(
        "windowed_sync_items_added_total",
        "Total number of items appended"
    );
    describe_counter!(
        "windowed_sync_items_updated_total",
        "Total number of items edited in place"
    );
    describe_counter!(
        "windowed_sync_clears_total",
        "Total number of sequence clears"
    );
    describe_counter!(
        "windowed_sync_echo_suppressed_total",
        "Total number of own appends recognized in server echoes"
    );
    describe_counter!(
        "windowed_sync_append_retries_total",
        "Total number of append batches scheduled for retry"
    );
    describe_counter!(
        "windowed_sync_append_dropped_total",
        "Total number of append batches dropped after a failure"
    );

    describe_gauge!(
        "windowed_sync_append_queue_depth",
        "Current number of items queued or in flight in a write queue"
    );
}

/// Record an answered load-new request.
pub fn record_load_new() {
    counter!("windowed_sync_load_new_total").increment(1);
}

/// Record an answered load-previous request.
pub fn record_load_previous() {
    counter!("windowed_sync_load_previous_total").increment(1);
}

/// Record a response that forces a reset.
pub fn record_reset() {
    counter!("windowed_sync_resets_total").increment(1);
}

/// Record appended items.
pub fn record_items_added(count: usize) {
    counter!("windowed_sync_items_added_total").increment(count as u64);
}

/// Record edited items.
pub fn record_items_updated(count: usize) {
    counter!("windowed_sync_items_updated_total").increment(count as u64);
}

/// Record a clear.
pub fn record_clear() {
    counter!("windowed_sync_clears_total").increment(1);
}

/// Record own appends recognized in an echo.
pub fn record_echo_suppressed(count: usize) {
    counter!("windowed_sync_echo_suppressed_total").increment(count as u64);
}

/// Record an append batch scheduled for retry.
pub fn record_append_retry() {
    counter!("windowed_sync_append_retries_total").increment(1);
}

/// Record a dropped append batch.
pub fn record_append_dropped() {
    counter!("windowed_sync_append_dropped_total").increment(1);
}

/// Set the current write queue depth.
pub fn set_append_queue_depth(depth: usize) {
    gauge!("windowed_sync_append_queue_depth").set(depth as f64);
}
