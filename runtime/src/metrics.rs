//! Prometheus metrics for the poll loop, command pipeline and caches.
//!
//! Components record through the `metrics` facade, so nothing is collected
//! until a recorder is installed. [`install_recorder`] installs the Prometheus
//! recorder and returns a [`MetricsHandle`] that renders the exposition text.
//!
//! # Example
//!
//! ```rust,no_run
//! use eventide_runtime::metrics::install_recorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = install_recorder()?;
//! // ... run the runtime ...
//! println!("{}", handle.render().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Handle to the installed Prometheus recorder.
#[derive(Clone, Default)]
pub struct MetricsHandle {
    handle: Option<PrometheusHandle>,
}

impl MetricsHandle {
    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if another recorder was installed first.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

impl std::fmt::Debug for MetricsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsHandle")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

/// Describe every runtime metric and install the Prometheus recorder.
///
/// If a recorder is already installed (e.g., in tests), the existing one is
/// kept and the returned handle renders nothing.
///
/// # Errors
///
/// Returns error if the exporter cannot be built or installed.
pub fn install_recorder() -> Result<MetricsHandle, MetricsError> {
    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?;

    match builder.install_recorder() {
        Ok(handle) => {
            register_metrics();
            tracing::info!("Prometheus metrics recorder installed");
            Ok(MetricsHandle {
                handle: Some(handle),
            })
        }
        Err(e) => {
            let err_msg = e.to_string();
            if err_msg.contains("already initialized") {
                tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                Ok(MetricsHandle::default())
            } else {
                Err(MetricsError::Install(err_msg))
            }
        }
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Poll loop
    describe_counter!(
        "eventide_poll_batches_total",
        "Total number of non-empty batches read by poll loops"
    );
    describe_counter!(
        "eventide_poll_events_total",
        "Total number of events emitted by poll loops"
    );
    describe_counter!(
        "eventide_poll_failures_total",
        "Total number of failed poll reads"
    );
    describe_counter!(
        "eventide_poll_skips_total",
        "Total number of cursors skipped after exhausting retries"
    );

    // Command pipeline
    describe_counter!(
        "eventide_commands_submitted_total",
        "Total number of commands submitted to command streams"
    );
    describe_counter!(
        "eventide_commands_processed_total",
        "Total number of processing results, by outcome"
    );
    describe_histogram!(
        "eventide_command_duration_seconds",
        "Time taken to process and persist a command"
    );
    describe_counter!(
        "eventide_command_outcome_write_failures_total",
        "Total number of CommandProcessed events that could not be written"
    );

    // Projection caches
    describe_counter!(
        "eventide_projection_backfills_total",
        "Total number of by-stream backfill reads"
    );
    describe_counter!(
        "eventide_projection_applied_total",
        "Total number of live events that changed a projection"
    );
    describe_gauge!(
        "eventide_projection_high_water",
        "Highest position applied by a projection cache"
    );

    // Retry
    describe_counter!("eventide_retry_attempts_total", "Total number of retry attempts");
    describe_counter!(
        "eventide_retry_successes_total",
        "Total number of operations that succeeded after retrying"
    );
    describe_counter!(
        "eventide_retry_exhausted_total",
        "Total number of operations that exhausted their retries"
    );
}

/// Poll loop metrics recorder.
pub struct PollMetrics;

impl PollMetrics {
    /// Record a non-empty batch.
    pub fn record_batch(count: usize) {
        counter!("eventide_poll_batches_total").increment(1);
        counter!("eventide_poll_events_total").increment(count as u64);
    }

    /// Record a failed read.
    pub fn record_failure(temporary: bool) {
        let kind = if temporary { "temporary" } else { "permanent" };
        counter!("eventide_poll_failures_total", "kind" => kind).increment(1);
    }

    /// Record a skipped cursor.
    pub fn record_skip() {
        counter!("eventide_poll_skips_total").increment(1);
    }
}

/// Command pipeline metrics recorder.
pub struct CommandMetrics;

impl CommandMetrics {
    /// Record a submission.
    pub fn record_submitted() {
        counter!("eventide_commands_submitted_total").increment(1);
    }

    /// Record a processing result.
    pub fn record_processed(outcome: &'static str, duration: Duration) {
        counter!("eventide_commands_processed_total", "outcome" => outcome).increment(1);
        histogram!("eventide_command_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a `CommandProcessed` that could not be written.
    pub fn record_outcome_write_failure() {
        counter!("eventide_command_outcome_write_failures_total").increment(1);
    }
}

/// Projection cache metrics recorder.
pub struct ProjectionMetrics;

impl ProjectionMetrics {
    /// Record a backfill read.
    pub fn record_backfill() {
        counter!("eventide_projection_backfills_total").increment(1);
    }

    /// Record an applied live event.
    pub fn record_applied(high_water: u64) {
        counter!("eventide_projection_applied_total").increment(1);
        #[allow(clippy::cast_precision_loss)] // gauge values are f64
        gauge!("eventide_projection_high_water").set(high_water as f64);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("eventide_retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("eventide_retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("eventide_retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn install_and_render() {
        let handle = install_recorder().unwrap();

        PollMetrics::record_batch(3);
        PollMetrics::record_failure(true);
        CommandMetrics::record_processed("processed", Duration::from_millis(5));

        // Another test binary may have installed the recorder first.
        if let Some(rendered) = handle.render() {
            assert!(rendered.contains("eventide_poll_batches_total"));
            assert!(rendered.contains("eventide_commands_processed_total"));
        }
    }

    #[test]
    fn installing_twice_is_not_an_error() {
        assert!(install_recorder().is_ok());
        assert!(install_recorder().is_ok());
    }
}
