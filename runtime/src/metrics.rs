//! Prometheus metrics for the ingestion pipeline.
//!
//! Recording always goes through the `metrics` facade; without an installed
//! recorder the calls are no-ops. [`MetricsServer`] installs a Prometheus
//! recorder with its own HTTP listener.
//!
//! # Example
//!
//! ```rust,no_run
//! use ticket_ingest_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the exporter.
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the exporter.
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus exporter serving `/metrics` on its own listener.
pub struct MetricsServer {
    addr: SocketAddr,
    started: bool,
}

impl MetricsServer {
    /// Create a server that will listen on `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            started: false,
        }
    }

    /// Address the exporter listens on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether [`start`](Self::start) installed the exporter.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }

    /// Describe the pipeline metrics and install the Prometheus exporter.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built, if the
    /// listener cannot be bound, or if another recorder is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        register_metrics();
        self.started = true;

        tracing::info!(addr = %self.addr, "Metrics exporter listening");
        Ok(())
    }
}

fn register_metrics() {
    describe_counter!(
        "ticket_ingest_messages_total",
        "Messages processed by the consumer pool, by outcome"
    );
    describe_counter!(
        "ticket_ingest_tickets_total",
        "Ticket rows written, by validity"
    );
    describe_counter!(
        "ticket_ingest_products_inserted_total",
        "Product rows inserted (first sightings only)"
    );
    describe_counter!(
        "ticket_ingest_ack_failures_total",
        "Acknowledgments the broker rejected"
    );
    describe_histogram!(
        "ticket_ingest_processing_duration_seconds",
        "Time from admission to acknowledgment of one message"
    );
    describe_histogram!(
        "ticket_ingest_store_write_duration_seconds",
        "Time to write and commit one ticket transaction"
    );
    describe_gauge!(
        "ticket_ingest_in_flight",
        "Messages currently holding a pool slot"
    );
}

/// Outcome label for `ticket_ingest_messages_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Ticket row committed.
    Stored,
    /// Text could not be parsed; nothing written.
    Rejected,
    /// Store failure, deadline, panic or bad encoding.
    Failed,
}

impl MessageOutcome {
    /// Label value used in the exported metric.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stored => "stored",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

/// Consumer pool metrics recorder.
pub struct IngestMetrics;

impl IngestMetrics {
    /// Record a finished message.
    pub fn record_message(outcome: MessageOutcome, duration: Duration) {
        counter!("ticket_ingest_messages_total", "outcome" => outcome.as_str()).increment(1);
        histogram!("ticket_ingest_processing_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a committed ticket row and its new products.
    pub fn record_ticket(valid: bool, products_inserted: u64) {
        let valid = if valid { "true" } else { "false" };
        counter!("ticket_ingest_tickets_total", "valid" => valid).increment(1);
        counter!("ticket_ingest_products_inserted_total").increment(products_inserted);
    }

    /// Record a rejected acknowledgment.
    pub fn record_ack_failure() {
        counter!("ticket_ingest_ack_failures_total").increment(1);
    }

    /// Record a message taking a pool slot.
    pub fn record_admitted() {
        gauge!("ticket_ingest_in_flight").increment(1.0);
    }

    /// Record a message giving its pool slot back.
    pub fn record_released() {
        gauge!("ticket_ingest_in_flight").decrement(1.0);
    }
}
