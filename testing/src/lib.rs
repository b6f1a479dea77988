//! # Ticket Ingest Testing
//!
//! Testing utilities for the ticket ingestion pipeline.
//!
//! This crate provides:
//! - [`InMemoryTicketQueue`]: channel-backed queue with ack tracking and outage simulation
//! - [`InMemoryTicketStore`]: transactional in-memory store with failure and latency injection
//! - [`TicketTextBuilder`] and canned tickets for building raw ticket text
//! - [`init_test_tracing`]: opt-in log output for debugging tests

pub mod fixtures;
pub mod queue_mocks;
pub mod store_mocks;

pub use fixtures::{TicketTextBuilder, mismatched_ticket, valid_ticket};
pub use queue_mocks::InMemoryTicketQueue;
pub use store_mocks::{InMemoryTicketStore, ProductRow, TicketRow};

/// Install a test-friendly tracing subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs the subscriber.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
