//! `PostgreSQL` ticket store for the ticket ingestion pipeline.
//!
//! This crate provides [`PostgresTicketStore`], which implements the
//! `TicketStore` trait from `ticket-ingest-core`. It supports:
//!
//! - One transaction per ticket, rolled back on any failure
//! - First-writer-wins product inserts (`ON CONFLICT DO NOTHING`)
//! - Connection pooling shared by all consumer tasks
//! - Read helpers for auditing what was stored
//!
//! Schema provisioning is left to the deployment; the expected tables are
//! documented on [`store`].
//!
//! # Example
//!
//! ```no_run
//! use ticket_ingest_postgres::PostgresTicketStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresTicketStore::connect("postgres://localhost/tickets", 8).await?;
//! let tickets = store.tickets_for_order("A1").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod store;

pub use store::{PostgresTicketStore, ProductRow, TicketRow};
