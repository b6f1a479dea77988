//! # Ticket Ingest Core
//!
//! Core types and pure logic for the ticket ingestion pipeline.
//!
//! ## Pipeline
//!
//! ```text
//! queue message ─► validator ─┐
//!               └► parser ────┴► PersistenceGateway ─► TicketStore (one transaction)
//! ```
//!
//! - [`parser`]: raw ticket text to [`Ticket`]; strict about line format
//! - [`validator`]: structural and arithmetic admissibility; never fails loudly
//! - [`gateway`]: runs both and persists the ticket, products only when valid
//! - [`queue`] / [`store`]: narrow traits over the broker and the relational store
//!
//! Adapters live in sibling crates (`ticket-ingest-postgres`,
//! `ticket-ingest-redpanda`); the bounded consumer pool lives in
//! `ticket-ingest-runtime`.
//!
//! ## Example
//!
//! ```
//! use ticket_ingest_core::{is_valid, parse_ticket};
//!
//! let raw = "OrderId: A1\nVAT: 2.00\nTotal: 12.00\n\nproduct\nApple,P1,5.00\nBread,P2,7.00";
//!
//! let ticket = parse_ticket(raw).unwrap();
//! assert_eq!(ticket.order_id, "A1");
//! assert_eq!(ticket.products.len(), 2);
//! assert!(is_valid(raw));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod gateway;
pub mod parser;
pub mod queue;
pub mod store;
pub mod ticket;
pub mod validator;

pub use error::{AmountField, IngestError, ParseError, QueueError, StoreError};
pub use gateway::{PersistenceGateway, StoredTicket};
pub use parser::parse_ticket;
pub use queue::{Acknowledger, Delivery, DeliveryStream, TICKETS_QUEUE, TicketQueue};
pub use store::{StoreReceipt, TicketRecord, TicketStore};
pub use ticket::{Product, Ticket};
pub use validator::is_valid;
