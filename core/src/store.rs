//! Relational store abstraction for parsed tickets.
//!
//! A [`TicketStore`] writes one [`TicketRecord`] as a single atomic
//! transaction:
//!
//! 1. insert the ticket row with its validity flag and the raw text
//! 2. if the ticket is valid, insert each product by product id, doing nothing
//!    on conflict (first writer wins)
//! 3. commit; any failure rolls back everything
//!
//! # Implementations
//!
//! - `PostgresTicketStore` (in `ticket-ingest-postgres`): production
//! - `InMemoryTicketStore` (in `ticket-ingest-testing`): tests

use crate::error::StoreError;
use crate::ticket::Ticket;
use std::future::Future;
use std::pin::Pin;

/// One ticket ready to be persisted.
#[derive(Debug, Clone, Copy)]
pub struct TicketRecord<'a> {
    /// The parsed ticket.
    pub ticket: &'a Ticket,
    /// Validator verdict. Products are only written when `true`.
    pub valid: bool,
    /// The original text, stored verbatim for audit and replay.
    pub raw: &'a str,
}

/// What a committed transaction wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreReceipt {
    /// Identifier of the inserted ticket row.
    pub ticket_id: i64,
    /// Number of product rows actually inserted (existing ids excluded).
    pub products_inserted: u64,
}

/// Transactional writer for tickets and their products.
pub trait TicketStore: Send + Sync {
    /// Persist `record` atomically.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Unavailable`]: no transaction could be opened
    /// - [`StoreError::Write`]: an insert or the commit failed; nothing was written
    fn save_ticket<'a>(
        &'a self,
        record: TicketRecord<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<StoreReceipt, StoreError>> + Send + 'a>>;
}
