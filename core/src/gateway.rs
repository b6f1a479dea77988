//! Persistence gateway: validate, parse and store one raw ticket.

use crate::error::IngestError;
use crate::parser::parse_ticket;
use crate::store::{StoreReceipt, TicketRecord, TicketStore};
use crate::validator::is_valid;
use std::sync::Arc;

/// Result of storing one ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTicket {
    /// Order id from the ticket header.
    pub order_id: String,
    /// Validator verdict recorded on the ticket row.
    pub valid: bool,
    /// What the transaction wrote.
    pub receipt: StoreReceipt,
}

/// Runs the validator and parser over raw text and hands the result to a
/// [`TicketStore`].
///
/// Every successfully parsed ticket produces exactly one ticket row, valid or
/// not. Invalid tickets never contribute product rows. Parse failures write
/// nothing.
#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn TicketStore>,
}

impl PersistenceGateway {
    /// Create a gateway over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    /// Validate, parse and persist `raw` in one transaction.
    ///
    /// # Errors
    ///
    /// - [`IngestError::Parse`] if the text cannot be parsed; no transaction is opened
    /// - [`IngestError::Store`] if the transaction failed and was rolled back
    pub async fn store_ticket(&self, raw: &str) -> Result<StoredTicket, IngestError> {
        let valid = is_valid(raw);
        let ticket = parse_ticket(raw)?;

        tracing::debug!(
            order_id = %ticket.order_id,
            valid,
            products = ticket.products.len(),
            "Ticket parsed"
        );

        let receipt = self
            .store
            .save_ticket(TicketRecord {
                ticket: &ticket,
                valid,
                raw,
            })
            .await?;

        Ok(StoredTicket {
            order_id: ticket.order_id,
            valid,
            receipt,
        })
    }
}
