//! Error taxonomy for the ingestion pipeline.
//!
//! Errors are split by the boundary they cross:
//!
//! - [`ParseError`]: the ticket text does not follow the line format. Fatal to
//!   that message only; nothing is written.
//! - [`StoreError`]: the relational store could not be reached or the ticket
//!   transaction failed and was rolled back.
//! - [`QueueError`]: the broker could not be reached, subscribed to, published
//!   to or acknowledged.
//! - [`IngestError`]: everything that can go wrong while processing a single
//!   delivery. Never escapes the processing task.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Numeric field that failed to parse as a decimal amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountField {
    /// The `VAT` header line.
    Vat,
    /// The `Total` header line.
    Total,
    /// The price column of a product line (index among non-empty product lines).
    Price {
        /// Zero-based product index.
        index: usize,
    },
}

impl fmt::Display for AmountField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vat => f.write_str("VAT"),
            Self::Total => f.write_str("Total"),
            Self::Price { index } => write!(f, "price of product {index}"),
        }
    }
}

/// Errors raised by [`parse_ticket`](crate::parser::parse_ticket).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A header line is missing or has no `:` separator.
    #[error("Malformed header at line {line}")]
    MalformedHeader {
        /// Zero-based line index (0 = order id, 1 = VAT, 2 = Total).
        line: usize,
    },

    /// A numeric field is not a finite decimal number.
    #[error("Invalid amount for {field}: {value:?}")]
    InvalidAmount {
        /// Which field failed.
        field: AmountField,
        /// The offending text, trimmed.
        value: String,
    },

    /// A product line does not have exactly three comma-separated fields.
    #[error("Malformed product line {index}: expected 3 fields, found {fields}")]
    MalformedProductLine {
        /// Zero-based index among non-empty product lines.
        index: usize,
        /// Number of comma-separated fields found.
        fields: usize,
    },
}

/// Errors raised by a [`TicketStore`](crate::store::TicketStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or no connection could be acquired.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A statement or the commit failed; the transaction was rolled back.
    #[error("Store write failed: {0}")]
    Write(String),
}

/// Errors raised by a [`TicketQueue`](crate::queue::TicketQueue).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The broker could not be reached.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// Subscribing to the queue failed.
    #[error("Subscription to queue '{queue}' failed: {reason}")]
    Subscription {
        /// The queue name.
        queue: String,
        /// The reason for failure.
        reason: String,
    },

    /// Publishing a ticket failed.
    #[error("Publish to queue '{queue}' failed: {reason}")]
    Publish {
        /// The queue name.
        queue: String,
        /// The reason for failure.
        reason: String,
    },

    /// Acknowledging a delivery failed.
    #[error("Acknowledgment failed: {0}")]
    Ack(String),

    /// Receiving from the broker failed mid-stream.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Failure while processing one delivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    /// The ticket text could not be parsed; no row was written.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The ticket transaction failed and was rolled back.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The delivery body is not valid UTF-8.
    #[error("Delivery body is not valid UTF-8: {0}")]
    Encoding(String),

    /// Processing did not finish within the per-message deadline.
    #[error("Processing exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    /// Processing panicked.
    #[error("Processing panicked: {0}")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_field_names_the_field() {
        let err = ParseError::InvalidAmount {
            field: AmountField::Vat,
            value: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid amount for VAT: \"abc\"");

        let err = ParseError::InvalidAmount {
            field: AmountField::Price { index: 2 },
            value: "x".to_string(),
        };
        assert!(err.to_string().contains("price of product 2"));
    }

    #[test]
    fn ingest_error_is_transparent_over_parse_errors() {
        let err: IngestError = ParseError::MalformedHeader { line: 1 }.into();
        assert_eq!(err.to_string(), "Malformed header at line 1");
    }
}
