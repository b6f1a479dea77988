//! Ticket and product values produced by the parser.
//!
//! These are transient: one [`Ticket`] lives for the duration of a single
//! delivery and is dropped once the store transaction commits or is abandoned.

/// A line item of a ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    /// Free-text product name, verbatim from the ticket.
    pub name: String,
    /// Business product code. Unique in storage; first write wins.
    pub id: String,
    /// Unit price.
    pub price: f64,
}

impl Product {
    /// Create a new product.
    #[must_use]
    pub fn new(name: impl Into<String>, id: impl Into<String>, price: f64) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            price,
        }
    }
}

/// A parsed order ticket.
///
/// Sign and range of the amounts are not checked here; the validator decides
/// whether the ticket is admissible.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    /// Order identifier from the first header line.
    pub order_id: String,
    /// VAT amount.
    pub vat: f64,
    /// Declared order total.
    pub total: f64,
    /// Products in source line order. May be empty.
    pub products: Vec<Product>,
}
