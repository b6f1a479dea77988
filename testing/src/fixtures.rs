//! Ticket text fixtures.

/// Builds raw ticket text in the line format the pipeline ingests.
///
/// Amounts are kept as text so tests can exercise exact formatting, including
/// values that do not parse.
///
/// # Example
///
/// ```
/// use ticket_ingest_testing::TicketTextBuilder;
///
/// let raw = TicketTextBuilder::new("A1")
///     .vat("2.00")
///     .total("12.00")
///     .product("Apple", "P1", "5.00")
///     .product("Bread", "P2", "7.00")
///     .build();
///
/// assert_eq!(
///     raw,
///     "OrderId: A1\nVAT: 2.00\nTotal: 12.00\n\nproduct\nApple,P1,5.00\nBread,P2,7.00"
/// );
/// ```
#[derive(Debug, Clone)]
pub struct TicketTextBuilder {
    order_id: String,
    vat: String,
    total: String,
    lines: Vec<String>,
}

impl TicketTextBuilder {
    /// Start a ticket for `order_id` with zero VAT and total.
    #[must_use]
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            vat: "0".to_string(),
            total: "0".to_string(),
            lines: Vec::new(),
        }
    }

    /// Set the VAT text.
    #[must_use]
    pub fn vat(mut self, vat: impl Into<String>) -> Self {
        self.vat = vat.into();
        self
    }

    /// Set the declared total text.
    #[must_use]
    pub fn total(mut self, total: impl Into<String>) -> Self {
        self.total = total.into();
        self
    }

    /// Append a well-formed product line.
    #[must_use]
    pub fn product(mut self, name: &str, id: &str, price: &str) -> Self {
        self.lines.push(format!("{name},{id},{price}"));
        self
    }

    /// Append an arbitrary line to the product section.
    #[must_use]
    pub fn raw_line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    /// Render the ticket text.
    #[must_use]
    pub fn build(&self) -> String {
        let mut text = format!(
            "OrderId: {}\nVAT: {}\nTotal: {}\n\nproduct",
            self.order_id, self.vat, self.total
        );
        for line in &self.lines {
            text.push('\n');
            text.push_str(line);
        }
        text
    }
}

/// The well-formed, valid example ticket: order `A1`, two products summing to 12.00.
#[must_use]
pub fn valid_ticket() -> String {
    TicketTextBuilder::new("A1")
        .vat("2.00")
        .total("12.00")
        .product("Apple", "P1", "5.00")
        .product("Bread", "P2", "7.00")
        .build()
}

/// The example ticket with a declared total that does not match its products.
#[must_use]
pub fn mismatched_ticket() -> String {
    TicketTextBuilder::new("A1")
        .vat("2.00")
        .total("11.00")
        .product("Apple", "P1", "5.00")
        .product("Bread", "P2", "7.00")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_without_products_ends_at_marker() {
        assert_eq!(
            TicketTextBuilder::new("X").build(),
            "OrderId: X\nVAT: 0\nTotal: 0\n\nproduct"
        );
    }

    #[test]
    fn raw_lines_are_appended_verbatim() {
        let raw = TicketTextBuilder::new("X").raw_line("a,b").build();
        assert!(raw.ends_with("product\na,b"));
    }
}
