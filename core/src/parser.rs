//! Line-oriented ticket parser.
//!
//! # Format
//!
//! ```text
//! OrderId: A1          <- line 0, "<label>: <order id>"
//! VAT: 2.00            <- line 1, "<label>: <vat>"
//! Total: 12.00         <- line 2, "<label>: <total>"
//!                      <- line 3, blank separator
//! product              <- line 4, header marker
//! Apple,P1,5.00        <- line 5.., "<name>,<product id>,<price>"
//! Bread,P2,7.00
//! ```
//!
//! The parser only checks that the ticket is lexically well formed. Lines 3
//! and 4 are not inspected here, and totals are not reconciled; that is the
//! job of [`is_valid`](crate::validator::is_valid).

use crate::error::{AmountField, ParseError};
use crate::ticket::{Product, Ticket};

/// Index of the first product line.
pub(crate) const FIRST_PRODUCT_LINE: usize = 5;

/// Parse raw ticket text into a [`Ticket`].
///
/// Header values are everything after the first `:` of lines 0 to 2, trimmed.
/// Product lines are split on `,` into exactly three fields; name and id are
/// kept verbatim, the price is trimmed. Empty product lines are skipped and do
/// not advance the product index.
///
/// # Errors
///
/// - [`ParseError::MalformedHeader`] if a header line is missing or has no `:`
/// - [`ParseError::InvalidAmount`] if VAT, Total or a price is not a finite decimal
/// - [`ParseError::MalformedProductLine`] if a product line has other than 3 fields
pub fn parse_ticket(raw: &str) -> Result<Ticket, ParseError> {
    let lines: Vec<&str> = raw.split('\n').collect();

    let order_id = header_value(&lines, 0)?.to_string();
    let vat = parse_amount(header_value(&lines, 1)?, AmountField::Vat)?;
    let total = parse_amount(header_value(&lines, 2)?, AmountField::Total)?;

    let mut products = Vec::new();
    for line in lines.iter().skip(FIRST_PRODUCT_LINE) {
        if line.is_empty() {
            continue;
        }

        let index = products.len();
        let fields: Vec<&str> = line.split(',').collect();
        let [name, id, price] = fields.as_slice() else {
            return Err(ParseError::MalformedProductLine {
                index,
                fields: fields.len(),
            });
        };

        let price = parse_amount(price, AmountField::Price { index })?;
        products.push(Product::new(*name, *id, price));
    }

    Ok(Ticket {
        order_id,
        vat,
        total,
        products,
    })
}

fn header_value<'a>(lines: &[&'a str], line: usize) -> Result<&'a str, ParseError> {
    lines
        .get(line)
        .and_then(|text| text.split_once(':'))
        .map(|(_, value)| value.trim())
        .ok_or(ParseError::MalformedHeader { line })
}

/// Parse a decimal amount, rejecting non-finite values such as `inf` or `NaN`.
pub(crate) fn parse_amount(text: &str, field: AmountField) -> Result<f64, ParseError> {
    let text = text.trim();
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ParseError::InvalidAmount {
            field,
            value: text.to_string(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    const VALID: &str = "OrderId: A1\nVAT: 2.00\nTotal: 12.00\n\nproduct\nApple,P1,5.00\nBread,P2,7.00";

    #[test]
    fn parses_header_and_products() {
        let ticket = parse_ticket(VALID).expect("ticket should parse");

        assert_eq!(ticket.order_id, "A1");
        assert_eq!(ticket.vat, 2.0);
        assert_eq!(ticket.total, 12.0);
        assert_eq!(
            ticket.products,
            vec![Product::new("Apple", "P1", 5.0), Product::new("Bread", "P2", 7.0)]
        );
    }

    #[test]
    fn header_value_is_everything_after_first_colon() {
        let ticket = parse_ticket("Order:  A:1 \nVAT:0\nTotal:0").unwrap();
        assert_eq!(ticket.order_id, "A:1");
        assert!(ticket.products.is_empty());
    }

    #[test]
    fn missing_colon_is_malformed_header() {
        let err = parse_ticket("OrderId A1\nVAT: 1\nTotal: 1").unwrap_err();
        assert_eq!(err, ParseError::MalformedHeader { line: 0 });

        let err = parse_ticket("OrderId: A1\nVAT 1\nTotal: 1").unwrap_err();
        assert_eq!(err, ParseError::MalformedHeader { line: 1 });
    }

    #[test]
    fn missing_header_lines_are_malformed() {
        let err = parse_ticket("OrderId: A1\nVAT: 1").unwrap_err();
        assert_eq!(err, ParseError::MalformedHeader { line: 2 });

        let err = parse_ticket("").unwrap_err();
        assert_eq!(err, ParseError::MalformedHeader { line: 0 });
    }

    #[test]
    fn non_numeric_vat_and_total_name_the_field() {
        let err = parse_ticket("OrderId: A1\nVAT: two\nTotal: 1").unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidAmount {
                field: AmountField::Vat,
                value: "two".to_string()
            }
        );

        let err = parse_ticket("OrderId: A1\nVAT: 2\nTotal: NaN").unwrap_err();
        assert!(matches!(
            err,
            ParseError::InvalidAmount {
                field: AmountField::Total,
                ..
            }
        ));
    }

    #[test]
    fn negative_amounts_are_left_to_the_validator() {
        let ticket = parse_ticket("OrderId: A1\nVAT: -2\nTotal: -1").unwrap();
        assert_eq!(ticket.vat, -2.0);
        assert_eq!(ticket.total, -1.0);
    }

    #[test]
    fn product_line_with_two_or_four_fields_fails() {
        let two = "OrderId: A1\nVAT: 0\nTotal: 5\n\nproduct\nApple,5.00";
        assert_eq!(
            parse_ticket(two).unwrap_err(),
            ParseError::MalformedProductLine { index: 0, fields: 2 }
        );

        let four = "OrderId: A1\nVAT: 0\nTotal: 5\n\nproduct\nApple,P1,5.00\nBread,P2,x,7.00";
        assert_eq!(
            parse_ticket(four).unwrap_err(),
            ParseError::MalformedProductLine { index: 1, fields: 4 }
        );
    }

    #[test]
    fn empty_product_lines_are_skipped_without_advancing_index() {
        let raw = "OrderId: A1\nVAT: 0\nTotal: 5\n\nproduct\n\nApple,P1,5.00\n\nbroken\n";
        assert_eq!(
            parse_ticket(raw).unwrap_err(),
            ParseError::MalformedProductLine { index: 1, fields: 1 }
        );
    }

    #[test]
    fn non_numeric_price_fails_with_index() {
        let raw = "OrderId: A1\nVAT: 0\nTotal: 5\n\nproduct\nApple,P1,5\nBread,P2,cheap";
        assert_eq!(
            parse_ticket(raw).unwrap_err(),
            ParseError::InvalidAmount {
                field: AmountField::Price { index: 1 },
                value: "cheap".to_string()
            }
        );
    }

    #[test]
    fn name_and_id_are_kept_verbatim() {
        let raw = "OrderId: A1\nVAT: 0\nTotal: 5\n\nproduct\n Apple , P1 , 5.00 ";
        let ticket = parse_ticket(raw).unwrap();
        assert_eq!(ticket.products[0], Product::new(" Apple ", " P1 ", 5.0));
    }

    #[test]
    fn parsing_is_deterministic() {
        assert_eq!(parse_ticket(VALID), parse_ticket(VALID));
        let broken = "OrderId: A1\nVAT: x\nTotal: 1";
        assert_eq!(parse_ticket(broken), parse_ticket(broken));
    }
}
