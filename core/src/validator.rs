//! Structural and arithmetic admissibility check over raw ticket text.
//!
//! A ticket can parse cleanly and still be invalid, e.g. when the product
//! prices do not add up to the declared total. The check is safe to run on
//! arbitrary untrusted text: every failure, including missing lines, is
//! reported as `false`.
//!
//! # Exact equality
//!
//! The running sum of prices is compared to the declared total with `==` on
//! `f64`. Tickets whose prices are not exactly representable (for example
//! `0.10 + 0.20` against `0.30`) are judged invalid. This is the established
//! contract of the pipeline and is kept as is; it is a known precision
//! fragility, not an oversight.

use crate::error::AmountField;
use crate::parser::{FIRST_PRODUCT_LINE, parse_amount};

/// Literal header marker expected at line 4.
pub const PRODUCT_MARKER: &str = "product";

/// Returns `true` if the ticket text is structurally complete and its product
/// prices sum exactly to the declared total.
///
/// Checks, short-circuiting on the first failure:
///
/// 1. at least three header lines are present
/// 2. line 3 is blank
/// 3. line 4 starts with `product` (case-sensitive)
/// 4. the sum of prices from line 5 on equals the value after `": "` on line 2
///
/// Product lines that do not have exactly three fields or whose price is not a
/// number are skipped; they neither count toward the sum nor invalidate the
/// ticket on their own.
#[must_use]
pub fn is_valid(raw: &str) -> bool {
    let lines: Vec<&str> = raw.split('\n').collect();

    if lines.len() < 3 {
        return false;
    }

    if !lines.get(3).is_some_and(|line| line.trim().is_empty()) {
        return false;
    }

    if !lines.get(4).is_some_and(|line| line.starts_with(PRODUCT_MARKER)) {
        return false;
    }

    totals_match(&lines)
}

#[allow(clippy::float_cmp)] // Exact equality is the contract, see module docs
fn totals_match(lines: &[&str]) -> bool {
    let Some(declared) = lines[2]
        .split(": ")
        .nth(1)
        .and_then(|value| parse_amount(value, AmountField::Total).ok())
    else {
        return false;
    };

    let mut sum = 0.0_f64;
    for (index, line) in lines.iter().skip(FIRST_PRODUCT_LINE).enumerate() {
        let fields: Vec<&str> = line.split(',').collect();
        let [_, _, price] = fields.as_slice() else {
            continue;
        };
        if let Ok(price) = parse_amount(price, AmountField::Price { index }) {
            sum += price;
        }
    }

    sum == declared
}
