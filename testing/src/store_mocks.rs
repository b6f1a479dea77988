//! In-memory ticket store.
//!
//! Provides [`InMemoryTicketStore`], a [`TicketStore`] with the same
//! all-or-nothing and first-writer-wins semantics as the Postgres store, plus
//! knobs for injecting latency and failures.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already panicked

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use ticket_ingest_core::store::{StoreReceipt, TicketRecord, TicketStore};
use ticket_ingest_core::StoreError;

/// A stored ticket row.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketRow {
    /// Row id, assigned sequentially from 1.
    pub id: i64,
    /// Order id from the header.
    pub order_id: String,
    /// VAT amount.
    pub vat: f64,
    /// Declared total.
    pub total: f64,
    /// Validator verdict.
    pub valid: bool,
    /// Original ticket text.
    pub ticket_text: String,
}

/// A stored product row.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRow {
    /// Product name from the first ticket that introduced it.
    pub name: String,
    /// Unique business id.
    pub product_id: String,
    /// Price from the first ticket that introduced it.
    pub price: f64,
}

#[derive(Default)]
struct Tables {
    tickets: Vec<TicketRow>,
    products: Vec<ProductRow>,
}

#[derive(Default)]
struct StoreInner {
    tables: Mutex<Tables>,
    write_delay: Mutex<Option<Duration>>,
    write_failures: AtomicUsize,
    unavailable: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// In-memory ticket store for fast, deterministic tests.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use ticket_ingest_core::PersistenceGateway;
/// use ticket_ingest_testing::InMemoryTicketStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryTicketStore::new();
/// let gateway = PersistenceGateway::new(Arc::new(store.clone()));
///
/// gateway
///     .store_ticket("OrderId: A1\nVAT: 0\nTotal: 5\n\nproduct\nApple,P1,5")
///     .await?;
///
/// assert_eq!(store.tickets().len(), 1);
/// assert_eq!(store.products().len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryTicketStore {
    inner: Arc<StoreInner>,
}

impl InMemoryTicketStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every write by `delay` before it commits.
    #[must_use]
    pub fn with_write_delay(self, delay: Duration) -> Self {
        *self.inner.write_delay.lock().unwrap() = Some(delay);
        self
    }

    /// Make the next `count` writes fail with [`StoreError::Write`].
    pub fn fail_next_writes(&self, count: usize) {
        self.inner.write_failures.store(count, Ordering::SeqCst);
    }

    /// Make writes fail with [`StoreError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// All ticket rows in insertion order.
    #[must_use]
    pub fn tickets(&self) -> Vec<TicketRow> {
        self.inner.tables.lock().unwrap().tickets.clone()
    }

    /// All product rows in insertion order.
    #[must_use]
    pub fn products(&self) -> Vec<ProductRow> {
        self.inner.tables.lock().unwrap().products.clone()
    }

    /// Look up a product by its business id.
    #[must_use]
    pub fn product(&self, product_id: &str) -> Option<ProductRow> {
        self.inner
            .tables
            .lock()
            .unwrap()
            .products
            .iter()
            .find(|p| p.product_id == product_id)
            .cloned()
    }

    /// Highest number of writes observed in flight at the same time.
    #[must_use]
    pub fn max_concurrent_writes(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    fn commit(&self, record: TicketRecord<'_>) -> StoreReceipt {
        let mut tables = self.inner.tables.lock().unwrap();

        #[allow(clippy::cast_possible_wrap)] // Test tables stay tiny
        let ticket_id = tables.tickets.len() as i64 + 1;
        tables.tickets.push(TicketRow {
            id: ticket_id,
            order_id: record.ticket.order_id.clone(),
            vat: record.ticket.vat,
            total: record.ticket.total,
            valid: record.valid,
            ticket_text: record.raw.to_string(),
        });

        let mut products_inserted = 0;
        if record.valid {
            for product in &record.ticket.products {
                if tables.products.iter().any(|p| p.product_id == product.id) {
                    continue;
                }
                tables.products.push(ProductRow {
                    name: product.name.clone(),
                    product_id: product.id.clone(),
                    price: product.price,
                });
                products_inserted += 1;
            }
        }

        StoreReceipt {
            ticket_id,
            products_inserted,
        }
    }
}

/// Tracks one in-flight write, also when the write future is dropped.
struct InFlight<'a>(&'a StoreInner);

impl<'a> InFlight<'a> {
    fn enter(inner: &'a StoreInner) -> Self {
        let current = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_in_flight.fetch_max(current, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TicketStore for InMemoryTicketStore {
    fn save_ticket<'a>(
        &'a self,
        record: TicketRecord<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<StoreReceipt, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let _in_flight = InFlight::enter(&self.inner);

            let delay = *self.inner.write_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if self.inner.unavailable.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("simulated store outage".to_string()));
            }

            let failing = self
                .inner
                .write_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(StoreError::Write("simulated write failure".to_string()));
            }

            Ok(self.commit(record))
        })
    }
}
