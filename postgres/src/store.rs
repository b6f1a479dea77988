//! `PostgreSQL` implementation of [`TicketStore`].
//!
//! Expects the following tables to exist:
//!
//! ```sql
//! CREATE TABLE tickets (
//!     id SERIAL PRIMARY KEY,
//!     order_id VARCHAR(255) NOT NULL,
//!     vat NUMERIC NOT NULL,
//!     total NUMERIC NOT NULL,
//!     valid BOOLEAN NOT NULL,
//!     ticket_text TEXT NOT NULL,
//!     created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
//! );
//!
//! CREATE TABLE products (
//!     id SERIAL PRIMARY KEY,
//!     name VARCHAR(255) NOT NULL,
//!     product_id VARCHAR(255) NOT NULL UNIQUE,
//!     price NUMERIC NOT NULL,
//!     created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
//! );
//! ```

use chrono::NaiveDateTime;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use ticket_ingest_core::{Product, StoreError, StoreReceipt, TicketRecord, TicketStore};

/// A row of the `tickets` table.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TicketRow {
    /// Surrogate key.
    pub id: i64,
    /// Order id from the ticket header.
    pub order_id: String,
    /// VAT amount.
    pub vat: f64,
    /// Declared total.
    pub total: f64,
    /// Validator verdict.
    pub valid: bool,
    /// Original ticket text.
    pub ticket_text: String,
    /// Insertion time.
    pub created_at: Option<NaiveDateTime>,
}

/// A row of the `products` table.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ProductRow {
    /// Surrogate key.
    pub id: i64,
    /// Name from the first ticket that introduced the product.
    pub name: String,
    /// Unique business id.
    pub product_id: String,
    /// Price from the first ticket that introduced the product.
    pub price: f64,
    /// Insertion time.
    pub created_at: Option<NaiveDateTime>,
}

/// `PostgreSQL`-backed ticket store.
///
/// Each [`save_ticket`](TicketStore::save_ticket) call runs in its own
/// transaction: the ticket row plus, for valid tickets, one
/// `INSERT ... ON CONFLICT (product_id) DO NOTHING` per product. Any failure
/// rolls the whole transaction back.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use ticket_ingest_core::PersistenceGateway;
/// use ticket_ingest_postgres::PostgresTicketStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresTicketStore::connect("postgres://localhost/tickets", 8).await?;
/// let gateway = PersistenceGateway::new(Arc::new(store));
///
/// gateway
///     .store_ticket("OrderId: A1\nVAT: 0\nTotal: 5\n\nproduct\nApple,P1,5")
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresTicketStore {
    pool: PgPool,
}

impl PostgresTicketStore {
    /// Connect with a pool of up to `max_connections` connections.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if no connection can be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect to database: {e}")))?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// All ticket rows recorded for `order_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn tickets_for_order(&self, order_id: &str) -> Result<Vec<TicketRow>, StoreError> {
        sqlx::query_as::<_, TicketRow>(
            r"
            SELECT id::int8 AS id, order_id, vat::float8 AS vat, total::float8 AS total,
                   valid, ticket_text, created_at
            FROM tickets
            WHERE order_id = $1
            ORDER BY id
            ",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify("Failed to load tickets", &e))
    }

    /// The product with business id `product_id`, if any ticket introduced it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn product(&self, product_id: &str) -> Result<Option<ProductRow>, StoreError> {
        sqlx::query_as::<_, ProductRow>(
            r"
            SELECT id::int8 AS id, name, product_id, price::float8 AS price, created_at
            FROM products
            WHERE product_id = $1
            ",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify("Failed to load product", &e))
    }

    async fn write(&self, record: TicketRecord<'_>) -> Result<StoreReceipt, StoreError> {
        let started = Instant::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to start transaction: {e}")))?;

        let (ticket_id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO tickets (order_id, vat, total, valid, ticket_text)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id::int8
            ",
        )
        .bind(&record.ticket.order_id)
        .bind(record.ticket.vat)
        .bind(record.ticket.total)
        .bind(record.valid)
        .bind(record.raw)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| classify("Failed to insert ticket", &e))?;

        let mut products_inserted = 0;
        if record.valid {
            for product in insertion_order(&record.ticket.products) {
                let result = sqlx::query(
                    r"
                    INSERT INTO products (name, product_id, price)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (product_id) DO NOTHING
                    ",
                )
                .bind(&product.name)
                .bind(&product.id)
                .bind(product.price)
                .execute(&mut *tx)
                .await
                .map_err(|e| classify("Failed to insert product", &e))?;

                products_inserted += result.rows_affected();
            }
        }

        tx.commit()
            .await
            .map_err(|e| classify("Failed to commit transaction", &e))?;

        metrics::histogram!("ticket_ingest_store_write_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::debug!(
            ticket_id,
            order_id = %record.ticket.order_id,
            products_inserted,
            "Ticket transaction committed"
        );

        Ok(StoreReceipt {
            ticket_id,
            products_inserted,
        })
    }
}

impl TicketStore for PostgresTicketStore {
    fn save_ticket<'a>(
        &'a self,
        record: TicketRecord<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<StoreReceipt, StoreError>> + Send + 'a>> {
        Box::pin(self.write(record))
    }
}

/// Products ordered by id with repeats removed, keeping the first line of
/// each id.
///
/// Concurrent transactions lock new product ids in the same order, so two
/// tickets sharing ids in opposite line order cannot deadlock.
fn insertion_order(products: &[Product]) -> Vec<&Product> {
    let mut ordered: Vec<&Product> = products.iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));
    ordered.dedup_by(|later, earlier| later.id == earlier.id);
    ordered
}

/// Connectivity problems are [`StoreError::Unavailable`]; everything else
/// is a failed write.
fn classify(context: &str, error: &sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("{context}: {error}"))
        }
        _ => StoreError::Write(format!("{context}: {error}")),
    }
}
