//! Postgres adapter (sqlx).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgExecutor, PgPool};
use sqlx::{Postgres, Transaction};

use super::retry::{with_retry, with_retry_once, RetryPolicy};
use super::{RepoError, RepoResult, SlipFilter, SlipRepository, SlipTransaction};
use crate::domain::aggregates::{
    AddressRecord, AddressSource, Cart, CartLine, DailySales, NewOrder, NewSlip, OrderLine, OrderLineDetail,
    PaymentSlip, PaymentSlipItem, SlipStatus, SlipTotals, SnapshotItem, StockChange,
};
use crate::domain::value_objects::{CartId, Money, OrderId, ProductId, Quantity, SlipId, UserId, AMOUNT_EPSILON};

#[derive(Clone, Debug)]
pub struct PgSlipRepository {
    pool: PgPool,
    retry: RetryPolicy,
}

pub struct PgSlipTx {
    tx: Transaction<'static, Postgres>,
}

impl PgSlipRepository {
    pub fn new(pool: PgPool, retry: RetryPolicy) -> Self { Self { pool, retry } }
}

#[derive(sqlx::FromRow)]
struct SlipRow {
    id: i64, cart_id: Option<i64>, user_id: i64, amount: Decimal, slip_path: String, status: String,
    stock_deducted: bool, shipping_address: Option<String>,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>, deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<SlipRow> for PaymentSlip {
    type Error = RepoError;
    fn try_from(r: SlipRow) -> Result<Self, Self::Error> {
        let status: SlipStatus = r.status.parse().map_err(|e| RepoError::Corrupt(format!("slip {}: status {e}", r.id)))?;
        Ok(PaymentSlip {
            id: SlipId(r.id), cart_id: r.cart_id.map(CartId), user_id: UserId(r.user_id), amount: Money::new(r.amount),
            slip_path: r.slip_path, status, stock_deducted: r.stock_deducted, shipping_address: r.shipping_address,
            created_at: r.created_at, updated_at: r.updated_at, deleted_at: r.deleted_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CartLineRow { product_id: Option<i64>, title: Option<String>, cart_price: Option<Decimal>, product_price: Option<Decimal>, count: i32 }

#[derive(sqlx::FromRow)]
struct OrderLineRow { product_id: i64, title: Option<String>, count: i32, price: Decimal }

#[derive(sqlx::FromRow)]
struct SnapshotRow { id: i64, slip_id: i64, product_id: Option<i64>, title: String, price: Decimal, qty: i32 }

#[derive(sqlx::FromRow)]
struct DeductRow { deducted: i32, quantity_after: i32 }

#[derive(sqlx::FromRow)]
struct TotalsRow { slips: i64, pending: i64, approved_revenue: Decimal }

#[derive(sqlx::FromRow)]
struct DayRow { day: NaiveDate, revenue: Decimal, approved: i64 }

#[derive(sqlx::FromRow)]
struct AddressRow {
    cart_id: i64, amount: Option<Decimal>, address: String, from_slip: bool,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

const SLIP_COLUMNS: &str = "ps.id, ps.cart_id, ps.user_id, ps.amount, ps.slip_path, ps.status, ps.stock_deducted, \
    ps.shipping_address, ps.created_at, ps.updated_at, ps.deleted_at";

fn db_qty(q: Quantity) -> i32 { i32::try_from(q.value()).unwrap_or(i32::MAX) }

fn from_db_count(v: i32) -> u32 { u32::try_from(v).unwrap_or(0) }

fn from_db_total(v: i64) -> u64 { u64::try_from(v).unwrap_or(0) }

async fn fetch_cart<'e>(ex: impl PgExecutor<'e>, cart_id: CartId) -> Result<Cart, sqlx::Error> {
    let rows: Vec<CartLineRow> = sqlx::query_as(
        r#"
        SELECT ci.product_id, p.title, ci.price AS cart_price, p.price AS product_price, ci.count
        FROM cart_items ci
        LEFT JOIN products p ON p.id = ci.product_id
        WHERE ci.cart_id = $1
        ORDER BY ci.id
        "#,
    )
    .bind(cart_id)
    .fetch_all(ex)
    .await?;

    Ok(Cart::new(cart_id, rows.into_iter().map(|r| CartLine {
        product_id: r.product_id.map(ProductId),
        title: r.title,
        cart_price: r.cart_price.map(Money::new),
        product_price: r.product_price.map(Money::new),
        quantity: Quantity::new(from_db_count(r.count)),
    }).collect()))
}

async fn fetch_order_by_cart<'e>(
    ex: impl PgExecutor<'e>, user_id: UserId, cart_id: CartId, amount: Money,
) -> Result<Option<OrderId>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT id FROM orders
        WHERE ordered_by = $1 AND cart_id = $2 AND ABS(cart_total - $3) < $4
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(cart_id)
    .bind(amount.amount())
    .bind(AMOUNT_EPSILON)
    .fetch_optional(ex)
    .await
}

async fn fetch_order_by_amount<'e>(ex: impl PgExecutor<'e>, user_id: UserId, amount: Money) -> Result<Option<OrderId>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT id FROM orders
        WHERE ordered_by = $1 AND cart_id IS NULL AND ABS(cart_total - $2) < $3
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(amount.amount())
    .bind(AMOUNT_EPSILON)
    .fetch_optional(ex)
    .await
}

#[async_trait]
impl SlipRepository for PgSlipRepository {
    type Tx = PgSlipTx;

    async fn begin(&self) -> RepoResult<PgSlipTx> {
        let tx = with_retry(&self.retry, || self.pool.begin()).await?;
        Ok(PgSlipTx { tx })
    }

    async fn find_slip(&self, id: SlipId) -> RepoResult<Option<PaymentSlip>> {
        let sql = format!("SELECT {SLIP_COLUMNS} FROM payment_slips ps WHERE ps.id = $1");
        let row: Option<SlipRow> = with_retry(&self.retry, || sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool)).await?;
        row.map(PaymentSlip::try_from).transpose()
    }

    async fn list_slips(&self, filter: SlipFilter) -> RepoResult<Vec<PaymentSlip>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM payment_slips ps
            LEFT JOIN cart_addresses ca ON ca.cart_id = ps.cart_id
            WHERE ps.deleted_at IS NULL
              AND ($1::TEXT IS NULL OR ps.status = $1)
              AND ($2::BIGINT IS NULL OR ps.user_id = $2)
            ORDER BY ps.created_at DESC, ps.id DESC
            "#,
            SLIP_COLUMNS.replace("ps.shipping_address", "COALESCE(ps.shipping_address, ca.address) AS shipping_address"),
        );
        let status = filter.status.map(|s| s.as_str());
        let rows: Vec<SlipRow> = with_retry(&self.retry, || {
            sqlx::query_as(&sql).bind(status).bind(filter.user_id).fetch_all(&self.pool)
        }).await?;
        rows.into_iter().map(PaymentSlip::try_from).collect()
    }

    async fn atomic_claim_deduction_flag(&self, id: SlipId) -> RepoResult<bool> {
        let result = with_retry_once(&self.retry, || {
            sqlx::query(
                "UPDATE payment_slips SET stock_deducted = TRUE, updated_at = NOW() WHERE id = $1 AND stock_deducted = FALSE",
            )
            .bind(id)
            .execute(&self.pool)
        }).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_status(&self, id: SlipId, status: SlipStatus) -> RepoResult<bool> {
        let result = with_retry(&self.retry, || {
            sqlx::query("UPDATE payment_slips SET status = $1, updated_at = NOW() WHERE id = $2")
                .bind(status.as_str())
                .bind(id)
                .execute(&self.pool)
        }).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn deduct_product_stock(&self, product_id: ProductId, qty: Quantity) -> RepoResult<Option<StockChange>> {
        // SET expressions read the pre-update row, so LEAST sees quantity_before.
        let row: Option<DeductRow> = with_retry_once(&self.retry, || {
            sqlx::query_as(
                r#"
                WITH before AS (
                    SELECT id, quantity FROM products WHERE id = $1 FOR UPDATE
                )
                UPDATE products p
                   SET quantity   = GREATEST(p.quantity - $2, 0),
                       sold       = p.sold + LEAST($2, p.quantity),
                       updated_at = NOW()
                  FROM before b
                 WHERE p.id = b.id
                RETURNING LEAST($2, b.quantity) AS deducted, p.quantity AS quantity_after
                "#,
            )
            .bind(product_id)
            .bind(db_qty(qty))
            .fetch_optional(&self.pool)
        }).await?;

        Ok(row.map(|r| StockChange {
            product_id,
            requested: qty.value(),
            deducted: from_db_count(r.deducted),
            quantity_after: from_db_count(r.quantity_after),
        }))
    }

    async fn cart(&self, cart_id: CartId) -> RepoResult<Cart> {
        Ok(with_retry(&self.retry, || fetch_cart(&self.pool, cart_id)).await?)
    }

    async fn find_order_by_cart(&self, user_id: UserId, cart_id: CartId, amount: Money) -> RepoResult<Option<OrderId>> {
        Ok(with_retry(&self.retry, || fetch_order_by_cart(&self.pool, user_id, cart_id, amount)).await?)
    }

    async fn find_order_by_amount(&self, user_id: UserId, amount: Money) -> RepoResult<Option<OrderId>> {
        Ok(with_retry(&self.retry, || fetch_order_by_amount(&self.pool, user_id, amount)).await?)
    }

    async fn order_lines(&self, order_id: OrderId) -> RepoResult<Vec<OrderLineDetail>> {
        let rows: Vec<OrderLineRow> = with_retry(&self.retry, || {
            sqlx::query_as(
                r#"
                SELECT oi.product_id, p.title, oi.count, oi.price
                FROM order_items oi
                LEFT JOIN products p ON p.id = oi.product_id
                WHERE oi.order_id = $1
                ORDER BY oi.product_id
                "#,
            )
            .bind(order_id)
            .fetch_all(&self.pool)
        }).await?;

        Ok(rows.into_iter().map(|r| OrderLineDetail {
            line: OrderLine { product_id: ProductId(r.product_id), quantity: Quantity::new(from_db_count(r.count)), unit_price: Money::new(r.price) },
            title: r.title,
        }).collect())
    }

    async fn list_snapshot_items(&self, slip_id: SlipId) -> RepoResult<Vec<PaymentSlipItem>> {
        let rows: Vec<SnapshotRow> = with_retry(&self.retry, || {
            sqlx::query_as("SELECT id, slip_id, product_id, title, price, qty FROM payment_slip_items WHERE slip_id = $1 ORDER BY id")
                .bind(slip_id)
                .fetch_all(&self.pool)
        }).await?;

        Ok(rows.into_iter().map(|r| PaymentSlipItem {
            id: r.id,
            slip_id: SlipId(r.slip_id),
            item: SnapshotItem {
                product_id: r.product_id.map(ProductId),
                title: r.title,
                unit_price: Money::new(r.price),
                quantity: Quantity::new(from_db_count(r.qty)),
            },
        }).collect())
    }

    async fn delete_slip(&self, id: SlipId) -> RepoResult<bool> {
        let result = with_retry(&self.retry, || sqlx::query("DELETE FROM payment_slips WHERE id = $1").bind(id).execute(&self.pool)).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn soft_delete_slip(&self, id: SlipId) -> RepoResult<bool> {
        let result = with_retry(&self.retry, || {
            sqlx::query("UPDATE payment_slips SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
        }).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_cart_address(&self, user_id: UserId, cart_id: CartId, address: &str) -> RepoResult<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO cart_addresses (cart_id, address, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT (cart_id) DO UPDATE SET address = EXCLUDED.address, updated_at = NOW()
            "#,
        )
        .bind(cart_id)
        .bind(address)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            "UPDATE payment_slips SET shipping_address = $1, updated_at = NOW() WHERE cart_id = $2 AND user_id = $3 AND status = 'PENDING'",
        )
        .bind(address)
        .bind(cart_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(updated)
    }

    async fn slip_totals(&self) -> RepoResult<SlipTotals> {
        let row: TotalsRow = with_retry(&self.retry, || {
            sqlx::query_as(
                r#"
                SELECT COUNT(*) AS slips,
                       COUNT(*) FILTER (WHERE status = 'PENDING') AS pending,
                       COALESCE(SUM(amount) FILTER (WHERE status = 'APPROVED'), 0) AS approved_revenue
                FROM payment_slips
                WHERE deleted_at IS NULL
                "#,
            )
            .fetch_one(&self.pool)
        }).await?;

        Ok(SlipTotals {
            slips: from_db_total(row.slips),
            pending: from_db_total(row.pending),
            approved_revenue: Money::new(row.approved_revenue),
        })
    }

    async fn approved_sales_since(&self, since: NaiveDate) -> RepoResult<Vec<DailySales>> {
        let since = since.and_time(NaiveTime::MIN).and_utc();
        let rows: Vec<DayRow> = with_retry(&self.retry, || {
            sqlx::query_as(
                r#"
                SELECT (created_at AT TIME ZONE 'UTC')::DATE AS day, SUM(amount) AS revenue, COUNT(*) AS approved
                FROM payment_slips
                WHERE deleted_at IS NULL AND status = 'APPROVED' AND created_at >= $1
                GROUP BY day
                ORDER BY day
                "#,
            )
            .bind(since)
            .fetch_all(&self.pool)
        }).await?;

        Ok(rows.into_iter().map(|r| DailySales {
            date: r.day,
            revenue: Money::new(r.revenue),
            approved: from_db_total(r.approved),
        }).collect())
    }

    async fn address_records(&self, user_id: UserId) -> RepoResult<Vec<AddressRecord>> {
        let rows: Vec<AddressRow> = with_retry(&self.retry, || {
            sqlx::query_as(
                r#"
                (SELECT cart_id, amount, shipping_address AS address, TRUE AS from_slip, created_at, updated_at
                   FROM payment_slips
                  WHERE user_id = $1 AND deleted_at IS NULL AND cart_id IS NOT NULL
                    AND COALESCE(TRIM(shipping_address), '') <> ''
                  ORDER BY updated_at DESC
                  LIMIT 500)
                UNION ALL
                (SELECT ca.cart_id, NULL::NUMERIC, ca.address, FALSE, ca.created_at, ca.updated_at
                   FROM cart_addresses ca
                  WHERE ca.cart_id IN (
                        SELECT cart_id FROM payment_slips WHERE user_id = $1 AND deleted_at IS NULL
                        UNION
                        SELECT cart_id FROM orders WHERE ordered_by = $1)
                  ORDER BY ca.updated_at DESC
                  LIMIT 500)
                "#,
            )
            .bind(user_id)
            .fetch_all(&self.pool)
        }).await?;

        Ok(rows.into_iter().map(|r| AddressRecord {
            cart_id: CartId(r.cart_id),
            amount: r.amount.map(Money::new),
            address: r.address,
            source: if r.from_slip { AddressSource::Slip } else { AddressSource::Cart },
            created_at: r.created_at,
            updated_at: r.updated_at,
        }).collect())
    }
}

#[async_trait]
impl SlipTransaction for PgSlipTx {
    async fn cart_address(&mut self, cart_id: CartId) -> RepoResult<Option<String>> {
        Ok(sqlx::query_scalar("SELECT address FROM cart_addresses WHERE cart_id = $1")
            .bind(cart_id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn insert_slip(&mut self, slip: &NewSlip) -> RepoResult<SlipId> {
        Ok(sqlx::query_scalar(
            r#"
            INSERT INTO payment_slips
                (cart_id, user_id, amount, slip_path, status, stock_deducted, shipping_address, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'PENDING', FALSE, $5, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(slip.cart_id)
        .bind(slip.user_id)
        .bind(slip.amount.amount())
        .bind(&slip.slip_path)
        .bind(&slip.shipping_address)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn cart(&mut self, cart_id: CartId) -> RepoResult<Cart> { Ok(fetch_cart(&mut *self.tx, cart_id).await?) }

    async fn insert_snapshot_items(&mut self, slip_id: SlipId, items: &[SnapshotItem]) -> RepoResult<()> {
        for item in items {
            sqlx::query(
                "INSERT INTO payment_slip_items (slip_id, product_id, title, price, qty, created_at) VALUES ($1, $2, $3, $4, $5, NOW())",
            )
            .bind(slip_id)
            .bind(item.product_id)
            .bind(&item.title)
            .bind(item.unit_price.amount())
            .bind(db_qty(item.quantity))
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn savepoint(&mut self, name: &'static str) -> RepoResult<()> {
        sqlx::query(&format!("SAVEPOINT {name}")).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &'static str) -> RepoResult<()> {
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {name}")).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &'static str) -> RepoResult<()> {
        sqlx::query(&format!("RELEASE SAVEPOINT {name}")).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn find_order_by_cart(&mut self, user_id: UserId, cart_id: CartId, amount: Money) -> RepoResult<Option<OrderId>> {
        Ok(fetch_order_by_cart(&mut *self.tx, user_id, cart_id, amount).await?)
    }

    async fn find_order_by_amount(&mut self, user_id: UserId, amount: Money) -> RepoResult<Option<OrderId>> {
        Ok(fetch_order_by_amount(&mut *self.tx, user_id, amount).await?)
    }

    async fn link_order_to_cart(&mut self, order_id: OrderId, cart_id: CartId) -> RepoResult<()> {
        sqlx::query("UPDATE orders SET cart_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(cart_id)
            .bind(order_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn create_order(&mut self, order: &NewOrder) -> RepoResult<OrderId> {
        Ok(sqlx::query_scalar(
            r#"
            INSERT INTO orders (ordered_by, cart_id, cart_total, status, provenance_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(order.ordered_by)
        .bind(order.cart_id)
        .bind(order.total.amount())
        .bind(order.status)
        .bind(&order.provenance_id)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn replace_order_lines(&mut self, order_id: OrderId, lines: &[OrderLine]) -> RepoResult<()> {
        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *self.tx)
            .await?;

        for line in lines {
            sqlx::query("INSERT INTO order_items (order_id, product_id, count, price) VALUES ($1, $2, $3, $4)")
                .bind(order_id)
                .bind(line.product_id)
                .bind(db_qty(line.quantity))
                .bind(line.unit_price.amount())
                .execute(&mut *self.tx)
                .await?;
        }
        Ok(())
    }

    async fn commit(self) -> RepoResult<()> { Ok(self.tx.commit().await?) }

    async fn rollback(self) -> RepoResult<()> { Ok(self.tx.rollback().await?) }
}
