use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{DealId, JobId, OrderId, PaymentReference, ProductId, SubOrderId, UserId};
use domain::{
    CartSnapshot, Deal, DealAnalytics, DealRedemption, DeliveryStatus, FulfillmentStatus,
    InventoryError, InventoryRecord, Money, Order, OrderItem, PaymentMethod, StockDecrement,
    StockLevel, SubOrder, lock_order,
};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::dead_letter::{DeadLetterRecord, NewDeadLetter};
use crate::repository::{
    CartStore, CommitOutcome, DealAccountant, DeadLetterStore, InsertOutcome, InventoryLedger,
    OrderRepository, RedemptionOutcome, RedemptionReport, StoreHealth,
};
use crate::{Result, StoreError};

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("{column} out of range: {value}")))
}

fn to_u64(value: i64, column: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("{column} out of range: {value}")))
}

fn clamp_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn parse<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse().map_err(StoreError::InvalidData)
}

const ORDER_COLUMNS: &str = "id, order_number, user_id, payment_reference, payment_method, \
     total_amount, status, hold_reason, created_at";

const DEAD_LETTER_COLUMNS: &str = "id, job_id, payment_reference, failure_class, reason, \
     attempts, payload, first_recorded_at, last_recorded_at, occurrences";

/// PostgreSQL-backed fulfillment store.
#[derive(Clone)]
pub struct PostgresFulfillmentStore {
    pool: PgPool,
}

impl PostgresFulfillmentStore {
    /// Creates a new PostgreSQL fulfillment store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn load_order(conn: &mut PgConnection, row: PgRow) -> Result<Order> {
        let id: Uuid = row.try_get("id")?;
        let sub_rows = sqlx::query(
            r#"
            SELECT id, store_id, items, subtotal, shipping_method, shipping_cost, delivery_status
            FROM sub_orders
            WHERE order_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

        let sub_orders = sub_rows
            .into_iter()
            .map(Self::row_to_sub_order)
            .collect::<Result<Vec<_>>>()?;

        let status: String = row.try_get("status")?;
        Ok(Order {
            id: OrderId::from_uuid(id),
            order_number: row.try_get("order_number")?,
            user_id: UserId::new(row.try_get::<String, _>("user_id")?),
            payment_reference: PaymentReference::new(
                row.try_get::<String, _>("payment_reference")?,
            ),
            payment_method: PaymentMethod::new(row.try_get::<String, _>("payment_method")?),
            total_amount: Money::from_cents(row.try_get("total_amount")?),
            status: parse(&status)?,
            sub_orders,
            created_at: row.try_get("created_at")?,
            hold_reason: row.try_get("hold_reason")?,
        })
    }

    fn row_to_sub_order(row: PgRow) -> Result<SubOrder> {
        let items: serde_json::Value = row.try_get("items")?;
        let items: Vec<OrderItem> = serde_json::from_value(items)?;
        let delivery_status: String = row.try_get("delivery_status")?;

        Ok(SubOrder {
            id: SubOrderId::from_uuid(row.try_get("id")?),
            store_id: row.try_get::<String, _>("store_id")?.into(),
            items,
            subtotal: Money::from_cents(row.try_get("subtotal")?),
            shipping_method: row.try_get("shipping_method")?,
            shipping_cost: Money::from_cents(row.try_get("shipping_cost")?),
            delivery_status: parse(&delivery_status)?,
        })
    }

    async fn order_by_id(conn: &mut PgConnection, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::load_order(conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn order_by_payment_reference(
        conn: &mut PgConnection,
        payment_reference: &PaymentReference,
    ) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE payment_reference = $1"
        ))
        .bind(payment_reference.as_str())
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::load_order(conn, row).await?)),
            None => Ok(None),
        }
    }

    /// Applies one conditional decrement inside the caller's transaction.
    async fn apply_decrement(conn: &mut PgConnection, d: &StockDecrement) -> Result<()> {
        let quantity = i64::from(d.quantity);
        let insufficient = |available: i64| InventoryError::InsufficientStock {
            product_id: d.product_id.clone(),
            size: d.size.clone(),
            requested: d.quantity,
            available: clamp_u32(available),
        };

        let kind: Option<String> =
            sqlx::query_scalar("SELECT stock_kind FROM product_inventory WHERE product_id = $1")
                .bind(d.product_id.as_str())
                .fetch_optional(&mut *conn)
                .await?;

        match kind.as_deref() {
            None => Err(InventoryError::UnknownProduct {
                product_id: d.product_id.clone(),
            }
            .into()),
            Some("unlimited") => Ok(()),
            Some("flat") => {
                let updated = sqlx::query(
                    r#"
                    UPDATE product_inventory
                    SET quantity = quantity - $2, updated_at = NOW()
                    WHERE product_id = $1 AND quantity >= $2
                    "#,
                )
                .bind(d.product_id.as_str())
                .bind(quantity)
                .execute(&mut *conn)
                .await?
                .rows_affected();

                if updated == 0 {
                    let available: Option<i64> = sqlx::query_scalar(
                        "SELECT quantity FROM product_inventory WHERE product_id = $1",
                    )
                    .bind(d.product_id.as_str())
                    .fetch_one(&mut *conn)
                    .await?;
                    return Err(insufficient(available.unwrap_or(0)).into());
                }
                Ok(())
            }
            Some("sized") => {
                let size = d.size.as_deref().ok_or_else(|| InventoryError::SizeRequired {
                    product_id: d.product_id.clone(),
                })?;

                let updated = sqlx::query(
                    r#"
                    UPDATE product_sizes
                    SET quantity = quantity - $3
                    WHERE product_id = $1 AND size = $2 AND quantity >= $3
                    "#,
                )
                .bind(d.product_id.as_str())
                .bind(size)
                .bind(quantity)
                .execute(&mut *conn)
                .await?
                .rows_affected();

                if updated == 0 {
                    let available: Option<i64> = sqlx::query_scalar(
                        "SELECT quantity FROM product_sizes WHERE product_id = $1 AND size = $2",
                    )
                    .bind(d.product_id.as_str())
                    .bind(size)
                    .fetch_optional(&mut *conn)
                    .await?;

                    return Err(match available {
                        Some(available) => insufficient(available),
                        None => InventoryError::UnknownSize {
                            product_id: d.product_id.clone(),
                            size: size.to_string(),
                        },
                    }
                    .into());
                }
                Ok(())
            }
            Some(other) => Err(StoreError::InvalidData(format!(
                "unknown stock kind {other} for product {}",
                d.product_id
            ))),
        }
    }

    fn row_to_deal(deal_id: DealId, row: &PgRow) -> Result<Deal> {
        let flash_sale_remaining: Option<i64> = row.try_get("flash_sale_remaining")?;
        let per_user_limit: Option<i64> = row.try_get("per_user_limit")?;

        Ok(Deal {
            deal_id,
            usage_count: to_u64(row.try_get("usage_count")?, "usage_count")?,
            flash_sale_remaining: flash_sale_remaining
                .map(|v| to_u32(v, "flash_sale_remaining"))
                .transpose()?,
            per_user_limit: per_user_limit.map(clamp_u32),
            analytics: DealAnalytics {
                redemption_count: to_u64(row.try_get("redemption_count")?, "redemption_count")?,
                total_discount_amount: Money::from_cents(row.try_get("total_discount_amount")?),
                // Kept in deal_unique_users; loaded separately when needed.
                unique_users_used: Vec::new(),
                first_redemption_date: row.try_get("first_redemption_date")?,
                last_redemption_date: row.try_get("last_redemption_date")?,
            },
        })
    }

    fn row_to_dead_letter(row: PgRow) -> Result<DeadLetterRecord> {
        let job_id: Option<Uuid> = row.try_get("job_id")?;
        let payment_reference: Option<String> = row.try_get("payment_reference")?;

        Ok(DeadLetterRecord {
            id: row.try_get("id")?,
            job_id: job_id.map(JobId::from_uuid),
            payment_reference: payment_reference.map(PaymentReference::new),
            failure_class: row.try_get("failure_class")?,
            reason: row.try_get("reason")?,
            attempts: to_u32(row.try_get("attempts")?, "attempts")?,
            payload: row.try_get("payload")?,
            first_recorded_at: row.try_get("first_recorded_at")?,
            last_recorded_at: row.try_get("last_recorded_at")?,
            occurrences: to_u32(row.try_get("occurrences")?, "occurrences")?,
        })
    }
}

#[async_trait]
impl OrderRepository for PostgresFulfillmentStore {
    async fn find_by_payment_reference(
        &self,
        payment_reference: &PaymentReference,
    ) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        Self::order_by_payment_reference(&mut conn, payment_reference).await
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        Self::order_by_id(&mut conn, order_id).await
    }

    #[tracing::instrument(skip(self, order), fields(order_id = %order.id, payment_reference = %order.payment_reference))]
    async fn insert_order(&self, order: &Order) -> Result<InsertOutcome> {
        let mut tx = self.pool.begin().await?;

        // A concurrent insert for the same payment reference blocks here
        // until it commits, then this one does nothing.
        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, user_id, payment_reference, payment_method,
                                total_amount, status, hold_reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(&order.order_number)
        .bind(order.user_id.as_str())
        .bind(order.payment_reference.as_str())
        .bind(order.payment_method.as_str())
        .bind(order.total_amount.cents())
        .bind(order.status.as_str())
        .bind(order.hold_reason.as_deref())
        .bind(order.created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !inserted {
            tx.rollback().await?;
            let mut conn = self.pool.acquire().await?;
            let existing = match Self::order_by_payment_reference(&mut conn, &order.payment_reference)
                .await?
            {
                Some(existing) => existing,
                None => Self::order_by_id(&mut conn, order.id).await?.ok_or_else(|| {
                    StoreError::InvalidData(format!(
                        "order {} conflicts with an unreadable row",
                        order.id
                    ))
                })?,
            };
            tracing::debug!("order already exists");
            return Ok(InsertOutcome::Existing(existing));
        }

        for (position, sub_order) in (0i64..).zip(order.sub_orders.iter()) {
            sqlx::query(
                r#"
                INSERT INTO sub_orders (id, order_id, position, store_id, items, subtotal,
                                        shipping_method, shipping_cost, delivery_status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(sub_order.id.as_uuid())
            .bind(order.id.as_uuid())
            .bind(position)
            .bind(sub_order.store_id.as_str())
            .bind(serde_json::to_value(&sub_order.items)?)
            .bind(sub_order.subtotal.cents())
            .bind(sub_order.shipping_method.as_deref())
            .bind(sub_order.shipping_cost.cents())
            .bind(sub_order.delivery_status.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(InsertOutcome::Inserted(order.clone()))
    }

    async fn set_fulfillment_status(
        &self,
        order_id: OrderId,
        status: FulfillmentStatus,
        hold_reason: Option<&str>,
    ) -> Result<Order> {
        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, hold_reason = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'Pending'
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(status.as_str())
        .bind(hold_reason)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let mut conn = self.pool.acquire().await?;
        let order = Self::order_by_id(&mut conn, order_id)
            .await?
            .ok_or(StoreError::OrderNotFound(order_id))?;

        if updated == 0 && order.status != status {
            return Err(StoreError::StatusConflict {
                expected: FulfillmentStatus::Pending.to_string(),
                actual: order.status.to_string(),
            });
        }
        Ok(order)
    }

    async fn update_delivery_status(
        &self,
        order_id: OrderId,
        sub_order_id: SubOrderId,
        from: DeliveryStatus,
        to: DeliveryStatus,
    ) -> Result<Order> {
        let updated = sqlx::query(
            r#"
            UPDATE sub_orders
            SET delivery_status = $4, updated_at = NOW()
            WHERE order_id = $1 AND id = $2 AND delivery_status = $3
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(sub_order_id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        let mut conn = self.pool.acquire().await?;
        let order = Self::order_by_id(&mut conn, order_id)
            .await?
            .ok_or(StoreError::OrderNotFound(order_id))?;

        if updated == 0 {
            let sub_order = order
                .sub_order(sub_order_id)
                .ok_or(StoreError::SubOrderNotFound {
                    order_id,
                    sub_order_id,
                })?;
            return Err(StoreError::StatusConflict {
                expected: from.to_string(),
                actual: sub_order.delivery_status.to_string(),
            });
        }
        Ok(order)
    }
}

#[async_trait]
impl InventoryLedger for PostgresFulfillmentStore {
    #[tracing::instrument(skip(self, decrements), fields(order_id = %order_id, lines = decrements.len()))]
    async fn commit_decrements(
        &self,
        order_id: OrderId,
        decrements: &[StockDecrement],
    ) -> Result<CommitOutcome> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "INSERT INTO inventory_commits (order_id) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(order_id.as_uuid())
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !claimed {
            tx.rollback().await?;
            tracing::debug!("stock movements already committed");
            return Ok(CommitOutcome::AlreadyApplied);
        }

        let mut ordered = decrements.to_vec();
        lock_order(&mut ordered);

        // Any error drops the transaction, rolling back every line.
        for d in &ordered {
            Self::apply_decrement(&mut *tx, d).await?;

            sqlx::query(
                r#"
                INSERT INTO inventory_movements (order_id, line_no, product_id, size, quantity)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(order_id.as_uuid())
            .bind(i64::from(d.line_no))
            .bind(d.product_id.as_str())
            .bind(d.size.as_deref())
            .bind(i64::from(d.quantity))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(CommitOutcome::Applied)
    }

    async fn inventory(&self, product_id: &ProductId) -> Result<Option<InventoryRecord>> {
        let row = sqlx::query(
            "SELECT product_type, stock_kind, quantity FROM product_inventory WHERE product_id = $1",
        )
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let product_type: String = row.try_get("product_type")?;
        let stock_kind: String = row.try_get("stock_kind")?;
        let quantity: Option<i64> = row.try_get("quantity")?;

        let stock = match stock_kind.as_str() {
            "unlimited" => StockLevel::Unlimited,
            "flat" => StockLevel::Flat {
                quantity: to_u32(quantity.unwrap_or(0), "quantity")?,
            },
            "sized" => {
                let rows = sqlx::query(
                    "SELECT size, quantity FROM product_sizes WHERE product_id = $1 ORDER BY size",
                )
                .bind(product_id.as_str())
                .fetch_all(&self.pool)
                .await?;

                let mut sizes = BTreeMap::new();
                for row in rows {
                    let size: String = row.try_get("size")?;
                    sizes.insert(size, to_u32(row.try_get("quantity")?, "quantity")?);
                }
                StockLevel::Sized { sizes }
            }
            other => {
                return Err(StoreError::InvalidData(format!("unknown stock kind {other}")));
            }
        };

        Ok(Some(InventoryRecord {
            product_id: product_id.clone(),
            product_type: parse(&product_type)?,
            stock,
        }))
    }

    async fn upsert_inventory(&self, record: &InventoryRecord) -> Result<()> {
        let (kind, quantity) = match &record.stock {
            StockLevel::Flat { quantity } => ("flat", Some(i64::from(*quantity))),
            StockLevel::Sized { .. } => ("sized", None),
            StockLevel::Unlimited => ("unlimited", None),
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO product_inventory (product_id, product_type, stock_kind, quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (product_id) DO UPDATE
            SET product_type = EXCLUDED.product_type,
                stock_kind = EXCLUDED.stock_kind,
                quantity = EXCLUDED.quantity,
                updated_at = NOW()
            "#,
        )
        .bind(record.product_id.as_str())
        .bind(record.product_type.as_str())
        .bind(kind)
        .bind(quantity)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM product_sizes WHERE product_id = $1")
            .bind(record.product_id.as_str())
            .execute(&mut *tx)
            .await?;

        if let StockLevel::Sized { sizes } = &record.stock {
            for (size, quantity) in sizes {
                sqlx::query(
                    "INSERT INTO product_sizes (product_id, size, quantity) VALUES ($1, $2, $3)",
                )
                .bind(record.product_id.as_str())
                .bind(size)
                .bind(i64::from(*quantity))
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl DealAccountant for PostgresFulfillmentStore {
    #[tracing::instrument(skip(self, redemptions), fields(order_id = %order_id, user_id = %user_id))]
    async fn record_redemptions(
        &self,
        order_id: OrderId,
        user_id: &UserId,
        redemptions: &[DealRedemption],
        at: DateTime<Utc>,
    ) -> Result<Vec<RedemptionReport>> {
        let mut ordered: Vec<&DealRedemption> = redemptions.iter().collect();
        ordered.sort_by(|a, b| a.deal_id.cmp(&b.deal_id).then(a.line_no.cmp(&b.line_no)));

        let mut tx = self.pool.begin().await?;
        let mut reports = Vec::with_capacity(ordered.len());

        for redemption in ordered {
            let report = |outcome| RedemptionReport {
                deal_id: redemption.deal_id.clone(),
                line_no: redemption.line_no,
                outcome,
            };

            let row = sqlx::query(
                r#"
                SELECT usage_count, flash_sale_remaining, per_user_limit, redemption_count,
                       total_discount_amount, first_redemption_date, last_redemption_date
                FROM deals
                WHERE deal_id = $1
                FOR UPDATE
                "#,
            )
            .bind(redemption.deal_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;

            let Some(row) = row else {
                reports.push(report(RedemptionOutcome::UnknownDeal));
                continue;
            };

            let inserted = sqlx::query(
                r#"
                INSERT INTO deal_redemptions (deal_id, order_id, line_no, user_id, quantity,
                                              discount, redeemed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(redemption.deal_id.as_str())
            .bind(order_id.as_uuid())
            .bind(i64::from(redemption.line_no))
            .bind(user_id.as_str())
            .bind(i64::from(redemption.quantity))
            .bind(redemption.discount.cents())
            .bind(at)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                == 1;

            if !inserted {
                reports.push(report(RedemptionOutcome::AlreadyRecorded));
                continue;
            }

            let prior: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM deal_redemptions
                WHERE deal_id = $1 AND user_id = $2 AND NOT (order_id = $3 AND line_no = $4)
                "#,
            )
            .bind(redemption.deal_id.as_str())
            .bind(user_id.as_str())
            .bind(order_id.as_uuid())
            .bind(i64::from(redemption.line_no))
            .fetch_one(&mut *tx)
            .await?;

            let mut deal = Self::row_to_deal(redemption.deal_id.clone(), &row)?;
            let notes = deal.record_redemption(user_id, redemption, clamp_u32(prior), at);

            sqlx::query(
                r#"
                UPDATE deals
                SET usage_count = $2,
                    flash_sale_remaining = $3,
                    redemption_count = $4,
                    total_discount_amount = $5,
                    first_redemption_date = $6,
                    last_redemption_date = $7
                WHERE deal_id = $1
                "#,
            )
            .bind(deal.deal_id.as_str())
            .bind(i64::try_from(deal.usage_count).unwrap_or(i64::MAX))
            .bind(deal.flash_sale_remaining.map(i64::from))
            .bind(i64::try_from(deal.analytics.redemption_count).unwrap_or(i64::MAX))
            .bind(deal.analytics.total_discount_amount.cents())
            .bind(deal.analytics.first_redemption_date)
            .bind(deal.analytics.last_redemption_date)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO deal_unique_users (deal_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(deal.deal_id.as_str())
            .bind(user_id.as_str())
            .execute(&mut *tx)
            .await?;

            reports.push(report(RedemptionOutcome::Recorded(notes)));
        }

        tx.commit().await?;
        Ok(reports)
    }

    async fn deal(&self, deal_id: &DealId) -> Result<Option<Deal>> {
        let row = sqlx::query(
            r#"
            SELECT usage_count, flash_sale_remaining, per_user_limit, redemption_count,
                   total_discount_amount, first_redemption_date, last_redemption_date
            FROM deals
            WHERE deal_id = $1
            "#,
        )
        .bind(deal_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut deal = Self::row_to_deal(deal_id.clone(), &row)?;

        let users: Vec<String> = sqlx::query_scalar(
            "SELECT user_id FROM deal_unique_users WHERE deal_id = $1 ORDER BY position",
        )
        .bind(deal_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        deal.analytics.unique_users_used = users.into_iter().map(UserId::new).collect();

        Ok(Some(deal))
    }

    async fn upsert_deal(&self, deal: &Deal) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO deals (deal_id, usage_count, flash_sale_remaining, per_user_limit,
                               redemption_count, total_discount_amount,
                               first_redemption_date, last_redemption_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (deal_id) DO UPDATE
            SET usage_count = EXCLUDED.usage_count,
                flash_sale_remaining = EXCLUDED.flash_sale_remaining,
                per_user_limit = EXCLUDED.per_user_limit,
                redemption_count = EXCLUDED.redemption_count,
                total_discount_amount = EXCLUDED.total_discount_amount,
                first_redemption_date = EXCLUDED.first_redemption_date,
                last_redemption_date = EXCLUDED.last_redemption_date
            "#,
        )
        .bind(deal.deal_id.as_str())
        .bind(i64::try_from(deal.usage_count).unwrap_or(i64::MAX))
        .bind(deal.flash_sale_remaining.map(i64::from))
        .bind(deal.per_user_limit.map(i64::from))
        .bind(i64::try_from(deal.analytics.redemption_count).unwrap_or(i64::MAX))
        .bind(deal.analytics.total_discount_amount.cents())
        .bind(deal.analytics.first_redemption_date)
        .bind(deal.analytics.last_redemption_date)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM deal_unique_users WHERE deal_id = $1")
            .bind(deal.deal_id.as_str())
            .execute(&mut *tx)
            .await?;

        for user in &deal.analytics.unique_users_used {
            sqlx::query("INSERT INTO deal_unique_users (deal_id, user_id) VALUES ($1, $2)")
                .bind(deal.deal_id.as_str())
                .bind(user.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CartStore for PostgresFulfillmentStore {
    async fn save_cart(&self, user_id: &UserId, cart: &CartSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO carts (user_id, lines) VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET lines = EXCLUDED.lines, updated_at = NOW()
            "#,
        )
        .bind(user_id.as_str())
        .bind(serde_json::to_value(cart)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_cart(&self, user_id: &UserId) -> Result<CartSnapshot> {
        let lines: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT lines FROM carts WHERE user_id = $1")
                .bind(user_id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        match lines {
            Some(lines) => Ok(serde_json::from_value(lines)?),
            None => Ok(CartSnapshot::default()),
        }
    }

    async fn clear_cart(&self, user_id: &UserId) -> Result<()> {
        sqlx::query("DELETE FROM carts WHERE user_id = $1")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DeadLetterStore for PostgresFulfillmentStore {
    async fn record_dead_letter(&self, entry: NewDeadLetter) -> Result<DeadLetterRecord> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO dead_letters (id, job_id, payment_reference, failure_class, reason,
                                      attempts, payload, first_recorded_at, last_recorded_at,
                                      occurrences)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, 1)
            ON CONFLICT (id) DO UPDATE
            SET failure_class = EXCLUDED.failure_class,
                reason = EXCLUDED.reason,
                attempts = GREATEST(dead_letters.attempts, EXCLUDED.attempts),
                payload = EXCLUDED.payload,
                payment_reference = COALESCE(dead_letters.payment_reference, EXCLUDED.payment_reference),
                last_recorded_at = EXCLUDED.last_recorded_at,
                occurrences = dead_letters.occurrences + 1
            RETURNING {DEAD_LETTER_COLUMNS}
            "#
        ))
        .bind(entry.record_id())
        .bind(entry.job_id.map(|id| id.as_uuid()))
        .bind(entry.payment_reference.as_ref().map(|r| r.as_str()))
        .bind(&entry.failure_class)
        .bind(&entry.reason)
        .bind(i64::from(entry.attempts))
        .bind(&entry.payload)
        .bind(entry.recorded_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_dead_letter(row)
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters ORDER BY last_recorded_at DESC, id LIMIT $1"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_dead_letter).collect()
    }

    async fn dead_letter(&self, id: Uuid) -> Result<Option<DeadLetterRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_dead_letter).transpose()
    }
}

#[async_trait]
impl StoreHealth for PostgresFulfillmentStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
