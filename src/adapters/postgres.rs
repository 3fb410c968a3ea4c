use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::DatabaseConfig;
use crate::domain::{
    Balance, Order, OrderId, OrderNumber, OrderStatus, StatusTransition, UpdateOutcome, UserId,
    WithdrawOutcome, Withdrawal,
};
use crate::error::{LoyaltyError, Result};
use crate::persistence::{BalanceStore, OrderStore};

/// Attempts for a withdrawal that keeps losing serialization races
const MAX_SERIALIZATION_RETRIES: u32 = 5;

const ORDER_COLUMNS: &str = "id, number, user_id, status::text AS status, accrual, uploaded_at";

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a store from database configuration
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Round-trip check used by readiness probes
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL pool closed");
    }

    async fn try_withdraw(
        &self,
        user_id: UserId,
        number: &OrderNumber,
        amount: Decimal,
    ) -> Result<WithdrawOutcome> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(
            r#"
            SELECT o.id, o.user_id,
                   COALESCE(o.accrual, 0) - COALESCE(
                       (SELECT SUM(w.amount) FROM withdrawals w WHERE w.order_id = o.id), 0
                   ) AS remaining
            FROM orders o
            WHERE o.number = $1
            "#,
        )
        .bind(number.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(LoyaltyError::OrderNotFound(number.to_string()));
        };

        let order_id: i64 = row.try_get("id")?;
        let owner: i64 = row.try_get("user_id")?;
        let remaining: Decimal = row.try_get("remaining")?;

        if owner != user_id.0 {
            return Err(LoyaltyError::OrderOwnerMismatch(number.to_string()));
        }

        if remaining < amount {
            tx.rollback().await?;
            return Ok(WithdrawOutcome::Insufficient {
                available: remaining,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO withdrawals (order_id, user_id, amount, processed_at)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(order_id)
        .bind(user_id.0)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(WithdrawOutcome::Accepted)
    }
}

fn order_from_row(row: &PgRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: OrderId(row.try_get("id")?),
        number: OrderNumber::new(row.try_get::<String, _>("number")?),
        user_id: UserId(row.try_get("user_id")?),
        status: OrderStatus::try_from(status.as_str()).map_err(LoyaltyError::Internal)?,
        accrual: row.try_get("accrual")?,
        uploaded_at: row.try_get("uploaded_at")?,
    })
}

#[async_trait]
impl OrderStore for PostgresStore {
    #[instrument(skip(self, order), fields(order_number = %order.number, user_id = %order.user_id))]
    async fn create(&self, order: &Order) -> Result<(Order, bool)> {
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO orders (number, user_id, status, uploaded_at)
            VALUES ($1, $2, $3::order_status, $4)
            ON CONFLICT (number) DO NOTHING
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order.number.as_str())
        .bind(order.user_id.0)
        .bind(order.status.as_str())
        .bind(order.uploaded_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            debug!("Stored new order");
            return Ok((order_from_row(&row)?, true));
        }

        let existing = self.order_by_number(&order.number).await?.ok_or_else(|| {
            LoyaltyError::Internal(format!(
                "order {} conflicted on insert but cannot be read",
                order.number
            ))
        })?;
        debug!("Order number already taken");
        Ok((existing, false))
    }

    #[instrument(skip(self), fields(order_id = %id))]
    async fn update(
        &self,
        id: OrderId,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<UpdateOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status::text AS status FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Err(LoyaltyError::OrderNotFound(id.to_string()));
        };
        let current: String = row.try_get("status")?;
        let current = OrderStatus::try_from(current.as_str()).map_err(LoyaltyError::Internal)?;

        match current.transition_to(status) {
            StatusTransition::Unchanged => {
                debug!("Status unchanged ({}), skipping update", current);
                tx.rollback().await?;
                return Ok(UpdateOutcome::Unchanged);
            }
            StatusTransition::Descent => {
                warn!("Refusing to move order from {} to {}", current, status);
                tx.rollback().await?;
                return Err(LoyaltyError::InvalidStateTransition {
                    from: current.to_string(),
                    to: status.to_string(),
                });
            }
            StatusTransition::Advance => {}
        }

        sqlx::query(
            r#"
            UPDATE orders SET
                status = $2::order_status,
                accrual = COALESCE($3, accrual)
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(status.as_str())
        .bind(accrual)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Order moved from {} to {}", current, status);
        Ok(UpdateOutcome::Applied)
    }

    async fn orders_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY uploaded_at ASC"
        ))
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn orders_by_status(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();

        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status::text = ANY($1) ORDER BY uploaded_at ASC"
        ))
        .bind(statuses)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE number = $1"
        ))
        .bind(number.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(order_from_row).transpose()
    }
}

#[async_trait]
impl BalanceStore for PostgresStore {
    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn balance(&self, user_id: UserId) -> Result<Balance> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE((
                    SELECT SUM(accrual) FROM orders
                    WHERE user_id = $1
                      AND accrual IS NOT NULL
                      AND status IN ('INVALID', 'PROCESSED')
                ), 0) AS accrued,
                COALESCE((
                    SELECT SUM(amount) FROM withdrawals WHERE user_id = $1
                ), 0) AS withdrawn
            "#,
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(Balance::default());
        };

        let accrued: Decimal = row.try_get("accrued")?;
        let withdrawn: Decimal = row.try_get("withdrawn")?;
        Ok(Balance::derive(accrued, withdrawn))
    }

    #[instrument(skip(self), fields(user_id = %user_id, order_number = %number))]
    async fn withdraw(
        &self,
        user_id: UserId,
        number: &OrderNumber,
        amount: Decimal,
    ) -> Result<WithdrawOutcome> {
        let mut attempt = 1;
        loop {
            match self.try_withdraw(user_id, number, amount).await {
                Err(e) if e.is_serialization_failure() && attempt < MAX_SERIALIZATION_RETRIES => {
                    debug!("Serialization conflict on attempt {}, retrying", attempt);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn withdrawals_by_user(&self, user_id: UserId) -> Result<Vec<Withdrawal>> {
        let rows = sqlx::query(
            r#"
            SELECT w.id, w.order_id, o.number, w.user_id, w.amount, w.processed_at
            FROM withdrawals w
            JOIN orders o ON o.id = w.order_id
            WHERE w.user_id = $1
            ORDER BY w.processed_at ASC
            "#,
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Withdrawal {
                    id: row.try_get("id")?,
                    order_id: OrderId(row.try_get("order_id")?),
                    number: OrderNumber::new(row.try_get::<String, _>("number")?),
                    user_id: UserId(row.try_get("user_id")?),
                    amount: row.try_get("amount")?,
                    processed_at: row.try_get("processed_at")?,
                })
            })
            .collect()
    }
}
