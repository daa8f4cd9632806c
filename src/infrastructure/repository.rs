use crate::domain::{
    Account, Payment, PaymentIntent, Role, SubscriptionPlan, SubscriptionRecord,
    SubscriptionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool, Row};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// A concurrent writer got there first (unique index or stale current record).
    #[error("Conflict: {0}")]
    Conflict(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountRepository: Send + Sync {
    #[must_use]
    async fn create(&self, account: &Account) -> Result<(), RepositoryError>;
    /// Insert the account and its first subscription record in one transaction.
    /// A taken email is `Conflict` and leaves nothing behind.
    #[must_use]
    async fn create_with_trial(
        &self,
        account: &Account,
        trial: &SubscriptionRecord,
    ) -> Result<(), RepositoryError>;
    #[must_use]
    async fn get_by_id(&self, id: Uuid) -> Result<Account, RepositoryError>;
    #[must_use]
    async fn get_by_email(&self, email: &str) -> Result<Account, RepositoryError>;
    #[must_use]
    async fn count(&self) -> Result<i64, RepositoryError>;
    /// Accounts whose current subscription record has `status`.
    #[must_use]
    async fn list_by_subscription_status(
        &self,
        status: SubscriptionStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Account>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    #[must_use]
    async fn get_current(
        &self,
        account_id: Uuid,
    ) -> Result<Option<SubscriptionRecord>, RepositoryError>;
    #[must_use]
    async fn get_by_id(&self, id: Uuid) -> Result<SubscriptionRecord, RepositoryError>;
    /// Retire `previous_id` and append `next` as the current record, atomically.
    ///
    /// Returns `Conflict` when `previous_id` is no longer current, or when
    /// `previous_id` is `None` and the account already has a current record.
    #[must_use]
    async fn supersede(
        &self,
        previous_id: Option<Uuid>,
        next: &SubscriptionRecord,
    ) -> Result<(), RepositoryError>;
    /// Every record for the account, newest first.
    #[must_use]
    async fn list_history(&self, account_id: Uuid)
        -> Result<Vec<SubscriptionRecord>, RepositoryError>;
    #[must_use]
    async fn find_current_by_subscription_code(
        &self,
        subscription_code: &str,
    ) -> Result<Option<SubscriptionRecord>, RepositoryError>;
    /// Current trial/active records whose end date is before `now`.
    #[must_use]
    async fn list_lapsed(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SubscriptionRecord>, RepositoryError>;
    #[must_use]
    async fn count_current_by_status(
        &self,
        status: SubscriptionStatus,
    ) -> Result<i64, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentIntentRepository: Send + Sync {
    #[must_use]
    async fn create(&self, intent: &PaymentIntent) -> Result<(), RepositoryError>;
    #[must_use]
    async fn get_by_reference(&self, reference: &str) -> Result<PaymentIntent, RepositoryError>;
    /// Only pending intents can be discarded; fulfilled ones are left alone.
    #[must_use]
    async fn mark_discarded(
        &self,
        reference: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

/// Everything a single fulfillment writes, committed as one unit.
#[derive(Debug, Clone)]
pub struct FulfillmentCommit {
    pub payment: Payment,
    pub previous_record_id: Option<Uuid>,
    pub next_record: SubscriptionRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FulfillmentOutcome {
    Applied,
    /// Another writer already recorded a payment for this intent.
    AlreadyFulfilled(Payment),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyRevenue {
    pub month: String,
    pub amount: i64,
    pub payments: i64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    #[must_use]
    async fn get_by_intent_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payment>, RepositoryError>;
    /// Insert the payment, swap the current record and mark the intent fulfilled.
    #[must_use]
    async fn commit_fulfillment(
        &self,
        commit: &FulfillmentCommit,
    ) -> Result<FulfillmentOutcome, RepositoryError>;
    #[must_use]
    async fn list_by_account(&self, account_id: Uuid) -> Result<Vec<Payment>, RepositoryError>;
    #[must_use]
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Payment>, RepositoryError>;
    #[must_use]
    async fn total_revenue(&self) -> Result<i64, RepositoryError>;
    /// Revenue grouped by billing month, oldest month first.
    #[must_use]
    async fn monthly_revenue(&self) -> Result<Vec<MonthlyRevenue>, RepositoryError>;
}

pub struct PostgresAccountRepository {
    pool: PgPool,
}

impl PostgresAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PostgresAccountRepository {
    async fn create(&self, account: &Account) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        insert_account(&mut conn, account).await
    }

    async fn create_with_trial(
        &self,
        account: &Account,
        trial: &SubscriptionRecord,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        insert_account(&mut tx, account).await?;
        insert_record(&mut tx, trial).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Account, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, email, role, created_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(format!("Account {}", id)),
            _ => RepositoryError::DatabaseError(e),
        })?;

        row_to_account(&row)
    }

    async fn get_by_email(&self, email: &str) -> Result<Account, RepositoryError> {
        let email = email.trim().to_lowercase();
        let row = sqlx::query(
            r#"
            SELECT id, email, role, created_at
            FROM accounts
            WHERE email = $1
            "#,
        )
        .bind(&email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(format!("Account {}", email)),
            _ => RepositoryError::DatabaseError(e),
        })?;

        row_to_account(&row)
    }

    async fn count(&self) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn list_by_subscription_status(
        &self,
        status: SubscriptionStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Account>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.email, a.role, a.created_at
            FROM accounts a
            JOIN subscriptions s ON s.account_id = a.id AND s.is_current
            WHERE s.status = $1
            ORDER BY a.created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status.to_string())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_account).collect()
    }
}

fn row_to_account(row: &sqlx::postgres::PgRow) -> Result<Account, RepositoryError> {
    let role_str: String = row.try_get("role")?;

    Ok(Account {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        role: Role::from_str(&role_str)
            .map_err(|_| RepositoryError::InvalidData(format!("Unknown role: {}", role_str)))?,
        created_at: row.try_get("created_at")?,
    })
}

pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const RECORD_COLUMNS: &str = "id, account_id, plan, status, is_trial, start_date, end_date, \
     provider_customer_code, provider_subscription_code, is_current, created_at";

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn get_current(
        &self,
        account_id: Uuid,
    ) -> Result<Option<SubscriptionRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE account_id = $1 AND is_current",
            RECORD_COLUMNS
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn get_by_id(&self, id: Uuid) -> Result<SubscriptionRecord, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE id = $1",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(format!("Subscription {}", id)),
            _ => RepositoryError::DatabaseError(e),
        })?;

        row_to_record(&row)
    }

    async fn supersede(
        &self,
        previous_id: Option<Uuid>,
        next: &SubscriptionRecord,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        lock_account(&mut tx, next.account_id).await?;
        if let Some(previous_id) = previous_id {
            retire_record(&mut tx, previous_id).await?;
        }
        insert_record(&mut tx, next).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn list_history(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<SubscriptionRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE account_id = $1 ORDER BY created_at DESC",
            RECORD_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn find_current_by_subscription_code(
        &self,
        subscription_code: &str,
    ) -> Result<Option<SubscriptionRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE provider_subscription_code = $1 AND is_current",
            RECORD_COLUMNS
        ))
        .bind(subscription_code)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn list_lapsed(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SubscriptionRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE is_current
              AND status IN ('trial', 'active')
              AND end_date < $1
            ORDER BY end_date ASC
            LIMIT $2
            "#,
            RECORD_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn count_current_by_status(
        &self,
        status: SubscriptionStatus,
    ) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM subscriptions WHERE is_current AND status = $1",
        )
        .bind(status.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

/// Serialize writers for one account across instances until the transaction ends.
pub(crate) async fn lock_account(
    conn: &mut PgConnection,
    account_id: Uuid,
) -> Result<(), RepositoryError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
        .bind(account_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub(crate) async fn retire_record(
    conn: &mut PgConnection,
    record_id: Uuid,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        r#"
        UPDATE subscriptions
        SET is_current = FALSE
        WHERE id = $1 AND is_current
        "#,
    )
    .bind(record_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::Conflict(format!(
            "Subscription {} is no longer current",
            record_id
        )));
    }

    Ok(())
}

async fn insert_account(conn: &mut PgConnection, account: &Account) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO accounts (id, email, role, created_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(account.id)
    .bind(&account.email)
    .bind(account.role.to_string())
    .bind(account.created_at)
    .execute(&mut *conn)
    .await
    .map_err(map_write_error)?;

    Ok(())
}

pub(crate) async fn insert_record(
    conn: &mut PgConnection,
    record: &SubscriptionRecord,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO subscriptions (id, account_id, plan, status, is_trial, start_date, end_date,
                                   provider_customer_code, provider_subscription_code,
                                   is_current, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(record.id)
    .bind(record.account_id)
    .bind(record.plan.to_string())
    .bind(record.status.to_string())
    .bind(record.is_trial)
    .bind(record.start_date)
    .bind(record.end_date)
    .bind(&record.provider_customer_code)
    .bind(&record.provider_subscription_code)
    .bind(record.is_current)
    .bind(record.created_at)
    .execute(&mut *conn)
    .await
    .map_err(map_write_error)?;

    Ok(())
}

pub(crate) fn map_write_error(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(db.message().to_string())
        }
        _ => RepositoryError::DatabaseError(e),
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<SubscriptionRecord, RepositoryError> {
    let plan_str: String = row.try_get("plan")?;
    let status_str: String = row.try_get("status")?;

    Ok(SubscriptionRecord {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        plan: SubscriptionPlan::from_str(&plan_str)
            .map_err(|_| RepositoryError::InvalidData(format!("Unknown plan: {}", plan_str)))?,
        status: SubscriptionStatus::from_str(&status_str).map_err(|_| {
            RepositoryError::InvalidData(format!("Unknown status: {}", status_str))
        })?,
        is_trial: row.try_get("is_trial")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        provider_customer_code: row.try_get("provider_customer_code")?,
        provider_subscription_code: row.try_get("provider_subscription_code")?,
        is_current: row.try_get("is_current")?,
        created_at: row.try_get("created_at")?,
    })
}
