use crate::domain::{IntentStatus, Payment, PaymentIntent, SubscriptionPlan};
use crate::infrastructure::repository::{insert_record, lock_account, map_write_error, retire_record};
use crate::infrastructure::{
    FulfillmentCommit, FulfillmentOutcome, MonthlyRevenue, PaymentIntentRepository,
    PaymentRepository, RepositoryError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

pub struct PostgresPaymentIntentRepository {
    pool: PgPool,
}

impl PostgresPaymentIntentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentIntentRepository for PostgresPaymentIntentRepository {
    async fn create(&self, intent: &PaymentIntent) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO payment_intents (reference, account_id, plan, amount, currency, status, created_at, resolved_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&intent.reference)
        .bind(intent.account_id)
        .bind(intent.plan.to_string())
        .bind(intent.amount)
        .bind(&intent.currency)
        .bind(intent.status.to_string())
        .bind(intent.created_at)
        .bind(intent.resolved_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(())
    }

    async fn get_by_reference(&self, reference: &str) -> Result<PaymentIntent, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT reference, account_id, plan, amount, currency, status, created_at, resolved_at
            FROM payment_intents
            WHERE reference = $1
            "#,
        )
        .bind(reference)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                RepositoryError::NotFound(format!("Payment intent {}", reference))
            }
            _ => RepositoryError::DatabaseError(e),
        })?;

        row_to_intent(&row)
    }

    async fn mark_discarded(
        &self,
        reference: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE payment_intents
            SET status = 'discarded', resolved_at = $2
            WHERE reference = $1 AND status = 'pending'
            "#,
        )
        .bind(reference)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_intent(row: &sqlx::postgres::PgRow) -> Result<PaymentIntent, RepositoryError> {
    let plan_str: String = row.try_get("plan")?;
    let status_str: String = row.try_get("status")?;

    Ok(PaymentIntent {
        reference: row.try_get("reference")?,
        account_id: row.try_get("account_id")?,
        plan: SubscriptionPlan::from_str(&plan_str)
            .map_err(|_| RepositoryError::InvalidData(format!("Unknown plan: {}", plan_str)))?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        status: IntentStatus::from_str(&status_str).map_err(|_| {
            RepositoryError::InvalidData(format!("Unknown intent status: {}", status_str))
        })?,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

pub struct PostgresPaymentRepository {
    pool: PgPool,
}

impl PostgresPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const PAYMENT_COLUMNS: &str = "id, account_id, intent_reference, subscription_record_id, amount, \
     currency, provider_authorization_code, billing_month, paid_at";

#[async_trait]
impl PaymentRepository for PostgresPaymentRepository {
    async fn get_by_intent_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payment>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE intent_reference = $1",
            PAYMENT_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_payment).transpose()
    }

    async fn commit_fulfillment(
        &self,
        commit: &FulfillmentCommit,
    ) -> Result<FulfillmentOutcome, RepositoryError> {
        let payment = &commit.payment;
        let mut tx = self.pool.begin().await?;
        lock_account(&mut tx, payment.account_id).await?;

        // The unique index on intent_reference is the idempotency guard.
        let inserted = sqlx::query(
            r#"
            INSERT INTO payments (id, account_id, intent_reference, subscription_record_id, amount,
                                  currency, provider_authorization_code, billing_month, paid_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (intent_reference) DO NOTHING
            "#,
        )
        .bind(payment.id)
        .bind(payment.account_id)
        .bind(&payment.intent_reference)
        .bind(payment.subscription_record_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.provider_authorization_code)
        .bind(&payment.billing_month)
        .bind(payment.paid_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            debug!(reference = %payment.intent_reference, "Payment already recorded");
            let existing = self
                .get_by_intent_reference(&payment.intent_reference)
                .await?
                .ok_or_else(|| {
                    RepositoryError::NotFound(format!("Payment {}", payment.intent_reference))
                })?;
            return Ok(FulfillmentOutcome::AlreadyFulfilled(existing));
        }

        if let Some(previous_id) = commit.previous_record_id {
            retire_record(&mut tx, previous_id).await?;
        }
        insert_record(&mut tx, &commit.next_record).await?;

        sqlx::query(
            r#"
            UPDATE payment_intents
            SET status = 'fulfilled', resolved_at = $2
            WHERE reference = $1
            "#,
        )
        .bind(&payment.intent_reference)
        .bind(payment.paid_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(FulfillmentOutcome::Applied)
    }

    async fn list_by_account(&self, account_id: Uuid) -> Result<Vec<Payment>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE account_id = $1 ORDER BY paid_at DESC",
            PAYMENT_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_payment).collect()
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Payment>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM payments ORDER BY paid_at DESC LIMIT $1 OFFSET $2",
            PAYMENT_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_payment).collect()
    }

    async fn total_revenue(&self) -> Result<i64, RepositoryError> {
        let total: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(amount), 0)::BIGINT FROM payments")
            .fetch_one(&self.pool)
            .await?;

        Ok(total)
    }

    async fn monthly_revenue(&self) -> Result<Vec<MonthlyRevenue>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT billing_month, SUM(amount)::BIGINT AS amount, COUNT(*) AS payments
            FROM payments
            GROUP BY billing_month
            ORDER BY billing_month ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok::<_, RepositoryError>(MonthlyRevenue {
                    month: row.try_get("billing_month")?,
                    amount: row.try_get("amount")?,
                    payments: row.try_get("payments")?,
                })
            })
            .collect()
    }
}

fn row_to_payment(row: &sqlx::postgres::PgRow) -> Result<Payment, RepositoryError> {
    Ok(Payment {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        intent_reference: row.try_get("intent_reference")?,
        subscription_record_id: row.try_get("subscription_record_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        provider_authorization_code: row.try_get("provider_authorization_code")?,
        billing_month: row.try_get("billing_month")?,
        paid_at: row.try_get("paid_at")?,
    })
}
