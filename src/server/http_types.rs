use crate::application::{Fulfillment, UpgradeCheckout};
use crate::domain::{Account, Payment, SubscriptionRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Serialize, ToSchema)]
pub(super) struct HealthResponse {
    pub(super) status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) error: Option<String>,
}

#[derive(Deserialize, Validate, ToSchema)]
pub(super) struct CreateAccountRequest {
    #[validate(email)]
    #[schema(example = "ada@example.com")]
    pub(super) email: String,
    #[schema(example = "user")]
    pub(super) role: Option<String>,
}

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub(super) struct InitializePaymentParams {
    /// `monthly` or `yearly`
    pub(super) plan: String,
    /// Target account; only admins may set it to someone else.
    pub(super) user_id: Option<Uuid>,
}

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub(super) struct PaginationParams {
    #[serde(default = "default_limit")]
    #[param(default = 100, maximum = 1000)]
    pub(super) limit: i64,
    #[serde(default)]
    #[param(default = 0)]
    pub(super) offset: i64,
}

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub(super) struct StatusFilterParams {
    /// `free_trial`/`trial`, `active`, `expired` or `cancelled`
    pub(super) status: String,
    #[serde(default = "default_limit")]
    #[param(default = 100, maximum = 1000)]
    pub(super) limit: i64,
    #[serde(default)]
    #[param(default = 0)]
    pub(super) offset: i64,
}

pub(super) fn default_limit() -> i64 {
    100
}

#[derive(Serialize, ToSchema)]
pub(super) struct AccountResponse {
    pub(super) id: Uuid,
    pub(super) email: String,
    pub(super) role: String,
    pub(super) created_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            email: account.email,
            role: account.role.to_string(),
            created_at: account.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct RegisteredAccountResponse {
    pub(super) account: AccountResponse,
    pub(super) subscription: SubscriptionResponse,
}

#[derive(Serialize, ToSchema)]
pub(super) struct SubscriptionResponse {
    pub(super) id: Uuid,
    pub(super) account_id: Uuid,
    #[schema(example = "monthly")]
    pub(super) plan: String,
    #[schema(example = "active")]
    pub(super) status: String,
    pub(super) is_trial: bool,
    pub(super) is_current: bool,
    pub(super) start_date: DateTime<Utc>,
    pub(super) end_date: DateTime<Utc>,
    pub(super) provider_customer_code: Option<String>,
    pub(super) provider_subscription_code: Option<String>,
    pub(super) created_at: DateTime<Utc>,
}

impl From<SubscriptionRecord> for SubscriptionResponse {
    fn from(record: SubscriptionRecord) -> Self {
        Self {
            id: record.id,
            account_id: record.account_id,
            plan: record.plan.to_string(),
            status: record.status.to_string(),
            is_trial: record.is_trial,
            is_current: record.is_current,
            start_date: record.start_date,
            end_date: record.end_date,
            provider_customer_code: record.provider_customer_code,
            provider_subscription_code: record.provider_subscription_code,
            created_at: record.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct SubscriptionStatusResponse {
    pub(super) account_id: Uuid,
    pub(super) status: String,
    /// Whether the account currently has access to paid features.
    pub(super) entitled: bool,
    pub(super) end_date: DateTime<Utc>,
}

impl From<SubscriptionRecord> for SubscriptionStatusResponse {
    fn from(record: SubscriptionRecord) -> Self {
        Self {
            account_id: record.account_id,
            status: record.status.to_string(),
            entitled: record.status.is_entitled(),
            end_date: record.end_date,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct CheckoutResponse {
    pub(super) reference: String,
    pub(super) authorization_url: String,
    pub(super) access_code: String,
    pub(super) plan: String,
    /// Minor currency units (kobo).
    pub(super) amount: i64,
    pub(super) currency: String,
}

impl From<UpgradeCheckout> for CheckoutResponse {
    fn from(checkout: UpgradeCheckout) -> Self {
        Self {
            reference: checkout.intent.reference,
            authorization_url: checkout.authorization_url,
            access_code: checkout.access_code,
            plan: checkout.intent.plan.to_string(),
            amount: checkout.intent.amount,
            currency: checkout.intent.currency,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct PaymentResponse {
    pub(super) id: Uuid,
    pub(super) account_id: Uuid,
    pub(super) reference: String,
    pub(super) subscription_id: Uuid,
    pub(super) amount: i64,
    pub(super) currency: String,
    #[schema(example = "2026-03")]
    pub(super) billing_month: String,
    pub(super) paid_at: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id,
            account_id: payment.account_id,
            reference: payment.intent_reference,
            subscription_id: payment.subscription_record_id,
            amount: payment.amount,
            currency: payment.currency,
            billing_month: payment.billing_month,
            paid_at: payment.paid_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct FulfillmentResponse {
    pub(super) subscription: SubscriptionResponse,
    pub(super) payment: PaymentResponse,
    /// False when this reference had already been applied.
    pub(super) newly_applied: bool,
}

impl From<Fulfillment> for FulfillmentResponse {
    fn from(fulfillment: Fulfillment) -> Self {
        Self {
            subscription: fulfillment.record.into(),
            payment: fulfillment.payment.into(),
            newly_applied: fulfillment.newly_applied,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct SweepResponse {
    pub(super) expired: usize,
}
