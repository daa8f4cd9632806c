use super::SubscriptionPlan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Fulfilled,
    Discarded,
}

/// A recorded request to upgrade that has not been paid yet.
///
/// `reference` is an opaque token handed to the payment provider; fulfillment
/// looks the intent up by it and never parses it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentIntent {
    pub reference: String,
    pub account_id: Uuid,
    pub plan: SubscriptionPlan,
    /// Expected amount in minor currency units (kobo).
    pub amount: i64,
    pub currency: String,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PaymentIntent {
    pub fn new(
        reference: String,
        account_id: Uuid,
        plan: SubscriptionPlan,
        amount: i64,
        currency: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            reference,
            account_id,
            plan,
            amount,
            currency,
            status: IntentStatus::Pending,
            created_at: now,
            resolved_at: None,
        }
    }
}

/// Money received. Written once per intent, never updated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub account_id: Uuid,
    pub intent_reference: String,
    pub subscription_record_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub provider_authorization_code: Option<String>,
    /// `YYYY-MM` bucket used by revenue reporting.
    pub billing_month: String,
    pub paid_at: DateTime<Utc>,
}

impl Payment {
    pub fn for_intent(
        intent: &PaymentIntent,
        subscription_record_id: Uuid,
        provider_authorization_code: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: intent.account_id,
            intent_reference: intent.reference.clone(),
            subscription_record_id,
            amount: intent.amount,
            currency: intent.currency.clone(),
            provider_authorization_code,
            billing_month: now.format("%Y-%m").to_string(),
            paid_at: now,
        }
    }
}
