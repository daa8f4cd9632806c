//! Subscription records and the transitions between them.
//!
//! Records are append-only: every transition produces a successor record and
//! the ledger retires the predecessor in the same database transaction. The
//! functions here are pure; persistence and locking live in the ledger.
//!
//! | From                      | Trigger                | To          |
//! |---------------------------|------------------------|-------------|
//! | (none)                    | account created        | `Trial`     |
//! | `Trial` / `Active`        | end_date passed        | `Expired`   |
//! | any                       | verified payment       | `Active`    |
//! | `Trial` / `Active`        | cancel                 | `Cancelled` |
//! | any                       | admin force-activate   | `Active`    |
//! | any                       | admin force-deactivate | `Cancelled` |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionPlan {
    Free,
    Monthly,
    Yearly,
}

impl SubscriptionPlan {
    /// Plans that can be bought through the payment provider.
    pub fn is_purchasable(self) -> bool {
        matches!(self, SubscriptionPlan::Monthly | SubscriptionPlan::Yearly)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    /// Statuses that grant access to paid features until end_date.
    pub fn is_entitled(self) -> bool {
        matches!(self, SubscriptionStatus::Trial | SubscriptionStatus::Active)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Cannot move subscription from {from} to {to}")]
    NotAllowed {
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    },
}

/// Identifiers the payment provider assigns once a customer has paid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIds {
    pub customer_code: Option<String>,
    pub subscription_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub plan: SubscriptionPlan,
    pub status: SubscriptionStatus,
    pub is_trial: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub provider_customer_code: Option<String>,
    pub provider_subscription_code: Option<String>,
    pub is_current: bool,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    pub fn trial(account_id: Uuid, now: DateTime<Utc>, end_date: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            plan: SubscriptionPlan::Free,
            status: SubscriptionStatus::Trial,
            is_trial: true,
            start_date: now,
            end_date,
            provider_customer_code: None,
            provider_subscription_code: None,
            is_current: true,
            created_at: now,
        }
    }

    /// A paid activation. `previous` is the account's current record, if any.
    pub fn activated(
        previous: Option<&SubscriptionRecord>,
        account_id: Uuid,
        plan: SubscriptionPlan,
        candidate_end: DateTime<Utc>,
        ids: ProviderIds,
        now: DateTime<Utc>,
    ) -> Self {
        let inherited = previous.cloned().map(|p| ProviderIds {
            customer_code: p.provider_customer_code,
            subscription_code: p.provider_subscription_code,
        });
        let inherited = inherited.unwrap_or_default();

        Self {
            id: Uuid::new_v4(),
            account_id,
            plan,
            status: SubscriptionStatus::Active,
            is_trial: false,
            start_date: now,
            end_date: monotonic_end(previous, candidate_end),
            provider_customer_code: ids.customer_code.or(inherited.customer_code),
            provider_subscription_code: ids.subscription_code.or(inherited.subscription_code),
            is_current: true,
            created_at: now,
        }
    }

    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status.is_entitled() && now > self.end_date
    }

    /// `Some(successor)` when the record has run past its end date.
    pub fn expire(&self, now: DateTime<Utc>) -> Option<Self> {
        if !self.is_lapsed(now) {
            return None;
        }
        Some(self.successor(SubscriptionStatus::Expired, now))
    }

    /// User-initiated cancellation. `Ok(None)` means already cancelled.
    pub fn cancel(&self, now: DateTime<Utc>) -> Result<Option<Self>, TransitionError> {
        match self.status {
            SubscriptionStatus::Cancelled => Ok(None),
            SubscriptionStatus::Trial | SubscriptionStatus::Active => {
                Ok(Some(self.successor(SubscriptionStatus::Cancelled, now)))
            }
            SubscriptionStatus::Expired => Err(TransitionError::NotAllowed {
                from: self.status,
                to: SubscriptionStatus::Cancelled,
            }),
        }
    }

    pub fn force_activate(&self, candidate_end: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let mut next = self.successor(SubscriptionStatus::Active, now);
        next.is_trial = false;
        next.end_date = monotonic_end(Some(self), candidate_end);
        next
    }

    /// Admin override, allowed from any state. `None` when already cancelled.
    pub fn force_deactivate(&self, now: DateTime<Utc>) -> Option<Self> {
        if self.status == SubscriptionStatus::Cancelled {
            return None;
        }
        Some(self.successor(SubscriptionStatus::Cancelled, now))
    }

    /// Attach provider codes without changing status. `None` when nothing changes.
    pub fn with_provider_ids(&self, ids: &ProviderIds, now: DateTime<Utc>) -> Option<Self> {
        let customer_code = ids
            .customer_code
            .clone()
            .or_else(|| self.provider_customer_code.clone());
        let subscription_code = ids
            .subscription_code
            .clone()
            .or_else(|| self.provider_subscription_code.clone());

        if customer_code == self.provider_customer_code
            && subscription_code == self.provider_subscription_code
        {
            return None;
        }

        let mut next = self.successor(self.status, now);
        next.provider_customer_code = customer_code;
        next.provider_subscription_code = subscription_code;
        Some(next)
    }

    fn successor(&self, status: SubscriptionStatus, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status,
            is_current: true,
            created_at: now,
            ..self.clone()
        }
    }
}

/// end_date never moves backwards, except after an explicit cancellation.
fn monotonic_end(previous: Option<&SubscriptionRecord>, candidate: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(p) if p.status != SubscriptionStatus::Cancelled => candidate.max(p.end_date),
        _ => candidate,
    }
}
