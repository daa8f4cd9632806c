//! Paystack webhook handling.
//!
//! The signature is checked against the raw body before anything is parsed
//! or read. After that, business rejections (unknown intent, wrong amount,
//! unknown customer) are reported as [`WebhookOutcome::Rejected`] so the
//! provider stops redelivering, while transient failures stay errors and
//! get redelivered.

use crate::application::{FulfillmentRequest, LedgerError, SubscriptionLedger};
use crate::domain::ProviderIds;
use crate::infrastructure::{
    AccountRepository, ChargeData, PaymentIntentRepository, PaymentProvider, PaymentRepository,
    SubscriptionData, SubscriptionRepository, WebhookEvent,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Fulfilled {
        reference: String,
        subscription_id: Uuid,
        newly_applied: bool,
    },
    SubscriptionLinked {
        account_id: Uuid,
    },
    SubscriptionCancelled {
        account_id: Uuid,
    },
    Rejected {
        reason: String,
    },
    Ignored {
        event: String,
    },
}

pub struct WebhookProcessor<A, S, I, P>
where
    A: AccountRepository,
    S: SubscriptionRepository,
    I: PaymentIntentRepository,
    P: PaymentRepository,
{
    ledger: Arc<SubscriptionLedger<A, S, I, P>>,
    provider: Arc<dyn PaymentProvider>,
}

impl<A, S, I, P> WebhookProcessor<A, S, I, P>
where
    A: AccountRepository,
    S: SubscriptionRepository,
    I: PaymentIntentRepository,
    P: PaymentRepository,
{
    pub fn new(
        ledger: Arc<SubscriptionLedger<A, S, I, P>>,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        Self { ledger, provider }
    }

    pub async fn handle(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, LedgerError> {
        let signature = signature.ok_or(LedgerError::SignatureInvalid)?;
        if !self.provider.verify_webhook_signature(raw_body, signature) {
            warn!("Rejected webhook with invalid signature");
            return Err(LedgerError::SignatureInvalid);
        }

        // Signed but unreadable: acknowledge so the provider stops redelivering.
        let event = match WebhookEvent::parse(raw_body) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Rejected signed webhook with unreadable body");
                return Ok(WebhookOutcome::Rejected {
                    reason: LedgerError::MalformedEvent(e.to_string()).to_string(),
                });
            }
        };
        let name = event.name().to_string();

        let result = match event {
            WebhookEvent::ChargeSuccess(charge) => self.on_charge_success(charge).await,
            WebhookEvent::SubscriptionCreate(data) => self.on_subscription_create(data).await,
            WebhookEvent::SubscriptionDisable(data) => self.on_subscription_disable(data).await,
            WebhookEvent::Other(event) => {
                info!("Ignoring webhook event {}", event);
                return Ok(WebhookOutcome::Ignored { event });
            }
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) if !e.is_retryable() => {
                warn!(event = %name, error = %e, "Webhook rejected");
                Ok(WebhookOutcome::Rejected {
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn on_charge_success(&self, charge: ChargeData) -> Result<WebhookOutcome, LedgerError> {
        let intent = self.ledger.payment_intent(&charge.reference).await?;

        let email = charge.customer.email.clone().ok_or_else(|| {
            LedgerError::MalformedEvent("charge.success without customer email".to_string())
        })?;
        let account = self.ledger.account_by_email(&email).await?;
        if account.id != intent.account_id {
            return Err(LedgerError::AccountMismatch {
                reference: charge.reference,
                customer: email,
            });
        }

        let fulfillment = self
            .ledger
            .fulfill_upgrade(FulfillmentRequest {
                reference: charge.reference.clone(),
                amount: charge.amount,
                currency: charge.currency,
                provider_ids: ProviderIds {
                    customer_code: charge.customer.customer_code,
                    subscription_code: None,
                },
                authorization_code: charge.authorization.authorization_code,
            })
            .await?;

        Ok(WebhookOutcome::Fulfilled {
            reference: charge.reference,
            subscription_id: fulfillment.record.id,
            newly_applied: fulfillment.newly_applied,
        })
    }

    async fn on_subscription_create(
        &self,
        data: SubscriptionData,
    ) -> Result<WebhookOutcome, LedgerError> {
        let email = data.customer.email.ok_or_else(|| {
            LedgerError::MalformedEvent("subscription.create without customer email".to_string())
        })?;

        let record = self
            .ledger
            .attach_provider_subscription(
                &email,
                ProviderIds {
                    customer_code: data.customer.customer_code,
                    subscription_code: Some(data.subscription_code),
                },
            )
            .await?;

        Ok(WebhookOutcome::SubscriptionLinked {
            account_id: record.account_id,
        })
    }

    async fn on_subscription_disable(
        &self,
        data: SubscriptionData,
    ) -> Result<WebhookOutcome, LedgerError> {
        let record = self
            .ledger
            .cancel_provider_subscription(&data.subscription_code)
            .await?;

        Ok(WebhookOutcome::SubscriptionCancelled {
            account_id: record.account_id,
        })
    }
}
