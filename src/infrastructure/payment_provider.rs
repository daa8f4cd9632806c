use crate::domain::SubscriptionPlan;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymentProviderError {
    #[error("API request failed: {0}")]
    RequestFailed(String),
    #[error("Provider rejected the request: {0}")]
    Rejected(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Rate limited")]
    RateLimited,
}

/// Hosted checkout returned by `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderPaymentStatus {
    Success,
    Failed,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderVerification {
    pub reference: String,
    pub status: ProviderPaymentStatus,
    /// Amount actually charged, in minor units.
    pub amount: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub customer_code: Option<String>,
    pub authorization_code: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn initialize(
        &self,
        email: &str,
        amount: i64,
        currency: &str,
        reference: &str,
        plan: SubscriptionPlan,
    ) -> Result<CheckoutSession, PaymentProviderError>;

    async fn verify(&self, reference: &str) -> Result<ProviderVerification, PaymentProviderError>;

    /// Checks `signature` against the exact bytes received on the wire.
    fn verify_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool;
}
