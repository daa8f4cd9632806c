use crate::domain::SubscriptionPlan;
use crate::infrastructure::{
    CheckoutSession, PaymentProvider, PaymentProviderError, ProviderPaymentStatus,
    ProviderVerification,
};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha512;
use std::time::Duration;
use tokio::time::sleep;

type HmacSha512 = Hmac<Sha512>;

/// Header Paystack puts the webhook HMAC in.
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 500 | 502 | 503)
}

/// Hex-encoded HMAC-SHA512 of `body` keyed with the secret key.
pub fn webhook_signature(secret_key: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha512::new_from_slice(secret_key.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub struct PaystackClient {
    client: Client,
    base_url: String,
    secret_key: String,
    callback_url: Option<String>,
}

impl PaystackClient {
    pub fn new(secret_key: String) -> Result<Self, PaymentProviderError> {
        if secret_key.trim().is_empty() {
            return Err(PaymentProviderError::InvalidConfig(
                "Paystack secret key is empty".to_string(),
            ));
        }

        let mut headers = header::HeaderMap::new();
        let auth_value = header::HeaderValue::from_str(&format!("Bearer {}", secret_key))
            .map_err(|e| {
                PaymentProviderError::InvalidConfig(format!("Invalid secret key format: {}", e))
            })?;
        headers.insert(header::AUTHORIZATION, auth_value);
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| {
                PaymentProviderError::InvalidConfig(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: "https://api.paystack.co".to_string(),
            secret_key,
            callback_url: None,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_callback_url(mut self, callback_url: Option<String>) -> Self {
        self.callback_url = callback_url.filter(|url| !url.trim().is_empty());
        self
    }

    async fn send_with_retry<F>(
        &self,
        mut request_builder: F,
    ) -> Result<reqwest::Response, PaymentProviderError>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut last_error: Option<String> = None;

        for attempt in 0..MAX_RETRIES {
            match request_builder().send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();

                    if status == 429 {
                        return Err(PaymentProviderError::RateLimited);
                    }

                    if is_retryable_status(status) && attempt < MAX_RETRIES - 1 {
                        let backoff = INITIAL_BACKOFF_MS * 2_u64.pow(attempt);
                        sleep(Duration::from_millis(backoff)).await;
                        continue;
                    }

                    return Ok(resp);
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    if attempt < MAX_RETRIES - 1 {
                        let backoff = INITIAL_BACKOFF_MS * 2_u64.pow(attempt);
                        sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }

        Err(PaymentProviderError::RequestFailed(
            last_error.unwrap_or_else(|| "Max retries exceeded".to_string()),
        ))
    }

    /// Unwraps Paystack's `{status, message, data}` envelope.
    async fn read_envelope<T: DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, PaymentProviderError> {
        let http_status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| PaymentProviderError::InvalidResponse(e.to_string()))?;

        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
            if http_status.is_success() {
                PaymentProviderError::InvalidResponse(e.to_string())
            } else {
                PaymentProviderError::Rejected(format!("HTTP {}: {}", http_status, body))
            }
        })?;

        if !http_status.is_success() || !envelope.status {
            return Err(PaymentProviderError::Rejected(envelope.message));
        }

        envelope
            .data
            .ok_or_else(|| PaymentProviderError::InvalidResponse("Missing data field".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    reference: String,
    status: String,
    amount: i64,
    currency: String,
    customer: Option<PaystackCustomer>,
    authorization: Option<PaystackAuthorization>,
}

fn map_transaction_status(status: &str) -> ProviderPaymentStatus {
    match status {
        "success" => ProviderPaymentStatus::Success,
        "failed" | "abandoned" | "reversed" => ProviderPaymentStatus::Failed,
        _ => ProviderPaymentStatus::Pending,
    }
}

#[async_trait]
impl PaymentProvider for PaystackClient {
    async fn initialize(
        &self,
        email: &str,
        amount: i64,
        currency: &str,
        reference: &str,
        plan: SubscriptionPlan,
    ) -> Result<CheckoutSession, PaymentProviderError> {
        let mut body = json!({
            "email": email,
            "amount": amount,
            "currency": currency,
            "reference": reference,
            "metadata": { "plan": plan.to_string() },
        });
        if let Some(callback_url) = &self.callback_url {
            body["callback_url"] = json!(callback_url);
        }

        let resp = self
            .send_with_retry(|| {
                self.client
                    .post(format!("{}/transaction/initialize", self.base_url))
                    .json(&body)
            })
            .await?;

        Self::read_envelope(resp).await
    }

    async fn verify(&self, reference: &str) -> Result<ProviderVerification, PaymentProviderError> {
        let resp = self
            .send_with_retry(|| {
                self.client
                    .get(format!("{}/transaction/verify/{}", self.base_url, reference))
            })
            .await?;

        let data: TransactionData = Self::read_envelope(resp).await?;
        let customer = data.customer.unwrap_or_default();

        Ok(ProviderVerification {
            status: map_transaction_status(&data.status),
            reference: data.reference,
            amount: data.amount,
            currency: data.currency,
            customer_email: customer.email,
            customer_code: customer.customer_code,
            authorization_code: data.authorization.and_then(|a| a.authorization_code),
        })
    }

    fn verify_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };
        let Ok(mut mac) = HmacSha512::new_from_slice(self.secret_key.as_bytes()) else {
            return false;
        };
        mac.update(raw_body);
        mac.verify_slice(&expected).is_ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PaystackCustomer {
    pub email: Option<String>,
    pub customer_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PaystackAuthorization {
    pub authorization_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChargeData {
    pub reference: String,
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub customer: PaystackCustomer,
    #[serde(default)]
    pub authorization: PaystackAuthorization,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionData {
    pub subscription_code: String,
    #[serde(default)]
    pub customer: PaystackCustomer,
}

/// Webhook events the ledger reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    ChargeSuccess(ChargeData),
    SubscriptionCreate(SubscriptionData),
    SubscriptionDisable(SubscriptionData),
    Other(String),
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl WebhookEvent {
    pub fn parse(raw_body: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: RawEvent = serde_json::from_slice(raw_body)?;
        let event = match raw.event.as_str() {
            "charge.success" => WebhookEvent::ChargeSuccess(serde_json::from_value(raw.data)?),
            "subscription.create" => {
                WebhookEvent::SubscriptionCreate(serde_json::from_value(raw.data)?)
            }
            "subscription.disable" => {
                WebhookEvent::SubscriptionDisable(serde_json::from_value(raw.data)?)
            }
            _ => WebhookEvent::Other(raw.event),
        };
        Ok(event)
    }

    pub fn name(&self) -> &str {
        match self {
            WebhookEvent::ChargeSuccess(_) => "charge.success",
            WebhookEvent::SubscriptionCreate(_) => "subscription.create",
            WebhookEvent::SubscriptionDisable(_) => "subscription.disable",
            WebhookEvent::Other(name) => name,
        }
    }
}
