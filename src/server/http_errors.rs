use crate::application::{LedgerError, ReportingError};
use crate::infrastructure::RepositoryError;
use axum::http::StatusCode;
use serde_json::json;

pub(super) fn unauthenticated() -> (StatusCode, serde_json::Value) {
    (
        StatusCode::UNAUTHORIZED,
        json!({ "error": "Missing or invalid caller identity" }),
    )
}

pub(super) fn forbidden() -> (StatusCode, serde_json::Value) {
    (StatusCode::FORBIDDEN, json!({ "error": "Not authorized" }))
}

pub(super) fn map_ledger_error(err: &LedgerError) -> (StatusCode, serde_json::Value) {
    match err {
        LedgerError::InvalidPlan(plan) => (
            StatusCode::BAD_REQUEST,
            json!({ "error": format!("Invalid plan: {}", plan), "allowed": ["monthly", "yearly"] }),
        ),
        LedgerError::SignatureInvalid => (
            StatusCode::BAD_REQUEST,
            json!({ "error": "Invalid webhook signature" }),
        ),
        LedgerError::MalformedEvent(msg) => (
            StatusCode::BAD_REQUEST,
            json!({ "error": format!("Malformed event: {}", msg) }),
        ),
        LedgerError::PaymentNotSuccessful(reference) => (
            StatusCode::PAYMENT_REQUIRED,
            json!({ "error": "Payment was not successful", "reference": reference }),
        ),
        LedgerError::NotAuthorized => forbidden(),
        LedgerError::IntentNotFound(_) => (
            StatusCode::NOT_FOUND,
            json!({ "error": "Payment reference not found" }),
        ),
        LedgerError::SubscriptionNotFound(_) => (
            StatusCode::NOT_FOUND,
            json!({ "error": "Subscription not found" }),
        ),
        LedgerError::Repository(RepositoryError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, json!({ "error": "Account not found" }))
        }
        LedgerError::IntentDiscarded(_) => (
            StatusCode::CONFLICT,
            json!({ "error": "Payment reference was discarded; start a new checkout" }),
        ),
        LedgerError::InvalidTransition(e) => {
            (StatusCode::CONFLICT, json!({ "error": e.to_string() }))
        }
        LedgerError::EmailTaken(_) => (
            StatusCode::CONFLICT,
            json!({ "error": "Email already registered" }),
        ),
        LedgerError::Repository(RepositoryError::Conflict(_)) => (
            StatusCode::CONFLICT,
            json!({ "error": "Conflicting update, please retry", "retryable": true }),
        ),
        LedgerError::AccountMismatch { .. } => (
            StatusCode::FORBIDDEN,
            json!({ "error": "Payment belongs to a different account" }),
        ),
        LedgerError::AmountMismatch {
            expected, received, ..
        } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({
                "error": "Paid amount does not match the plan price",
                "expected": expected,
                "received": received
            }),
        ),
        LedgerError::CurrencyMismatch {
            expected, received, ..
        } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({
                "error": "Paid currency does not match the plan currency",
                "expected": expected,
                "received": received
            }),
        ),
        LedgerError::ReferenceMismatch { .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "error": "Provider confirmed a different payment reference" }),
        ),
        LedgerError::ProviderUnavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "error": "Payment provider unavailable, please retry", "retryable": true }),
        ),
        LedgerError::Busy(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "error": "Subscription is being updated, please retry", "retryable": true }),
        ),
        LedgerError::PeriodOverflow(_) | LedgerError::Repository(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": "Internal error" }),
        ),
    }
}

/// Paystack redelivers on any non-2xx, so only a bad signature and transient
/// failures leave this handler as errors.
pub(super) fn map_webhook_error(err: &LedgerError) -> (StatusCode, serde_json::Value) {
    match err {
        LedgerError::SignatureInvalid => map_ledger_error(err),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": "Webhook processing failed, please retry" }),
        ),
    }
}

pub(super) fn map_reporting_error(err: &ReportingError) -> (StatusCode, serde_json::Value) {
    match err {
        ReportingError::InvalidFilter(status) => (
            StatusCode::BAD_REQUEST,
            json!({
                "error": format!("Invalid status filter: {}", status),
                "allowed": ["free_trial", "active", "expired", "cancelled"]
            }),
        ),
        ReportingError::Repository(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": "Failed to load report" }),
        ),
    }
}
