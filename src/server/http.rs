use super::http_auth::resolve_caller;
use super::http_errors::{
    forbidden, map_ledger_error, map_reporting_error, map_webhook_error, unauthenticated,
};
use super::http_parse::{header_str, parse_role};
use super::http_types::{
    AccountResponse, CheckoutResponse, CreateAccountRequest, FulfillmentResponse, HealthResponse,
    InitializePaymentParams, PaginationParams, PaymentResponse, RegisteredAccountResponse,
    StatusFilterParams, SubscriptionResponse, SubscriptionStatusResponse, SweepResponse,
};
use super::state::AppState;
use crate::application::LedgerError;
use crate::domain::Caller;
use crate::infrastructure::SIGNATURE_HEADER;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;
use validator::Validate;

type ApiResponse = (StatusCode, Json<Value>);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/accounts", post(create_account))
        .route("/subscription/initialize-payment", post(initialize_payment))
        .route("/subscription/verify-payment/:reference", post(verify_payment))
        .route("/paystack/webhook", post(paystack_webhook))
        .route("/users/:user_id/subscription", get(get_subscription))
        .route("/users/:user_id/subscription-status", get(get_subscription_status))
        .route("/users/:user_id/subscription/history", get(get_subscription_history))
        .route("/users/:user_id/payments", get(get_user_payments))
        .route("/users/:user_id/subscription/cancel", post(cancel_subscription))
        .route("/users/:user_id/subscription/activate", post(activate_subscription))
        .route("/users/:user_id/subscription/deactivate", post(deactivate_subscription))
        .route("/admin/stats/users", get(user_stats))
        .route("/admin/stats/revenue", get(revenue_stats))
        .route("/admin/analytics/monthly-revenue", get(monthly_revenue))
        .route("/admin/analytics/subscription-growth", get(subscription_growth))
        .route("/admin/payments", get(list_payments))
        .route("/admin/users/filter", get(filter_users))
        .route("/admin/subscriptions/sweep", post(sweep_subscriptions))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        create_account,
        initialize_payment,
        verify_payment,
        paystack_webhook,
        get_subscription,
        get_subscription_status,
        get_subscription_history,
        get_user_payments,
        cancel_subscription,
        activate_subscription,
        deactivate_subscription,
        user_stats,
        revenue_stats,
        monthly_revenue,
        subscription_growth,
        list_payments,
        filter_users,
        sweep_subscriptions,
    ),
    components(
        schemas(
            HealthResponse,
            CreateAccountRequest,
            AccountResponse,
            RegisteredAccountResponse,
            SubscriptionResponse,
            SubscriptionStatusResponse,
            CheckoutResponse,
            PaymentResponse,
            FulfillmentResponse,
            SweepResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Accounts", description = "Account registration"),
        (name = "Payments", description = "Checkout, verification and Paystack webhooks"),
        (name = "Subscriptions", description = "Subscription state per user"),
        (name = "Admin", description = "Admin overrides and analytics"),
    ),
    info(
        title = "MindSpero Billing API",
        version = "0.1.0",
        description = "Subscription lifecycle and Paystack payment reconciliation",
        license(name = "MIT")
    )
)]
struct ApiDoc;

fn respond<T: Serialize>(status: StatusCode, body: T) -> ApiResponse {
    (status, Json(json!(body)))
}

fn failure((status, body): (StatusCode, Value)) -> ApiResponse {
    (status, Json(body))
}

fn ledger_failure(err: &LedgerError, context: &str) -> ApiResponse {
    let (status, body) = map_ledger_error(err);
    if status.is_server_error() {
        error!(error = %err, "{}", context);
    }
    (status, Json(body))
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Caller, ApiResponse> {
    resolve_caller(headers, &state.admin_token).ok_or_else(|| failure(unauthenticated()))
}

fn authenticate_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiResponse> {
    match authenticate(state, headers)? {
        Caller::Admin => Ok(()),
        Caller::Account(_) => Err(failure(forbidden())),
    }
}

/// Health check endpoint
///
/// Verifies database connectivity and returns service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse)
    )
)]
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                error: None,
            }),
        ),
        Err(e) => {
            error!(error = %e, "Health check failed: DB connectivity issue");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    error: Some("Database connectivity failed".to_string()),
                }),
            )
        }
    }
}

/// Register an account and open its trial
///
/// Called by the auth service after sign-up.
#[utoipa::path(
    post,
    path = "/accounts",
    tag = "Accounts",
    request_body = CreateAccountRequest,
    responses(
        (status = 201, description = "Account created with a trial", body = RegisteredAccountResponse),
        (status = 400, description = "Invalid email or role", body = Object),
        (status = 401, description = "Missing caller identity", body = Object),
        (status = 403, description = "Admin only", body = Object),
        (status = 409, description = "Email already registered", body = Object)
    )
)]
async fn create_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateAccountRequest>,
) -> impl IntoResponse {
    if let Err(resp) = authenticate_admin(&state, &headers) {
        return resp;
    }

    if let Err(errors) = req.validate() {
        return respond(
            StatusCode::BAD_REQUEST,
            json!({ "error": "Invalid account", "details": errors }),
        );
    }

    let Some(role) = parse_role(req.role.as_deref()) else {
        return respond(
            StatusCode::BAD_REQUEST,
            json!({ "error": "Invalid role", "allowed": ["user", "admin"] }),
        );
    };

    match state.ledger.register_account(req.email, role).await {
        Ok((account, trial)) => respond(
            StatusCode::CREATED,
            RegisteredAccountResponse {
                account: account.into(),
                subscription: trial.into(),
            },
        ),
        Err(e) => ledger_failure(&e, "Failed to register account"),
    }
}

/// Start an upgrade checkout
///
/// Records a payment intent and returns the Paystack checkout URL.
#[utoipa::path(
    post,
    path = "/subscription/initialize-payment",
    tag = "Payments",
    params(InitializePaymentParams),
    responses(
        (status = 200, description = "Checkout created", body = CheckoutResponse),
        (status = 400, description = "Invalid plan", body = Object),
        (status = 401, description = "Missing caller identity", body = Object),
        (status = 403, description = "Not the account owner", body = Object),
        (status = 503, description = "Paystack unavailable", body = Object)
    )
)]
async fn initialize_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<InitializePaymentParams>,
) -> impl IntoResponse {
    let caller = match authenticate(&state, &headers) {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };

    let account_id = match (params.user_id, caller) {
        (Some(id), _) => id,
        (None, Caller::Account(id)) => id,
        (None, Caller::Admin) => {
            return respond(
                StatusCode::BAD_REQUEST,
                json!({ "error": "user_id is required for admin callers" }),
            )
        }
    };

    match state
        .ledger
        .initiate_upgrade(&caller, account_id, &params.plan)
        .await
    {
        Ok(checkout) => respond(StatusCode::OK, CheckoutResponse::from(checkout)),
        Err(e) => ledger_failure(&e, "Failed to initialize payment"),
    }
}

/// Verify a payment with Paystack and apply it
///
/// Safe to call repeatedly; an already-applied reference returns the original result.
#[utoipa::path(
    post,
    path = "/subscription/verify-payment/{reference}",
    tag = "Payments",
    params(("reference" = String, Path, description = "Payment reference")),
    responses(
        (status = 200, description = "Payment applied", body = FulfillmentResponse),
        (status = 402, description = "Payment not successful", body = Object),
        (status = 404, description = "Unknown reference", body = Object),
        (status = 422, description = "Amount mismatch", body = Object),
        (status = 503, description = "Paystack unavailable or account busy", body = Object)
    )
)]
async fn verify_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(reference): Path<String>,
) -> impl IntoResponse {
    let caller = match authenticate(&state, &headers) {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };

    match state.ledger.verify_payment(&caller, &reference).await {
        Ok(fulfillment) => respond(StatusCode::OK, FulfillmentResponse::from(fulfillment)),
        Err(e) => ledger_failure(&e, "Failed to verify payment"),
    }
}

/// Paystack webhook receiver
///
/// Requires a valid `x-paystack-signature`. Business rejections and signed
/// bodies that fail to parse are acknowledged with 200 so Paystack stops
/// redelivering.
#[utoipa::path(
    post,
    path = "/paystack/webhook",
    tag = "Payments",
    request_body(content = String, description = "Raw Paystack event JSON"),
    responses(
        (status = 200, description = "Event processed, ignored or rejected", body = Object),
        (status = 400, description = "Invalid signature", body = Object),
        (status = 500, description = "Transient failure, Paystack should retry", body = Object)
    )
)]
async fn paystack_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = header_str(&headers, SIGNATURE_HEADER);

    match state.webhooks.handle(&body, signature).await {
        Ok(outcome) => {
            info!(outcome = ?outcome, "Webhook handled");
            respond(StatusCode::OK, outcome)
        }
        Err(e) => {
            let (status, body) = map_webhook_error(&e);
            if status.is_server_error() {
                error!(error = %e, "Webhook processing failed");
            }
            (status, Json(body))
        }
    }
}

/// Current subscription for a user
///
/// A lapsed trial or paid period is persisted as expired before being returned.
#[utoipa::path(
    get,
    path = "/users/{user_id}/subscription",
    tag = "Subscriptions",
    params(("user_id" = Uuid, Path, description = "Account ID")),
    responses(
        (status = 200, description = "Current subscription", body = SubscriptionResponse),
        (status = 403, description = "Not the owner or an admin", body = Object),
        (status = 404, description = "No subscription", body = Object)
    )
)]
async fn get_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    let caller = match authenticate(&state, &headers) {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };

    match state.ledger.current_subscription(&caller, user_id).await {
        Ok(record) => respond(StatusCode::OK, SubscriptionResponse::from(record)),
        Err(e) => ledger_failure(&e, "Failed to fetch subscription"),
    }
}

#[utoipa::path(
    get,
    path = "/users/{user_id}/subscription-status",
    tag = "Subscriptions",
    params(("user_id" = Uuid, Path, description = "Account ID")),
    responses(
        (status = 200, description = "Evaluated status", body = SubscriptionStatusResponse),
        (status = 403, description = "Not the owner or an admin", body = Object),
        (status = 404, description = "No subscription", body = Object)
    )
)]
async fn get_subscription_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    let caller = match authenticate(&state, &headers) {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };

    match state.ledger.current_subscription(&caller, user_id).await {
        Ok(record) => respond(StatusCode::OK, SubscriptionStatusResponse::from(record)),
        Err(e) => ledger_failure(&e, "Failed to evaluate subscription status"),
    }
}

#[utoipa::path(
    get,
    path = "/users/{user_id}/subscription/history",
    tag = "Subscriptions",
    params(("user_id" = Uuid, Path, description = "Account ID")),
    responses(
        (status = 200, description = "All records, newest first", body = [SubscriptionResponse]),
        (status = 403, description = "Not the owner or an admin", body = Object),
        (status = 404, description = "Account not found", body = Object)
    )
)]
async fn get_subscription_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    let caller = match authenticate(&state, &headers) {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };

    match state.ledger.subscription_history(&caller, user_id).await {
        Ok(records) => {
            let records: Vec<SubscriptionResponse> = records.into_iter().map(Into::into).collect();
            respond(StatusCode::OK, records)
        }
        Err(e) => ledger_failure(&e, "Failed to fetch subscription history"),
    }
}

#[utoipa::path(
    get,
    path = "/users/{user_id}/payments",
    tag = "Payments",
    params(("user_id" = Uuid, Path, description = "Account ID")),
    responses(
        (status = 200, description = "Payments, newest first", body = [PaymentResponse]),
        (status = 403, description = "Not the owner or an admin", body = Object),
        (status = 404, description = "Account not found", body = Object)
    )
)]
async fn get_user_payments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    let caller = match authenticate(&state, &headers) {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };

    match state.ledger.payment_history(&caller, user_id).await {
        Ok(payments) => {
            let payments: Vec<PaymentResponse> = payments.into_iter().map(Into::into).collect();
            respond(StatusCode::OK, payments)
        }
        Err(e) => ledger_failure(&e, "Failed to fetch payments"),
    }
}

/// Cancel a subscription
///
/// Cancelling an already cancelled subscription returns it unchanged.
#[utoipa::path(
    post,
    path = "/users/{user_id}/subscription/cancel",
    tag = "Subscriptions",
    params(("user_id" = Uuid, Path, description = "Account ID")),
    responses(
        (status = 200, description = "Cancelled subscription", body = SubscriptionResponse),
        (status = 403, description = "Not the owner or an admin", body = Object),
        (status = 409, description = "Subscription already expired", body = Object)
    )
)]
async fn cancel_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    let caller = match authenticate(&state, &headers) {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };

    match state.ledger.cancel(&caller, user_id).await {
        Ok(record) => respond(StatusCode::OK, SubscriptionResponse::from(record)),
        Err(e) => ledger_failure(&e, "Failed to cancel subscription"),
    }
}

#[utoipa::path(
    post,
    path = "/users/{user_id}/subscription/activate",
    tag = "Admin",
    params(("user_id" = Uuid, Path, description = "Account ID")),
    responses(
        (status = 200, description = "Activated without payment", body = SubscriptionResponse),
        (status = 403, description = "Admin only", body = Object),
        (status = 404, description = "Account not found", body = Object)
    )
)]
async fn activate_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    let caller = match authenticate(&state, &headers) {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };

    match state.ledger.force_activate(&caller, user_id).await {
        Ok(record) => respond(StatusCode::OK, SubscriptionResponse::from(record)),
        Err(e) => ledger_failure(&e, "Failed to activate subscription"),
    }
}

#[utoipa::path(
    post,
    path = "/users/{user_id}/subscription/deactivate",
    tag = "Admin",
    params(("user_id" = Uuid, Path, description = "Account ID")),
    responses(
        (status = 200, description = "Deactivated subscription", body = SubscriptionResponse),
        (status = 403, description = "Admin only", body = Object),
        (status = 404, description = "Account not found", body = Object)
    )
)]
async fn deactivate_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    let caller = match authenticate(&state, &headers) {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };

    match state.ledger.force_deactivate(&caller, user_id).await {
        Ok(record) => respond(StatusCode::OK, SubscriptionResponse::from(record)),
        Err(e) => ledger_failure(&e, "Failed to deactivate subscription"),
    }
}

#[utoipa::path(
    get,
    path = "/admin/stats/users",
    tag = "Admin",
    responses(
        (status = 200, description = "Accounts by current subscription status", body = Object),
        (status = 403, description = "Admin only", body = Object)
    )
)]
async fn user_stats(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(resp) = authenticate_admin(&state, &headers) {
        return resp;
    }

    match state.reporting.user_stats().await {
        Ok(stats) => respond(StatusCode::OK, stats),
        Err(e) => {
            error!(error = %e, "Failed to load user stats");
            failure(map_reporting_error(&e))
        }
    }
}

#[utoipa::path(
    get,
    path = "/admin/stats/revenue",
    tag = "Admin",
    responses(
        (status = 200, description = "Total and monthly revenue in minor units", body = Object),
        (status = 403, description = "Admin only", body = Object)
    )
)]
async fn revenue_stats(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(resp) = authenticate_admin(&state, &headers) {
        return resp;
    }

    match state.reporting.revenue_stats().await {
        Ok(stats) => respond(StatusCode::OK, stats),
        Err(e) => {
            error!(error = %e, "Failed to load revenue stats");
            failure(map_reporting_error(&e))
        }
    }
}

#[utoipa::path(
    get,
    path = "/admin/analytics/monthly-revenue",
    tag = "Admin",
    responses(
        (status = 200, description = "Revenue per billing month", body = Object),
        (status = 403, description = "Admin only", body = Object)
    )
)]
async fn monthly_revenue(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(resp) = authenticate_admin(&state, &headers) {
        return resp;
    }

    match state.reporting.monthly_revenue().await {
        Ok(breakdown) => respond(StatusCode::OK, breakdown),
        Err(e) => {
            error!(error = %e, "Failed to load monthly revenue");
            failure(map_reporting_error(&e))
        }
    }
}

#[utoipa::path(
    get,
    path = "/admin/analytics/subscription-growth",
    tag = "Admin",
    responses(
        (status = 200, description = "Subscribed vs trial accounts and conversion rate", body = Object),
        (status = 403, description = "Admin only", body = Object)
    )
)]
async fn subscription_growth(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(resp) = authenticate_admin(&state, &headers) {
        return resp;
    }

    match state.reporting.subscription_growth().await {
        Ok(growth) => respond(StatusCode::OK, growth),
        Err(e) => {
            error!(error = %e, "Failed to load subscription growth");
            failure(map_reporting_error(&e))
        }
    }
}

#[utoipa::path(
    get,
    path = "/admin/payments",
    tag = "Admin",
    params(PaginationParams),
    responses(
        (status = 200, description = "Payments, newest first", body = [PaymentResponse]),
        (status = 403, description = "Admin only", body = Object)
    )
)]
async fn list_payments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    if let Err(resp) = authenticate_admin(&state, &headers) {
        return resp;
    }

    match state
        .reporting
        .list_payments(params.limit, params.offset)
        .await
    {
        Ok(payments) => {
            let payments: Vec<PaymentResponse> = payments.into_iter().map(Into::into).collect();
            respond(StatusCode::OK, payments)
        }
        Err(e) => {
            error!(error = %e, "Failed to list payments");
            failure(map_reporting_error(&e))
        }
    }
}

#[utoipa::path(
    get,
    path = "/admin/users/filter",
    tag = "Admin",
    params(StatusFilterParams),
    responses(
        (status = 200, description = "Accounts with the given current status", body = [AccountResponse]),
        (status = 400, description = "Unknown status", body = Object),
        (status = 403, description = "Admin only", body = Object)
    )
)]
async fn filter_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<StatusFilterParams>,
) -> impl IntoResponse {
    if let Err(resp) = authenticate_admin(&state, &headers) {
        return resp;
    }

    match state
        .reporting
        .filter_accounts(&params.status, params.limit, params.offset)
        .await
    {
        Ok(accounts) => {
            let accounts: Vec<AccountResponse> = accounts.into_iter().map(Into::into).collect();
            respond(StatusCode::OK, accounts)
        }
        Err(e) => failure(map_reporting_error(&e)),
    }
}

/// Expire lapsed subscriptions now instead of waiting for the schedule
#[utoipa::path(
    post,
    path = "/admin/subscriptions/sweep",
    tag = "Admin",
    responses(
        (status = 200, description = "Number of subscriptions expired", body = SweepResponse),
        (status = 403, description = "Admin only", body = Object)
    )
)]
async fn sweep_subscriptions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(resp) = authenticate_admin(&state, &headers) {
        return resp;
    }

    match state.ledger.sweep_expired().await {
        Ok(expired) => respond(StatusCode::OK, SweepResponse { expired }),
        Err(e) => ledger_failure(&e, "Expiry sweep failed"),
    }
}
