use crate::application::{ReportingService, SubscriptionLedger, WebhookProcessor};
use crate::infrastructure::{
    AppConfig, PaymentProvider, PaystackClient, PostgresAccountRepository,
    PostgresPaymentIntentRepository, PostgresPaymentRepository, PostgresSubscriptionRepository,
    SystemClock,
};
use anyhow::Context;
use sqlx::PgPool;
use std::sync::Arc;
use validator::Validate;

pub type SubscriptionLedgerType = SubscriptionLedger<
    PostgresAccountRepository,
    PostgresSubscriptionRepository,
    PostgresPaymentIntentRepository,
    PostgresPaymentRepository,
>;

pub type WebhookProcessorType = WebhookProcessor<
    PostgresAccountRepository,
    PostgresSubscriptionRepository,
    PostgresPaymentIntentRepository,
    PostgresPaymentRepository,
>;

pub type ReportingServiceType = ReportingService<
    PostgresAccountRepository,
    PostgresSubscriptionRepository,
    PostgresPaymentRepository,
>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub admin_token: Arc<str>,
    pub ledger: Arc<SubscriptionLedgerType>,
    pub webhooks: Arc<WebhookProcessorType>,
    pub reporting: Arc<ReportingServiceType>,
}

/// Build full state from config + an existing pool.
///
/// Intended for embedding into a larger service that already manages a `PgPool`.
pub async fn build_state_with_pool(
    config: AppConfig,
    pool: PgPool,
    run_migrations: bool,
) -> anyhow::Result<AppState> {
    if run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("run migrations")?;
    }

    let settings = config.ledger_settings();
    settings.validate().context("validate ledger settings")?;

    let paystack = PaystackClient::new(config.paystack_secret_key.clone())
        .context("init Paystack client")?
        .with_base_url(config.paystack_base_url.clone())
        .with_callback_url(Some(config.paystack_callback_url.clone()));
    let provider: Arc<dyn PaymentProvider> = Arc::new(paystack);

    let account_repo = Arc::new(PostgresAccountRepository::new(pool.clone()));
    let subscription_repo = Arc::new(PostgresSubscriptionRepository::new(pool.clone()));
    let intent_repo = Arc::new(PostgresPaymentIntentRepository::new(pool.clone()));
    let payment_repo = Arc::new(PostgresPaymentRepository::new(pool.clone()));

    let reporting = Arc::new(ReportingService::new(
        account_repo.clone(),
        subscription_repo.clone(),
        payment_repo.clone(),
        settings.currency.clone(),
    ));

    let ledger = Arc::new(SubscriptionLedger::new(
        account_repo,
        subscription_repo,
        intent_repo,
        payment_repo,
        provider.clone(),
        Arc::new(SystemClock),
        settings,
    ));

    let webhooks = Arc::new(WebhookProcessor::new(ledger.clone(), provider));

    Ok(AppState {
        pool,
        admin_token: Arc::from(config.admin_token.as_str()),
        ledger,
        webhooks,
        reporting,
    })
}

/// Build state for the standalone server.
///
/// Creates the `PgPool`, runs migrations, and wires repositories/services.
pub async fn build_state_from_env(config: AppConfig) -> anyhow::Result<AppState> {
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("connect database")?;
    build_state_with_pool(config, pool, true).await
}
