//! Shared in-memory fakes for the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mindspero_billing::{
    application::{ReportingService, SubscriptionLedger, WebhookProcessor},
    domain::{
        Account, Caller, IntentStatus, Payment, PaymentIntent, Role, SubscriptionPlan,
        SubscriptionRecord, SubscriptionStatus,
    },
    infrastructure::{
        webhook_signature, AccountRepository, CheckoutSession, Clock, FulfillmentCommit,
        FulfillmentOutcome, LedgerSettings, MonthlyRevenue, PaymentIntentRepository,
        PaymentProvider, PaymentProviderError, PaymentRepository, ProviderPaymentStatus,
        ProviderVerification, RepositoryError, SubscriptionRepository,
    },
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "sk_test_webhook_secret";

pub type TestLedger =
    SubscriptionLedger<InMemoryStore, InMemoryStore, InMemoryStore, InMemoryStore>;
pub type TestWebhooks =
    WebhookProcessor<InMemoryStore, InMemoryStore, InMemoryStore, InMemoryStore>;
pub type TestReporting = ReportingService<InMemoryStore, InMemoryStore, InMemoryStore>;

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

// ============================================================================
// Clock
// ============================================================================

pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Default)]
struct Tables {
    accounts: Vec<Account>,
    records: Vec<SubscriptionRecord>,
    intents: HashMap<String, PaymentIntent>,
    payments: Vec<Payment>,
}

impl Tables {
    /// Same rules as the partial unique index plus the conditional retire.
    fn supersede(
        &mut self,
        previous_id: Option<Uuid>,
        next: &SubscriptionRecord,
    ) -> Result<(), RepositoryError> {
        match previous_id {
            Some(id) => {
                let previous = self
                    .records
                    .iter_mut()
                    .find(|r| r.id == id && r.is_current && r.account_id == next.account_id)
                    .ok_or_else(|| RepositoryError::Conflict(format!("record {} not current", id)))?;
                previous.is_current = false;
            }
            None => {
                if self
                    .records
                    .iter()
                    .any(|r| r.account_id == next.account_id && r.is_current)
                {
                    return Err(RepositoryError::Conflict(format!(
                        "account {} already has a current record",
                        next.account_id
                    )));
                }
            }
        }
        self.records.push(next.clone());
        Ok(())
    }

    fn current(&self, account_id: Uuid) -> Option<&SubscriptionRecord> {
        self.records
            .iter()
            .find(|r| r.account_id == account_id && r.is_current)
    }
}

/// Implements every repository trait over one lock, so a fulfillment commit is
/// atomic the way the Postgres transaction is.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    operations: AtomicUsize,
    fail_next_write: AtomicBool,
}

impl InMemoryStore {
    /// Repository calls made so far.
    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    pub fn records_for(&self, account_id: Uuid) -> Vec<SubscriptionRecord> {
        let tables = self.tables.lock().unwrap();
        tables
            .records
            .iter()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect()
    }

    /// Make the next transactional write fail as a dropped connection would,
    /// before anything is applied.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    pub fn account_count(&self) -> usize {
        self.tables.lock().unwrap().accounts.len()
    }

    pub fn intents_for(&self, account_id: Uuid) -> Vec<PaymentIntent> {
        let tables = self.tables.lock().unwrap();
        tables
            .intents
            .values()
            .filter(|i| i.account_id == account_id)
            .cloned()
            .collect()
    }

    pub fn payment_count(&self) -> usize {
        self.tables.lock().unwrap().payments.len()
    }

    pub fn intent(&self, reference: &str) -> Option<PaymentIntent> {
        self.tables.lock().unwrap().intents.get(reference).cloned()
    }

    fn touch(&self) {
        self.operations.fetch_add(1, Ordering::SeqCst);
    }

    fn write_guard(&self) -> Result<(), RepositoryError> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(RepositoryError::DatabaseError(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl AccountRepository for InMemoryStore {
    async fn create(&self, account: &Account) -> Result<(), RepositoryError> {
        self.touch();
        let mut tables = self.tables.lock().unwrap();
        if tables.accounts.iter().any(|a| a.email == account.email) {
            return Err(RepositoryError::Conflict(format!(
                "email {} already registered",
                account.email
            )));
        }
        tables.accounts.push(account.clone());
        Ok(())
    }

    async fn create_with_trial(
        &self,
        account: &Account,
        trial: &SubscriptionRecord,
    ) -> Result<(), RepositoryError> {
        self.touch();
        let mut tables = self.tables.lock().unwrap();
        if tables.accounts.iter().any(|a| a.email == account.email) {
            return Err(RepositoryError::Conflict(format!(
                "email {} already registered",
                account.email
            )));
        }
        self.write_guard()?;
        tables.supersede(None, trial)?;
        tables.accounts.push(account.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Account, RepositoryError> {
        self.touch();
        let tables = self.tables.lock().unwrap();
        tables
            .accounts
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("Account {}", id)))
    }

    async fn get_by_email(&self, email: &str) -> Result<Account, RepositoryError> {
        self.touch();
        let email = email.trim().to_lowercase();
        let tables = self.tables.lock().unwrap();
        tables
            .accounts
            .iter()
            .find(|a| a.email == email)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("Account {}", email)))
    }

    async fn count(&self) -> Result<i64, RepositoryError> {
        self.touch();
        Ok(self.tables.lock().unwrap().accounts.len() as i64)
    }

    async fn list_by_subscription_status(
        &self,
        status: SubscriptionStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Account>, RepositoryError> {
        self.touch();
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .accounts
            .iter()
            .filter(|a| tables.current(a.id).map(|r| r.status) == Some(status))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryStore {
    async fn get_current(
        &self,
        account_id: Uuid,
    ) -> Result<Option<SubscriptionRecord>, RepositoryError> {
        self.touch();
        Ok(self.tables.lock().unwrap().current(account_id).cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<SubscriptionRecord, RepositoryError> {
        self.touch();
        let tables = self.tables.lock().unwrap();
        tables
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("Subscription {}", id)))
    }

    async fn supersede(
        &self,
        previous_id: Option<Uuid>,
        next: &SubscriptionRecord,
    ) -> Result<(), RepositoryError> {
        self.touch();
        self.write_guard()?;
        self.tables.lock().unwrap().supersede(previous_id, next)
    }

    async fn list_history(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<SubscriptionRecord>, RepositoryError> {
        self.touch();
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .records
            .iter()
            .rev()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn find_current_by_subscription_code(
        &self,
        subscription_code: &str,
    ) -> Result<Option<SubscriptionRecord>, RepositoryError> {
        self.touch();
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .records
            .iter()
            .find(|r| {
                r.is_current && r.provider_subscription_code.as_deref() == Some(subscription_code)
            })
            .cloned())
    }

    async fn list_lapsed(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SubscriptionRecord>, RepositoryError> {
        self.touch();
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .records
            .iter()
            .filter(|r| r.is_current && r.is_lapsed(now))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count_current_by_status(
        &self,
        status: SubscriptionStatus,
    ) -> Result<i64, RepositoryError> {
        self.touch();
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .records
            .iter()
            .filter(|r| r.is_current && r.status == status)
            .count() as i64)
    }
}

#[async_trait]
impl PaymentIntentRepository for InMemoryStore {
    async fn create(&self, intent: &PaymentIntent) -> Result<(), RepositoryError> {
        self.touch();
        let mut tables = self.tables.lock().unwrap();
        if tables.intents.contains_key(&intent.reference) {
            return Err(RepositoryError::Conflict(intent.reference.clone()));
        }
        tables
            .intents
            .insert(intent.reference.clone(), intent.clone());
        Ok(())
    }

    async fn get_by_reference(&self, reference: &str) -> Result<PaymentIntent, RepositoryError> {
        self.touch();
        self.intent(reference)
            .ok_or_else(|| RepositoryError::NotFound(format!("Payment intent {}", reference)))
    }

    async fn mark_discarded(
        &self,
        reference: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.touch();
        let mut tables = self.tables.lock().unwrap();
        if let Some(intent) = tables.intents.get_mut(reference) {
            if intent.status == IntentStatus::Pending {
                intent.status = IntentStatus::Discarded;
                intent.resolved_at = Some(at);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for InMemoryStore {
    async fn get_by_intent_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payment>, RepositoryError> {
        self.touch();
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .payments
            .iter()
            .find(|p| p.intent_reference == reference)
            .cloned())
    }

    async fn commit_fulfillment(
        &self,
        commit: &FulfillmentCommit,
    ) -> Result<FulfillmentOutcome, RepositoryError> {
        self.touch();
        let mut tables = self.tables.lock().unwrap();

        if let Some(existing) = tables
            .payments
            .iter()
            .find(|p| p.intent_reference == commit.payment.intent_reference)
        {
            return Ok(FulfillmentOutcome::AlreadyFulfilled(existing.clone()));
        }
        self.write_guard()?;

        tables.supersede(commit.previous_record_id, &commit.next_record)?;
        tables.payments.push(commit.payment.clone());
        if let Some(intent) = tables.intents.get_mut(&commit.payment.intent_reference) {
            intent.status = IntentStatus::Fulfilled;
            intent.resolved_at = Some(commit.payment.paid_at);
        }
        Ok(FulfillmentOutcome::Applied)
    }

    async fn list_by_account(&self, account_id: Uuid) -> Result<Vec<Payment>, RepositoryError> {
        self.touch();
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .payments
            .iter()
            .rev()
            .filter(|p| p.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Payment>, RepositoryError> {
        self.touch();
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .payments
            .iter()
            .rev()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn total_revenue(&self) -> Result<i64, RepositoryError> {
        self.touch();
        Ok(self.tables.lock().unwrap().payments.iter().map(|p| p.amount).sum())
    }

    async fn monthly_revenue(&self) -> Result<Vec<MonthlyRevenue>, RepositoryError> {
        self.touch();
        let tables = self.tables.lock().unwrap();
        let mut months: BTreeMap<String, (i64, i64)> = BTreeMap::new();
        for payment in &tables.payments {
            let entry = months.entry(payment.billing_month.clone()).or_default();
            entry.0 += payment.amount;
            entry.1 += 1;
        }
        Ok(months
            .into_iter()
            .map(|(month, (amount, payments))| MonthlyRevenue {
                month,
                amount,
                payments,
            })
            .collect())
    }
}

// ============================================================================
// Payment provider
// ============================================================================

/// Paystack stand-in: answers `verify` from a table and signs webhooks with
/// the real HMAC-SHA512 scheme.
pub struct FakeProvider {
    verifications: Mutex<HashMap<String, ProviderVerification>>,
    fail_initialize: AtomicBool,
    delay: Mutex<Option<std::time::Duration>>,
    pub initialized: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            verifications: Mutex::new(HashMap::new()),
            fail_initialize: AtomicBool::new(false),
            delay: Mutex::new(None),
            initialized: AtomicUsize::new(0),
        }
    }

    pub fn set_verification(&self, verification: ProviderVerification) {
        self.verifications
            .lock()
            .unwrap()
            .insert(verification.reference.clone(), verification);
    }

    pub fn fail_initialize(&self) {
        self.fail_initialize.store(true, Ordering::SeqCst);
    }

    /// Stall every provider call by `delay`, like an unresponsive gateway.
    pub fn set_delay(&self, delay: std::time::Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    async fn stall(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn sign(body: &[u8]) -> String {
        webhook_signature(WEBHOOK_SECRET, body).unwrap()
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    async fn initialize(
        &self,
        _email: &str,
        _amount: i64,
        _currency: &str,
        reference: &str,
        _plan: SubscriptionPlan,
    ) -> Result<CheckoutSession, PaymentProviderError> {
        self.stall().await;
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(PaymentProviderError::RequestFailed(
                "connection refused".to_string(),
            ));
        }
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(CheckoutSession {
            authorization_url: format!("https://checkout.paystack.com/{}", reference),
            access_code: format!("ac_{}", reference),
            reference: reference.to_string(),
        })
    }

    async fn verify(&self, reference: &str) -> Result<ProviderVerification, PaymentProviderError> {
        self.stall().await;
        self.verifications
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| PaymentProviderError::Rejected(format!("unknown reference {}", reference)))
    }

    fn verify_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool {
        webhook_signature(WEBHOOK_SECRET, raw_body).as_deref() == Some(signature)
    }
}

pub fn successful_verification(reference: &str, amount: i64) -> ProviderVerification {
    ProviderVerification {
        reference: reference.to_string(),
        status: ProviderPaymentStatus::Success,
        amount,
        currency: "NGN".to_string(),
        customer_email: None,
        customer_code: Some("CUS_test".to_string()),
        authorization_code: Some("AUTH_test".to_string()),
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<FixedClock>,
    pub provider: Arc<FakeProvider>,
    pub ledger: Arc<TestLedger>,
    pub webhooks: TestWebhooks,
    pub reporting: TestReporting,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(LedgerSettings::default())
    }

    pub fn with_settings(settings: LedgerSettings) -> Self {
        let store = Arc::new(InMemoryStore::default());
        let clock = Arc::new(FixedClock::at(t0()));
        let provider = Arc::new(FakeProvider::new());

        let reporting = ReportingService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            settings.currency.clone(),
        );
        let ledger = Arc::new(SubscriptionLedger::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            provider.clone(),
            clock.clone(),
            settings,
        ));
        let webhooks = WebhookProcessor::new(ledger.clone(), provider.clone());

        Self {
            store,
            clock,
            provider,
            ledger,
            webhooks,
            reporting,
        }
    }

    pub async fn register(&self, email: &str) -> (Account, SubscriptionRecord) {
        self.ledger
            .register_account(email.to_string(), Role::User)
            .await
            .unwrap()
    }

    /// Start a checkout as the account owner.
    pub async fn checkout(&self, account_id: Uuid, plan: &str) -> PaymentIntent {
        self.ledger
            .initiate_upgrade(&Caller::Account(account_id), account_id, plan)
            .await
            .unwrap()
            .intent
    }
}
