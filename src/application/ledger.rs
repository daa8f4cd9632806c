use crate::application::AccountLocks;
use crate::domain::{
    Account, Caller, IntentStatus, Payment, PaymentIntent, ProviderIds, Role, SubscriptionPlan,
    SubscriptionRecord, SubscriptionStatus, TransitionError,
};
use crate::infrastructure::{
    AccountRepository, Clock, FulfillmentCommit, FulfillmentOutcome, LedgerSettings,
    PaymentIntentRepository, PaymentProvider, PaymentRepository, ProviderPaymentStatus,
    RepositoryError, SubscriptionRepository,
};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Attempts before a repeatedly conflicting write is reported to the caller.
const MAX_COMMIT_ATTEMPTS: u32 = 3;
/// Records expired per sweep run.
const SWEEP_BATCH: i64 = 500;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),
    #[error("Email already registered: {0}")]
    EmailTaken(String),
    #[error("Payment intent not found: {0}")]
    IntentNotFound(String),
    #[error("Payment intent {0} was discarded")]
    IntentDiscarded(String),
    #[error("Amount mismatch for {reference}: expected {expected}, received {received}")]
    AmountMismatch {
        reference: String,
        expected: i64,
        received: i64,
    },
    #[error("Currency mismatch for {reference}: expected {expected}, received {received}")]
    CurrencyMismatch {
        reference: String,
        expected: String,
        received: String,
    },
    #[error("Provider verified {received} when asked for {requested}")]
    ReferenceMismatch { requested: String, received: String },
    #[error("Subscription period out of range: {0}")]
    PeriodOverflow(String),
    #[error("Invalid webhook signature")]
    SignatureInvalid,
    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("Payment {0} was not successful")]
    PaymentNotSuccessful(String),
    #[error("Not authorized")]
    NotAuthorized,
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("Customer {customer} does not own payment intent {reference}")]
    AccountMismatch { reference: String, customer: String },
    #[error("Malformed event: {0}")]
    MalformedEvent(String),
    #[error("Account {0} is busy, retry later")]
    Busy(Uuid),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl LedgerError {
    /// Failures worth retrying unchanged: contention, provider outages, database trouble.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Busy(_) | LedgerError::ProviderUnavailable(_) => true,
            LedgerError::Repository(e) => matches!(
                e,
                RepositoryError::DatabaseError(_) | RepositoryError::Conflict(_)
            ),
            _ => false,
        }
    }
}

/// A pending intent plus where to send the customer to pay.
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeCheckout {
    pub intent: PaymentIntent,
    pub authorization_url: String,
    pub access_code: String,
}

/// A provider-confirmed payment to apply.
#[derive(Debug, Clone, Default)]
pub struct FulfillmentRequest {
    pub reference: String,
    /// Amount the provider says it charged, in minor units.
    pub amount: i64,
    /// Currency the provider charged in; checked against the intent when present.
    pub currency: Option<String>,
    pub provider_ids: ProviderIds,
    pub authorization_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Fulfillment {
    pub record: SubscriptionRecord,
    pub payment: Payment,
    /// False when the payment had already been applied by an earlier call.
    pub newly_applied: bool,
}

pub struct SubscriptionLedger<A, S, I, P>
where
    A: AccountRepository,
    S: SubscriptionRepository,
    I: PaymentIntentRepository,
    P: PaymentRepository,
{
    account_repo: Arc<A>,
    subscription_repo: Arc<S>,
    intent_repo: Arc<I>,
    payment_repo: Arc<P>,
    provider: Arc<dyn PaymentProvider>,
    clock: Arc<dyn Clock>,
    settings: LedgerSettings,
    locks: AccountLocks,
}

impl<A, S, I, P> SubscriptionLedger<A, S, I, P>
where
    A: AccountRepository,
    S: SubscriptionRepository,
    I: PaymentIntentRepository,
    P: PaymentRepository,
{
    pub fn new(
        account_repo: Arc<A>,
        subscription_repo: Arc<S>,
        intent_repo: Arc<I>,
        payment_repo: Arc<P>,
        provider: Arc<dyn PaymentProvider>,
        clock: Arc<dyn Clock>,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            account_repo,
            subscription_repo,
            intent_repo,
            payment_repo,
            provider,
            clock,
            settings,
            locks: AccountLocks::new(),
        }
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Create the account and its initial trial in one write.
    pub async fn register_account(
        &self,
        email: String,
        role: Role,
    ) -> Result<(Account, SubscriptionRecord), LedgerError> {
        let now = self.clock.now();
        let mut account = Account::new(email, role);
        account.created_at = now;
        let trial = SubscriptionRecord::trial(
            account.id,
            now,
            period_end(now, self.settings.trial_length())?,
        );

        match self.account_repo.create_with_trial(&account, &trial).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => {
                return Err(LedgerError::EmailTaken(account.email));
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            account_id = %account.id,
            end_date = %trial.end_date,
            "Registered account with trial"
        );
        Ok((account, trial))
    }

    /// Start the trial for an account created outside `register_account`.
    /// Returns the existing current record if the account already has one.
    pub async fn open_trial(&self, account: &Account) -> Result<SubscriptionRecord, LedgerError> {
        let _guard = self.lock(account.id).await?;

        if let Some(current) = self.subscription_repo.get_current(account.id).await? {
            return Ok(current);
        }

        let now = self.clock.now();
        let trial = SubscriptionRecord::trial(
            account.id,
            now,
            period_end(now, self.settings.trial_length())?,
        );
        match self.subscription_repo.supersede(None, &trial).await {
            Ok(()) => {
                info!(
                    account_id = %account.id,
                    end_date = %trial.end_date,
                    "Opened trial"
                );
                Ok(trial)
            }
            Err(RepositoryError::Conflict(_)) => self.require_current(account.id).await,
            Err(e) => Err(e.into()),
        }
    }

    pub async fn evaluate_status(
        &self,
        caller: &Caller,
        account_id: Uuid,
    ) -> Result<SubscriptionStatus, LedgerError> {
        Ok(self.current_subscription(caller, account_id).await?.status)
    }

    pub async fn current_subscription(
        &self,
        caller: &Caller,
        account_id: Uuid,
    ) -> Result<SubscriptionRecord, LedgerError> {
        authorize(caller, account_id)?;
        self.refresh_current(account_id).await
    }

    pub async fn subscription_history(
        &self,
        caller: &Caller,
        account_id: Uuid,
    ) -> Result<Vec<SubscriptionRecord>, LedgerError> {
        authorize(caller, account_id)?;
        self.account_repo.get_by_id(account_id).await?;
        Ok(self.subscription_repo.list_history(account_id).await?)
    }

    pub async fn payment_history(
        &self,
        caller: &Caller,
        account_id: Uuid,
    ) -> Result<Vec<Payment>, LedgerError> {
        authorize(caller, account_id)?;
        self.account_repo.get_by_id(account_id).await?;
        Ok(self.payment_repo.list_by_account(account_id).await?)
    }

    pub async fn account_by_email(&self, email: &str) -> Result<Account, LedgerError> {
        Ok(self.account_repo.get_by_email(email).await?)
    }

    pub async fn payment_intent(&self, reference: &str) -> Result<PaymentIntent, LedgerError> {
        self.intent_repo
            .get_by_reference(reference)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(_) => LedgerError::IntentNotFound(reference.to_string()),
                other => LedgerError::Repository(other),
            })
    }

    /// Record an intent and open a provider checkout for it.
    ///
    /// Subscription state is untouched; it only changes on fulfillment.
    pub async fn initiate_upgrade(
        &self,
        caller: &Caller,
        account_id: Uuid,
        plan: &str,
    ) -> Result<UpgradeCheckout, LedgerError> {
        authorize(caller, account_id)?;

        let plan = parse_purchasable_plan(plan)?;
        let amount = self
            .settings
            .plan_price(plan)
            .ok_or_else(|| LedgerError::InvalidPlan(plan.to_string()))?;
        let account = self.account_repo.get_by_id(account_id).await?;

        let intent = PaymentIntent::new(
            generate_reference(),
            account_id,
            plan,
            amount,
            self.settings.currency.clone(),
            self.clock.now(),
        );
        self.intent_repo.create(&intent).await?;

        let initialized = timeout(
            self.settings.provider_timeout(),
            self.provider.initialize(
                &account.email,
                intent.amount,
                &intent.currency,
                &intent.reference,
                plan,
            ),
        )
        .await;

        let session = match initialized {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!("Checkout initialization failed for {}: {}", intent.reference, e);
                self.discard_intent(&intent.reference).await;
                return Err(LedgerError::ProviderUnavailable(e.to_string()));
            }
            Err(_) => {
                warn!("Checkout initialization timed out for {}", intent.reference);
                self.discard_intent(&intent.reference).await;
                return Err(LedgerError::ProviderUnavailable(
                    "checkout initialization timed out".to_string(),
                ));
            }
        };

        info!(
            account_id = %account_id,
            reference = %intent.reference,
            plan = %plan,
            "Initialized upgrade checkout"
        );

        Ok(UpgradeCheckout {
            intent,
            authorization_url: session.authorization_url,
            access_code: session.access_code,
        })
    }

    /// Client-triggered verification: ask the provider, then fulfill.
    pub async fn verify_payment(
        &self,
        caller: &Caller,
        reference: &str,
    ) -> Result<Fulfillment, LedgerError> {
        let intent = self.payment_intent(reference).await?;
        authorize(caller, intent.account_id)?;

        if let Some(existing) = self.existing_fulfillment(reference).await? {
            return Ok(existing);
        }
        if intent.status == IntentStatus::Discarded {
            return Err(LedgerError::IntentDiscarded(reference.to_string()));
        }

        let verification = match timeout(
            self.settings.provider_timeout(),
            self.provider.verify(reference),
        )
        .await
        {
            Ok(Ok(verification)) => verification,
            Ok(Err(e)) => {
                warn!("Verification of {} failed: {}", reference, e);
                return Err(LedgerError::ProviderUnavailable(e.to_string()));
            }
            Err(_) => {
                warn!("Verification of {} timed out", reference);
                return Err(LedgerError::ProviderUnavailable(
                    "verification timed out".to_string(),
                ));
            }
        };

        if verification.reference != reference {
            warn!(
                requested = %reference,
                received = %verification.reference,
                "Provider verified a different reference"
            );
            return Err(LedgerError::ReferenceMismatch {
                requested: reference.to_string(),
                received: verification.reference,
            });
        }
        if verification.status != ProviderPaymentStatus::Success {
            info!(
                "Payment {} not successful: {:?}",
                reference, verification.status
            );
            return Err(LedgerError::PaymentNotSuccessful(reference.to_string()));
        }

        self.fulfill_upgrade(FulfillmentRequest {
            reference: reference.to_string(),
            amount: verification.amount,
            currency: Some(verification.currency),
            provider_ids: ProviderIds {
                customer_code: verification.customer_code,
                subscription_code: None,
            },
            authorization_code: verification.authorization_code,
        })
        .await
    }

    /// Apply a confirmed payment. Idempotent on the intent reference.
    pub async fn fulfill_upgrade(
        &self,
        request: FulfillmentRequest,
    ) -> Result<Fulfillment, LedgerError> {
        let intent = self.payment_intent(&request.reference).await?;

        if let Some(existing) = self.existing_fulfillment(&intent.reference).await? {
            return Ok(existing);
        }
        if intent.status == IntentStatus::Discarded {
            return Err(LedgerError::IntentDiscarded(intent.reference));
        }
        if request.amount != intent.amount {
            warn!(
                reference = %intent.reference,
                expected = intent.amount,
                received = request.amount,
                "Rejected payment with mismatched amount"
            );
            return Err(LedgerError::AmountMismatch {
                reference: intent.reference,
                expected: intent.amount,
                received: request.amount,
            });
        }
        if let Some(currency) = request
            .currency
            .as_deref()
            .filter(|c| !c.eq_ignore_ascii_case(&intent.currency))
        {
            warn!(
                reference = %intent.reference,
                expected = %intent.currency,
                received = %currency,
                "Rejected payment with mismatched currency"
            );
            return Err(LedgerError::CurrencyMismatch {
                expected: intent.currency.clone(),
                received: currency.to_string(),
                reference: intent.reference,
            });
        }

        let paid_period = self
            .settings
            .plan_duration(intent.plan)
            .ok_or_else(|| LedgerError::InvalidPlan(intent.plan.to_string()))?
            .checked_add(&self.settings.bonus_length())
            .ok_or_else(|| LedgerError::PeriodOverflow(format!("{} plus bonus", intent.plan)))?;

        let _guard = self.lock(intent.account_id).await?;

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            // A concurrent call may have won while we waited for the lock.
            if let Some(existing) = self.existing_fulfillment(&intent.reference).await? {
                return Ok(existing);
            }

            let previous = self.subscription_repo.get_current(intent.account_id).await?;
            let now = self.clock.now();
            let record = SubscriptionRecord::activated(
                previous.as_ref(),
                intent.account_id,
                intent.plan,
                period_end(now, paid_period)?,
                request.provider_ids.clone(),
                now,
            );
            let payment =
                Payment::for_intent(&intent, record.id, request.authorization_code.clone(), now);
            let commit = FulfillmentCommit {
                payment: payment.clone(),
                previous_record_id: previous.as_ref().map(|p| p.id),
                next_record: record.clone(),
            };

            match self.payment_repo.commit_fulfillment(&commit).await {
                Ok(FulfillmentOutcome::Applied) => {
                    info!(
                        account_id = %intent.account_id,
                        reference = %intent.reference,
                        plan = %intent.plan,
                        end_date = %record.end_date,
                        "Fulfilled upgrade"
                    );
                    return Ok(Fulfillment {
                        record,
                        payment,
                        newly_applied: true,
                    });
                }
                Ok(FulfillmentOutcome::AlreadyFulfilled(payment)) => {
                    let record = self
                        .subscription_repo
                        .get_by_id(payment.subscription_record_id)
                        .await?;
                    return Ok(Fulfillment {
                        record,
                        payment,
                        newly_applied: false,
                    });
                }
                Err(RepositoryError::Conflict(reason)) if attempt < MAX_COMMIT_ATTEMPTS => {
                    warn!(
                        "Fulfillment of {} conflicted (attempt {}): {}",
                        intent.reference, attempt, reason
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(LedgerError::Busy(intent.account_id))
    }

    /// Cancelling twice is a no-op; cancelling an expired subscription is not allowed.
    pub async fn cancel(
        &self,
        caller: &Caller,
        account_id: Uuid,
    ) -> Result<SubscriptionRecord, LedgerError> {
        authorize(caller, account_id)?;
        self.refresh_current(account_id).await?;

        let record = self
            .apply_transition(account_id, |current, now| Ok(current.cancel(now)?))
            .await?;
        info!("Subscription for account {} is {}", account_id, record.status);
        Ok(record)
    }

    pub async fn force_activate(
        &self,
        caller: &Caller,
        account_id: Uuid,
    ) -> Result<SubscriptionRecord, LedgerError> {
        require_admin(caller)?;
        self.account_repo.get_by_id(account_id).await?;

        let length = self.settings.admin_activation_length();
        let record = self
            .apply_transition(account_id, |current, now| {
                Ok(Some(current.force_activate(period_end(now, length)?, now)))
            })
            .await?;
        info!(
            account_id = %account_id,
            end_date = %record.end_date,
            "Admin activated subscription"
        );
        Ok(record)
    }

    pub async fn force_deactivate(
        &self,
        caller: &Caller,
        account_id: Uuid,
    ) -> Result<SubscriptionRecord, LedgerError> {
        require_admin(caller)?;
        self.account_repo.get_by_id(account_id).await?;

        let record = self
            .apply_transition(account_id, |current, now| Ok(current.force_deactivate(now)))
            .await?;
        info!("Admin deactivated subscription for account {}", account_id);
        Ok(record)
    }

    /// Store the provider's recurring-subscription codes on the current record.
    pub async fn attach_provider_subscription(
        &self,
        email: &str,
        ids: ProviderIds,
    ) -> Result<SubscriptionRecord, LedgerError> {
        let account = self.account_by_email(email).await?;
        let record = self
            .apply_transition(account.id, |current, now| {
                Ok(current.with_provider_ids(&ids, now))
            })
            .await?;
        debug!("Attached provider subscription to account {}", account.id);
        Ok(record)
    }

    /// Provider-side cancellation of a recurring subscription.
    pub async fn cancel_provider_subscription(
        &self,
        subscription_code: &str,
    ) -> Result<SubscriptionRecord, LedgerError> {
        let current = self
            .subscription_repo
            .find_current_by_subscription_code(subscription_code)
            .await?
            .ok_or_else(|| LedgerError::SubscriptionNotFound(subscription_code.to_string()))?;

        let record = self
            .apply_transition(current.account_id, |current, now| {
                if current.provider_subscription_code.as_deref() != Some(subscription_code) {
                    return Ok(None);
                }
                Ok(current.cancel(now).ok().flatten())
            })
            .await?;
        info!(
            "Provider cancelled subscription {} for account {}",
            subscription_code, record.account_id
        );
        Ok(record)
    }

    /// Expire every current trial/active record past its end date.
    pub async fn sweep_expired(&self) -> Result<usize, LedgerError> {
        let now = self.clock.now();
        let lapsed = self.subscription_repo.list_lapsed(now, SWEEP_BATCH).await?;
        let mut expired = 0;

        for record in lapsed {
            match self.refresh_current(record.account_id).await {
                Ok(current) if current.status == SubscriptionStatus::Expired => expired += 1,
                Ok(_) => {}
                Err(e) => error!(
                    "Failed to expire subscription for account {}: {}",
                    record.account_id, e
                ),
            }
        }

        if expired > 0 {
            info!("Expiry sweep expired {} subscriptions", expired);
        }
        Ok(expired)
    }

    /// The current record, with a lapsed trial/active record persisted as expired first.
    async fn refresh_current(&self, account_id: Uuid) -> Result<SubscriptionRecord, LedgerError> {
        let current = self.require_current(account_id).await?;
        if !current.is_lapsed(self.clock.now()) {
            return Ok(current);
        }

        let record = self
            .apply_transition(account_id, |current, now| Ok(current.expire(now)))
            .await?;
        if record.status == SubscriptionStatus::Expired {
            info!("Subscription for account {} expired", account_id);
        }
        Ok(record)
    }

    /// Read-decide-write under the account lock, retrying when another
    /// writer retires the record first. `next` returning `None` means no change.
    async fn apply_transition<F>(
        &self,
        account_id: Uuid,
        mut next: F,
    ) -> Result<SubscriptionRecord, LedgerError>
    where
        F: FnMut(&SubscriptionRecord, DateTime<Utc>) -> Result<Option<SubscriptionRecord>, LedgerError>,
    {
        let _guard = self.lock(account_id).await?;

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let current = self.require_current(account_id).await?;
            let Some(successor) = next(&current, self.clock.now())? else {
                return Ok(current);
            };

            match self
                .subscription_repo
                .supersede(Some(current.id), &successor)
                .await
            {
                Ok(()) => return Ok(successor),
                Err(RepositoryError::Conflict(reason)) if attempt < MAX_COMMIT_ATTEMPTS => {
                    warn!(
                        "Transition for account {} conflicted (attempt {}): {}",
                        account_id, attempt, reason
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(LedgerError::Busy(account_id))
    }

    async fn require_current(&self, account_id: Uuid) -> Result<SubscriptionRecord, LedgerError> {
        self.subscription_repo
            .get_current(account_id)
            .await?
            .ok_or_else(|| LedgerError::SubscriptionNotFound(account_id.to_string()))
    }

    async fn existing_fulfillment(
        &self,
        reference: &str,
    ) -> Result<Option<Fulfillment>, LedgerError> {
        let Some(payment) = self.payment_repo.get_by_intent_reference(reference).await? else {
            return Ok(None);
        };
        let record = self
            .subscription_repo
            .get_by_id(payment.subscription_record_id)
            .await?;
        debug!("Payment {} already fulfilled", reference);

        Ok(Some(Fulfillment {
            record,
            payment,
            newly_applied: false,
        }))
    }

    async fn lock(&self, account_id: Uuid) -> Result<OwnedMutexGuard<()>, LedgerError> {
        timeout(self.settings.lock_timeout(), self.locks.acquire(account_id))
            .await
            .map_err(|_| {
                warn!("Timed out waiting for lock on account {}", account_id);
                LedgerError::Busy(account_id)
            })
    }

    async fn discard_intent(&self, reference: &str) {
        if let Err(e) = self
            .intent_repo
            .mark_discarded(reference, self.clock.now())
            .await
        {
            error!("Failed to discard payment intent {}: {}", reference, e);
        }
    }
}

fn period_end(now: DateTime<Utc>, length: Duration) -> Result<DateTime<Utc>, LedgerError> {
    now.checked_add_signed(length).ok_or_else(|| {
        LedgerError::PeriodOverflow(format!("{} + {} days", now, length.num_days()))
    })
}

fn authorize(caller: &Caller, account_id: Uuid) -> Result<(), LedgerError> {
    if caller.can_act_for(account_id) {
        Ok(())
    } else {
        Err(LedgerError::NotAuthorized)
    }
}

fn require_admin(caller: &Caller) -> Result<(), LedgerError> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(LedgerError::NotAuthorized)
    }
}

fn parse_purchasable_plan(plan: &str) -> Result<SubscriptionPlan, LedgerError> {
    SubscriptionPlan::from_str(&plan.trim().to_lowercase())
        .ok()
        .filter(|p| p.is_purchasable())
        .ok_or_else(|| LedgerError::InvalidPlan(plan.to_string()))
}

/// Opaque, unguessable payment reference.
fn generate_reference() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("msp_{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{
        CheckoutSession, MockAccountRepository, MockPaymentIntentRepository,
        MockPaymentProvider, MockPaymentRepository, MockSubscriptionRepository,
        PaymentProviderError, SystemClock,
    };
    use chrono::Duration;
    use mockall::predicate::eq;
    use tokio_test::assert_ok;

    struct Mocks {
        accounts: MockAccountRepository,
        subscriptions: MockSubscriptionRepository,
        intents: MockPaymentIntentRepository,
        payments: MockPaymentRepository,
        provider: MockPaymentProvider,
    }

    impl Mocks {
        fn new() -> Self {
            Self {
                accounts: MockAccountRepository::new(),
                subscriptions: MockSubscriptionRepository::new(),
                intents: MockPaymentIntentRepository::new(),
                payments: MockPaymentRepository::new(),
                provider: MockPaymentProvider::new(),
            }
        }

        fn build(
            self,
        ) -> SubscriptionLedger<
            MockAccountRepository,
            MockSubscriptionRepository,
            MockPaymentIntentRepository,
            MockPaymentRepository,
        > {
            SubscriptionLedger::new(
                Arc::new(self.accounts),
                Arc::new(self.subscriptions),
                Arc::new(self.intents),
                Arc::new(self.payments),
                Arc::new(self.provider),
                Arc::new(SystemClock),
                LedgerSettings::default(),
            )
        }
    }

    fn pending_intent(account_id: Uuid) -> PaymentIntent {
        PaymentIntent::new(
            "msp_test".to_string(),
            account_id,
            SubscriptionPlan::Monthly,
            2_499,
            "NGN".to_string(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn initiate_rejects_unpurchasable_plans_before_touching_anything() {
        let ledger = Mocks::new().build();
        let account_id = Uuid::new_v4();
        let caller = Caller::Account(account_id);

        for plan in ["free", "weekly", ""] {
            let err = ledger
                .initiate_upgrade(&caller, account_id, plan)
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidPlan(_)), "{plan}: {err}");
        }
    }

    #[tokio::test]
    async fn initiate_for_someone_else_is_not_authorized() {
        let ledger = Mocks::new().build();
        let err = ledger
            .initiate_upgrade(&Caller::Account(Uuid::new_v4()), Uuid::new_v4(), "monthly")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotAuthorized));
    }

    #[tokio::test]
    async fn initiate_returns_checkout_with_plan_price() {
        let account = Account::new("ada@example.com".to_string(), Role::User);
        let account_id = account.id;
        let mut mocks = Mocks::new();

        mocks
            .accounts
            .expect_get_by_id()
            .with(eq(account_id))
            .returning(move |_| Ok(account.clone()));
        mocks
            .intents
            .expect_create()
            .withf(|intent| intent.amount == 24_999 && intent.status == IntentStatus::Pending)
            .times(1)
            .returning(|_| Ok(()));
        mocks
            .provider
            .expect_initialize()
            .withf(|email, amount, currency, reference, plan| {
                email == "ada@example.com"
                    && *amount == 24_999
                    && currency == "NGN"
                    && reference.starts_with("msp_")
                    && *plan == SubscriptionPlan::Yearly
            })
            .returning(|_, _, _, reference, _| {
                Ok(CheckoutSession {
                    authorization_url: "https://checkout.paystack.com/abc".to_string(),
                    access_code: "abc".to_string(),
                    reference: reference.to_string(),
                })
            });
        mocks.intents.expect_mark_discarded().times(0);

        let ledger = mocks.build();
        let checkout = assert_ok!(
            ledger
                .initiate_upgrade(&Caller::Account(account_id), account_id, " Yearly ")
                .await
        );
        assert_eq!(checkout.intent.plan, SubscriptionPlan::Yearly);
        assert_eq!(checkout.authorization_url, "https://checkout.paystack.com/abc");
    }

    #[tokio::test]
    async fn initiate_discards_intent_when_provider_fails() {
        let account = Account::new("ada@example.com".to_string(), Role::User);
        let account_id = account.id;
        let mut mocks = Mocks::new();

        mocks
            .accounts
            .expect_get_by_id()
            .returning(move |_| Ok(account.clone()));
        mocks.intents.expect_create().returning(|_| Ok(()));
        mocks
            .provider
            .expect_initialize()
            .returning(|_, _, _, _, _| Err(PaymentProviderError::RequestFailed("down".into())));
        mocks
            .intents
            .expect_mark_discarded()
            .withf(|reference, _| reference.starts_with("msp_"))
            .times(1)
            .returning(|_, _| Ok(()));

        let ledger = mocks.build();
        let err = ledger
            .initiate_upgrade(&Caller::Admin, account_id, "monthly")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ProviderUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn amount_mismatch_writes_nothing() {
        let account_id = Uuid::new_v4();
        let intent = pending_intent(account_id);
        let mut mocks = Mocks::new();

        mocks
            .intents
            .expect_get_by_reference()
            .returning(move |_| Ok(intent.clone()));
        mocks
            .payments
            .expect_get_by_intent_reference()
            .returning(|_| Ok(None));
        mocks.payments.expect_commit_fulfillment().times(0);
        mocks.subscriptions.expect_supersede().times(0);

        let ledger = mocks.build();
        let err = ledger
            .fulfill_upgrade(FulfillmentRequest {
                reference: "msp_test".to_string(),
                amount: 100,
                ..FulfillmentRequest::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::AmountMismatch {
                expected: 2_499,
                received: 100,
                ..
            }
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn unknown_reference_is_intent_not_found() {
        let mut mocks = Mocks::new();
        mocks
            .intents
            .expect_get_by_reference()
            .returning(|r| Err(RepositoryError::NotFound(r.to_string())));

        let ledger = mocks.build();
        let err = ledger
            .fulfill_upgrade(FulfillmentRequest {
                reference: "msp_missing".to_string(),
                amount: 2_499,
                ..FulfillmentRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::IntentNotFound(r) if r == "msp_missing"));
    }

    #[tokio::test]
    async fn verify_does_not_call_provider_when_already_fulfilled() {
        let account_id = Uuid::new_v4();
        let intent = pending_intent(account_id);
        let record =
            SubscriptionRecord::trial(account_id, Utc::now(), Utc::now() + Duration::days(30));
        let payment = Payment::for_intent(&intent, record.id, None, Utc::now());
        let mut mocks = Mocks::new();

        mocks
            .intents
            .expect_get_by_reference()
            .returning(move |_| Ok(intent.clone()));
        mocks
            .payments
            .expect_get_by_intent_reference()
            .returning(move |_| Ok(Some(payment.clone())));
        mocks
            .subscriptions
            .expect_get_by_id()
            .returning(move |_| Ok(record.clone()));
        mocks.provider.expect_verify().times(0);

        let ledger = mocks.build();
        let fulfillment = assert_ok!(
            ledger
                .verify_payment(&Caller::Account(account_id), "msp_test")
                .await
        );
        assert!(!fulfillment.newly_applied);
    }

    #[tokio::test]
    async fn failed_verification_is_not_applied() {
        let account_id = Uuid::new_v4();
        let intent = pending_intent(account_id);
        let mut mocks = Mocks::new();

        mocks
            .intents
            .expect_get_by_reference()
            .returning(move |_| Ok(intent.clone()));
        mocks
            .payments
            .expect_get_by_intent_reference()
            .returning(|_| Ok(None));
        mocks.provider.expect_verify().returning(|reference| {
            Ok(crate::infrastructure::ProviderVerification {
                reference: reference.to_string(),
                status: ProviderPaymentStatus::Failed,
                amount: 2_499,
                currency: "NGN".to_string(),
                customer_email: None,
                customer_code: None,
                authorization_code: None,
            })
        });
        mocks.payments.expect_commit_fulfillment().times(0);

        let ledger = mocks.build();
        let err = ledger
            .verify_payment(&Caller::Account(account_id), "msp_test")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PaymentNotSuccessful(_)));
    }

    #[tokio::test]
    async fn verification_for_another_reference_is_not_applied() {
        let account_id = Uuid::new_v4();
        let intent = pending_intent(account_id);
        let mut mocks = Mocks::new();

        mocks
            .intents
            .expect_get_by_reference()
            .returning(move |_| Ok(intent.clone()));
        mocks
            .payments
            .expect_get_by_intent_reference()
            .returning(|_| Ok(None));
        mocks.provider.expect_verify().returning(|_| {
            Ok(crate::infrastructure::ProviderVerification {
                reference: "msp_other".to_string(),
                status: ProviderPaymentStatus::Success,
                amount: 2_499,
                currency: "NGN".to_string(),
                customer_email: None,
                customer_code: None,
                authorization_code: None,
            })
        });
        mocks.payments.expect_commit_fulfillment().times(0);

        let ledger = mocks.build();
        let err = ledger
            .verify_payment(&Caller::Account(account_id), "msp_test")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::ReferenceMismatch { ref requested, ref received }
                if requested == "msp_test" && received == "msp_other"
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn currency_mismatch_writes_nothing() {
        let account_id = Uuid::new_v4();
        let intent = pending_intent(account_id);
        let mut mocks = Mocks::new();

        mocks
            .intents
            .expect_get_by_reference()
            .returning(move |_| Ok(intent.clone()));
        mocks
            .payments
            .expect_get_by_intent_reference()
            .returning(|_| Ok(None));
        mocks.payments.expect_commit_fulfillment().times(0);

        let ledger = mocks.build();
        let err = ledger
            .fulfill_upgrade(FulfillmentRequest {
                reference: "msp_test".to_string(),
                amount: 2_499,
                currency: Some("USD".to_string()),
                ..FulfillmentRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::CurrencyMismatch { ref received, .. } if received == "USD"
        ));
    }

    #[tokio::test]
    async fn admin_overrides_require_admin() {
        let ledger = Mocks::new().build();
        let account_id = Uuid::new_v4();
        let owner = Caller::Account(account_id);

        assert!(matches!(
            ledger.force_activate(&owner, account_id).await,
            Err(LedgerError::NotAuthorized)
        ));
        assert!(matches!(
            ledger.force_deactivate(&owner, account_id).await,
            Err(LedgerError::NotAuthorized)
        ));
    }

    #[test]
    fn references_are_opaque_and_unique() {
        let a = generate_reference();
        let b = generate_reference();
        assert_ne!(a, b);
        assert!(a.starts_with("msp_"));
        assert_eq!(a.len(), 4 + 32);
    }
}
