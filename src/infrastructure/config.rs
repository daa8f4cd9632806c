use crate::domain::SubscriptionPlan;
use chrono::Duration;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    /// Bearer token that identifies admin callers (and the auth service).
    pub admin_token: String,

    // Paystack
    pub paystack_secret_key: String,
    pub paystack_base_url: String,
    pub paystack_callback_url: String,

    // Subscription ledger
    pub trial_days: i64,
    pub bonus_days: i64,
    pub monthly_days: i64,
    pub yearly_days: i64,
    pub admin_activation_days: i64,
    pub monthly_price: i64,
    pub yearly_price: i64,
    pub currency: String,
    pub provider_timeout_secs: u64,
    pub lock_timeout_secs: u64,

    /// Six-field cron expression (with seconds) for the expiry sweep.
    pub expiry_sweep_schedule: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = LedgerSettings::default();
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("MINDSPERO")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_default("server_host", "0.0.0.0")?
            .set_default("server_port", 8080)?
            .set_default("admin_token", "")?
            .set_default("paystack_base_url", "https://api.paystack.co")?
            .set_default("paystack_callback_url", "")?
            .set_default("trial_days", defaults.trial_days)?
            .set_default("bonus_days", defaults.bonus_days)?
            .set_default("monthly_days", defaults.monthly_days)?
            .set_default("yearly_days", defaults.yearly_days)?
            .set_default("admin_activation_days", defaults.admin_activation_days)?
            .set_default("monthly_price", defaults.monthly_price)?
            .set_default("yearly_price", defaults.yearly_price)?
            .set_default("currency", defaults.currency)?
            .set_default("provider_timeout_secs", defaults.provider_timeout_secs)?
            .set_default("lock_timeout_secs", defaults.lock_timeout_secs)?
            .set_default("expiry_sweep_schedule", "0 0 * * * *")?
            .build()?;

        config.try_deserialize()
    }

    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            trial_days: self.trial_days,
            bonus_days: self.bonus_days,
            monthly_days: self.monthly_days,
            yearly_days: self.yearly_days,
            admin_activation_days: self.admin_activation_days,
            monthly_price: self.monthly_price,
            yearly_price: self.yearly_price,
            currency: self.currency.clone(),
            provider_timeout_secs: self.provider_timeout_secs,
            lock_timeout_secs: self.lock_timeout_secs,
        }
    }
}

/// Plan lengths, prices and timeouts injected into the ledger.
///
/// Prices are in minor currency units (kobo for NGN).
#[derive(Debug, Clone, Deserialize, Validate, PartialEq)]
pub struct LedgerSettings {
    #[validate(range(min = 1, max = 36_500))]
    pub trial_days: i64,
    #[validate(range(min = 0, max = 36_500))]
    pub bonus_days: i64,
    #[validate(range(min = 1, max = 36_500))]
    pub monthly_days: i64,
    #[validate(range(min = 1, max = 36_500))]
    pub yearly_days: i64,
    #[validate(range(min = 1, max = 36_500))]
    pub admin_activation_days: i64,
    #[validate(range(min = 1))]
    pub monthly_price: i64,
    #[validate(range(min = 1))]
    pub yearly_price: i64,
    #[validate(length(equal = 3))]
    pub currency: String,
    #[validate(range(min = 1))]
    pub provider_timeout_secs: u64,
    #[validate(range(min = 1))]
    pub lock_timeout_secs: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            trial_days: 30,
            bonus_days: 30,
            monthly_days: 30,
            yearly_days: 365,
            admin_activation_days: 30,
            monthly_price: 2_499,
            yearly_price: 24_999,
            currency: "NGN".to_string(),
            provider_timeout_secs: 15,
            lock_timeout_secs: 10,
        }
    }
}

impl LedgerSettings {
    pub fn trial_length(&self) -> Duration {
        Duration::days(self.trial_days)
    }

    pub fn bonus_length(&self) -> Duration {
        Duration::days(self.bonus_days)
    }

    pub fn admin_activation_length(&self) -> Duration {
        Duration::days(self.admin_activation_days)
    }

    /// Paid period for a plan, without the bonus. `None` for non-purchasable plans.
    pub fn plan_duration(&self, plan: SubscriptionPlan) -> Option<Duration> {
        match plan {
            SubscriptionPlan::Monthly => Some(Duration::days(self.monthly_days)),
            SubscriptionPlan::Yearly => Some(Duration::days(self.yearly_days)),
            SubscriptionPlan::Free => None,
        }
    }

    pub fn plan_price(&self, plan: SubscriptionPlan) -> Option<i64> {
        match plan {
            SubscriptionPlan::Monthly => Some(self.monthly_price),
            SubscriptionPlan::Yearly => Some(self.yearly_price),
            SubscriptionPlan::Free => None,
        }
    }

    pub fn provider_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn lock_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lock_timeout_secs)
    }
}
