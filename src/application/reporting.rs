use crate::domain::{Account, Payment, SubscriptionStatus};
use crate::infrastructure::{
    AccountRepository, MonthlyRevenue, PaymentRepository, RepositoryError, SubscriptionRepository,
};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

const MAX_PAGE_SIZE: i64 = 1000;

#[derive(Error, Debug)]
pub enum ReportingError {
    #[error("Invalid status filter: {0}")]
    InvalidFilter(String),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserStats {
    pub total_users: i64,
    pub trial_users: i64,
    pub active_users: i64,
    pub expired_users: i64,
    pub cancelled_users: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevenueStats {
    pub total_revenue: i64,
    pub currency: String,
    pub monthly_revenue: Vec<MonthlyRevenue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyRevenueBreakdown {
    pub breakdown: Vec<MonthlyRevenue>,
    pub total: i64,
    pub months: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionGrowth {
    pub total_users: i64,
    pub subscribed_users: i64,
    pub trial_users: i64,
    /// Percentage of all accounts currently on a paid subscription.
    pub conversion_rate: f64,
}

/// Read-only admin analytics. Amounts are in minor currency units.
pub struct ReportingService<A, S, P>
where
    A: AccountRepository,
    S: SubscriptionRepository,
    P: PaymentRepository,
{
    account_repo: Arc<A>,
    subscription_repo: Arc<S>,
    payment_repo: Arc<P>,
    currency: String,
}

impl<A, S, P> ReportingService<A, S, P>
where
    A: AccountRepository,
    S: SubscriptionRepository,
    P: PaymentRepository,
{
    pub fn new(
        account_repo: Arc<A>,
        subscription_repo: Arc<S>,
        payment_repo: Arc<P>,
        currency: String,
    ) -> Self {
        Self {
            account_repo,
            subscription_repo,
            payment_repo,
            currency,
        }
    }

    pub async fn user_stats(&self) -> Result<UserStats, ReportingError> {
        Ok(UserStats {
            total_users: self.account_repo.count().await?,
            trial_users: self.count_current(SubscriptionStatus::Trial).await?,
            active_users: self.count_current(SubscriptionStatus::Active).await?,
            expired_users: self.count_current(SubscriptionStatus::Expired).await?,
            cancelled_users: self.count_current(SubscriptionStatus::Cancelled).await?,
        })
    }

    async fn count_current(&self, status: SubscriptionStatus) -> Result<i64, ReportingError> {
        Ok(self.subscription_repo.count_current_by_status(status).await?)
    }

    pub async fn revenue_stats(&self) -> Result<RevenueStats, ReportingError> {
        Ok(RevenueStats {
            total_revenue: self.payment_repo.total_revenue().await?,
            currency: self.currency.clone(),
            monthly_revenue: self.payment_repo.monthly_revenue().await?,
        })
    }

    pub async fn monthly_revenue(&self) -> Result<MonthlyRevenueBreakdown, ReportingError> {
        let breakdown = self.payment_repo.monthly_revenue().await?;

        Ok(MonthlyRevenueBreakdown {
            total: breakdown.iter().map(|m| m.amount).sum(),
            months: breakdown.len(),
            breakdown,
        })
    }

    pub async fn subscription_growth(&self) -> Result<SubscriptionGrowth, ReportingError> {
        let stats = self.user_stats().await?;

        Ok(SubscriptionGrowth {
            total_users: stats.total_users,
            subscribed_users: stats.active_users,
            trial_users: stats.trial_users,
            conversion_rate: conversion_rate(stats.active_users, stats.total_users),
        })
    }

    pub async fn list_payments(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Payment>, ReportingError> {
        let (limit, offset) = clamp_page(limit, offset);
        Ok(self.payment_repo.list(limit, offset).await?)
    }

    /// Accounts by current subscription status. Accepts `free_trial` for `trial`.
    pub async fn filter_accounts(
        &self,
        status: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Account>, ReportingError> {
        let status = parse_status_filter(status)?;
        let (limit, offset) = clamp_page(limit, offset);

        Ok(self
            .account_repo
            .list_by_subscription_status(status, limit, offset)
            .await?)
    }
}

fn conversion_rate(subscribed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    subscribed as f64 / total as f64 * 100.0
}

fn clamp_page(limit: i64, offset: i64) -> (i64, i64) {
    (limit.clamp(1, MAX_PAGE_SIZE), offset.max(0))
}

fn parse_status_filter(status: &str) -> Result<SubscriptionStatus, ReportingError> {
    let normalized = status.trim().to_lowercase();
    if normalized == "free_trial" {
        return Ok(SubscriptionStatus::Trial);
    }
    SubscriptionStatus::from_str(&normalized)
        .map_err(|_| ReportingError::InvalidFilter(status.to_string()))
}
