//! Eligibility query for the scheduled balance refresh.
//!
//! The scheduler only asks one question: which wallets need a refresh now. Keeping
//! the criteria behind [`WalletRepository`] lets the clock be tested against any
//! implementation.

use crate::{
    core::recurring_rule::is_interval_due,
    entities::{
        RecurringTransactionRule, Wallet, recurring_transaction_rule::RuleStatus,
        wallet::{self, WalletStatus},
    },
    errors::Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, QueryOrder, prelude::*};

/// Data access used by the scheduler.
#[async_trait]
pub trait WalletRepository: Send + Sync {
    /// Wallets to refresh at `now`: active, not expired, and either flagged
    /// `ready_to_be_refreshed` or holding an interval rule whose period elapsed.
    async fn ready_to_be_refreshed(&self, now: DateTime<Utc>) -> Result<Vec<wallet::Model>>;
}

/// [`WalletRepository`] backed by the service database.
#[derive(Debug, Clone)]
pub struct SeaOrmWalletRepository {
    db: DatabaseConnection,
}

impl SeaOrmWalletRepository {
    /// Wraps a database connection.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WalletRepository for SeaOrmWalletRepository {
    async fn ready_to_be_refreshed(&self, now: DateTime<Utc>) -> Result<Vec<wallet::Model>> {
        let wallets_with_rules = Wallet::find()
            .filter(wallet::Column::Status.eq(WalletStatus::Active))
            .order_by_asc(wallet::Column::Id)
            .find_with_related(RecurringTransactionRule)
            .all(&self.db)
            .await?;

        Ok(wallets_with_rules
            .into_iter()
            .filter(|(wallet, _)| !wallet.is_expired(now))
            .filter(|(wallet, rules)| {
                wallet.ready_to_be_refreshed
                    || rules
                        .iter()
                        .filter(|rule| rule.status == RuleStatus::Active)
                        .any(|rule| is_interval_due(rule, wallet, now))
            })
            .map(|(wallet, _)| wallet)
            .collect())
    }
}
