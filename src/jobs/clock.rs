//! Scheduler - Periodic balance refresh trigger.
//!
//! Each tick terminates expired wallets, asks the [`WalletRepository`] which wallets
//! need a refresh and enqueues one task per wallet. Ticks never overlap: a tick that
//! starts while another is still running returns [`TickOutcome::Skipped`].

use crate::{
    core::{
        entitlement::Entitlements, repository::WalletRepository,
        wallet::terminate_expired_wallets,
    },
    errors::Result,
    jobs::worker::JobContext,
    queue::{Task, TaskQueue},
};
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

/// Result of one scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was still running
    Skipped,
    /// Premium features are not licensed; nothing was done
    NotEntitled,
    /// Refreshes were enqueued
    Dispatched {
        /// Wallets terminated because they expired
        terminated: usize,
        /// Refresh tasks enqueued
        enqueued: usize,
    },
}

/// Clears the in-flight flag when the tick ends, including on error.
struct TickGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Periodic trigger for wallet balance refreshes.
#[derive(Clone)]
pub struct Clock {
    repository: Arc<dyn WalletRepository>,
    db: DatabaseConnection,
    queue: TaskQueue,
    entitlements: Arc<dyn Entitlements>,
    in_flight: Arc<AtomicBool>,
    interval: Duration,
}

impl Clock {
    /// Creates a clock ticking every `interval`, sharing the worker's handles.
    #[must_use]
    pub fn new(
        repository: Arc<dyn WalletRepository>,
        ctx: &JobContext,
        interval: Duration,
    ) -> Self {
        Self {
            repository,
            db: ctx.db.clone(),
            queue: ctx.queue.clone(),
            entitlements: Arc::clone(&ctx.entitlements),
            in_flight: Arc::new(AtomicBool::new(false)),
            interval,
        }
    }

    fn try_begin(&self) -> Option<TickGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TickGuard {
                flag: Arc::clone(&self.in_flight),
            })
    }

    /// Runs one scheduler pass at `now`.
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        let Some(_guard) = self.try_begin() else {
            warn!("Previous balance refresh tick still running, skipping");
            return Ok(TickOutcome::Skipped);
        };

        if !self.entitlements.is_premium() {
            return Ok(TickOutcome::NotEntitled);
        }

        let terminated = terminate_expired_wallets(&self.db, now).await?;
        let wallets = self.repository.ready_to_be_refreshed(now).await?;

        let mut enqueued = 0;
        for wallet in &wallets {
            self.queue
                .enqueue(Task::RefreshWalletBalance {
                    wallet_id: wallet.id,
                })
                .await?;
            enqueued += 1;
        }

        if !terminated.is_empty() || enqueued > 0 {
            info!(
                terminated = terminated.len(),
                enqueued, "Balance refresh tick dispatched"
            );
        }
        Ok(TickOutcome::Dispatched {
            terminated: terminated.len(),
            enqueued,
        })
    }

    /// Ticks every interval until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs(), "Clock started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let clock = self.clone();
                    // A slow tick must not delay the next one; single-flight skips overlaps
                    tokio::spawn(async move {
                        if let Err(e) = clock.tick(Utc::now()).await {
                            error!(error = %e, "Balance refresh tick failed");
                        }
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Clock stopped");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::{
        locks::WalletLocks,
        repository::SeaOrmWalletRepository,
        transaction::{create_inbound_transactions, record_consumption},
    };
    use crate::entities::{Wallet, wallet::WalletStatus, wallet_transaction::TransactionSource};
    use crate::test_utils::*;
    use rust_decimal::Decimal;
    use sea_orm::{ActiveModelTrait, EntityTrait, Set};

    fn clock_for(ctx: &TestContext) -> Clock {
        Clock::new(
            Arc::new(SeaOrmWalletRepository::new(ctx.db.clone())),
            &ctx.job,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() -> Result<()> {
        let ctx = setup_job_context(true).await?;
        let clock = clock_for(&ctx);

        let guard = clock.try_begin();
        assert!(guard.is_some());
        assert_eq!(clock.tick(Utc::now()).await?, TickOutcome::Skipped);

        drop(guard);
        assert!(matches!(
            clock.tick(Utc::now()).await?,
            TickOutcome::Dispatched { .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_tick_without_premium_does_nothing() -> Result<()> {
        let ctx = setup_job_context(false).await?;
        let customer = create_test_customer(&ctx.db, "acme").await?;
        let wallet = create_custom_wallet(&ctx.db, customer.id, "EUR", Decimal::ONE).await?;
        record_consumption(&ctx.db, &WalletLocks::new(), wallet.id, Decimal::ONE, false).await?;

        let mut expired: crate::entities::wallet::ActiveModel = wallet.clone().into();
        expired.expiration_at = Set(Some(Utc::now() - chrono::Duration::days(1)));
        expired.update(&ctx.db).await?;

        let clock = clock_for(&ctx);
        assert_eq!(clock.tick(Utc::now()).await?, TickOutcome::NotEntitled);

        let unchanged = Wallet::find_by_id(wallet.id).one(&ctx.db).await?.unwrap();
        assert_eq!(unchanged.status, WalletStatus::Active);
        assert!(drain_tasks(&ctx).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_tick_enqueues_one_refresh_per_eligible_wallet() -> Result<()> {
        let ctx = setup_job_context(true).await?;
        let flagged_customer = create_test_customer(&ctx.db, "acme").await?;
        let idle_customer = create_test_customer(&ctx.db, "globex").await?;
        let flagged =
            create_custom_wallet(&ctx.db, flagged_customer.id, "EUR", Decimal::ONE).await?;
        create_custom_wallet(&ctx.db, idle_customer.id, "EUR", Decimal::ONE).await?;
        record_consumption(&ctx.db, &ctx.locks, flagged.id, Decimal::ONE, false).await?;

        let clock = clock_for(&ctx);
        assert_eq!(
            clock.tick(Utc::now()).await?,
            TickOutcome::Dispatched {
                terminated: 0,
                enqueued: 1
            }
        );

        let tasks = drain_tasks(&ctx).await?;
        assert_eq!(
            tasks,
            vec![Task::RefreshWalletBalance {
                wallet_id: flagged.id
            }]
        );

        let refreshed = Wallet::find_by_id(flagged.id).one(&ctx.db).await?.unwrap();
        assert!(!refreshed.ready_to_be_refreshed);
        assert_eq!(refreshed.credits_ongoing_balance, Decimal::from(-1));
        Ok(())
    }

    #[tokio::test]
    async fn test_tick_terminates_expired_wallets() -> Result<()> {
        let ctx = setup_job_context(true).await?;
        let customer = create_test_customer(&ctx.db, "acme").await?;
        let wallet = create_custom_wallet(&ctx.db, customer.id, "EUR", Decimal::ONE).await?;

        let mut expiring: crate::entities::wallet::ActiveModel = wallet.clone().into();
        expiring.expiration_at = Set(Some(Utc::now() - chrono::Duration::minutes(1)));
        expiring.ready_to_be_refreshed = Set(true);
        expiring.update(&ctx.db).await?;

        let clock = clock_for(&ctx);
        assert_eq!(
            clock.tick(Utc::now()).await?,
            TickOutcome::Dispatched {
                terminated: 1,
                enqueued: 0
            }
        );

        let terminated = Wallet::find_by_id(wallet.id).one(&ctx.db).await?.unwrap();
        assert_eq!(terminated.status, WalletStatus::Terminated);
        Ok(())
    }
    #[tokio::test]
    async fn test_threshold_fires_when_credits_land_before_the_tick() -> Result<()> {
        let ctx = setup_job_context(true).await?;
        let customer = create_test_customer(&ctx.db, "acme").await?;
        let wallet = create_wallet_with_rule(
            &ctx,
            customer.id,
            crate::core::recurring_rule::RecurringRuleParams {
                rule_type: "threshold".to_string(),
                threshold_credits: Some("1".to_string()),
                paid_credits: Some("10".to_string()),
                ..Default::default()
            },
        )
        .await?;

        create_inbound_transactions(
            &ctx.db,
            &ctx.locks,
            wallet.id,
            Decimal::from(5),
            Decimal::ZERO,
            TransactionSource::Manual,
        )
        .await?;
        record_consumption(&ctx.db, &ctx.locks, wallet.id, Decimal::new(45, 1), false).await?;
        create_inbound_transactions(
            &ctx.db,
            &ctx.locks,
            wallet.id,
            Decimal::ZERO,
            Decimal::new(1, 1),
            TransactionSource::Manual,
        )
        .await?;

        let clock = clock_for(&ctx);
        assert_eq!(
            clock.tick(Utc::now()).await?,
            TickOutcome::Dispatched {
                terminated: 0,
                enqueued: 1
            }
        );

        let tasks = drain_tasks(&ctx).await?;
        assert_eq!(tasks.len(), 2);
        let topped_up = Wallet::find_by_id(wallet.id).one(&ctx.db).await?.unwrap();
        assert_eq!(topped_up.credits_ongoing_balance, Decimal::new(106, 1));
        Ok(())
    }
}
