//! Background task execution.
//!
//! The worker drains the [`TaskQueue`] and runs up to `concurrency` tasks at once.
//! Delivery is at-least-once: a failing task is retried with exponential backoff
//! until `max_attempts` is reached, then logged and dropped.

use crate::{
    config::settings::QueueSettings,
    core::{
        balance::refresh_wallet_balance, entitlement::Entitlements, locks::WalletLocks,
        recurring_rule::evaluate_wallet_rules, transaction::create_inbound_transactions,
    },
    errors::Result,
    queue::{Task, TaskQueue, TaskReceiver},
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, info, instrument, warn};

/// Shared handles every task needs.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Database connection
    pub db: DatabaseConnection,
    /// Queue for follow-up tasks
    pub queue: TaskQueue,
    /// Licensed features
    pub entitlements: Arc<dyn Entitlements>,
    /// Per-wallet serialization
    pub locks: WalletLocks,
}

/// Runs a single task once.
#[instrument(skip(ctx, task), fields(task = task.name(), wallet_id = task.wallet_id()))]
pub async fn perform(ctx: &JobContext, task: &Task) -> Result<()> {
    match task {
        Task::CreateWalletTransaction(payload) => {
            create_inbound_transactions(
                &ctx.db,
                &ctx.locks,
                payload.wallet_id,
                payload.paid_credits,
                payload.granted_credits,
                payload.source,
            )
            .await?;
        }
        Task::RefreshWalletBalance { wallet_id } => {
            let now = Utc::now();
            if refresh_wallet_balance(&ctx.db, &ctx.locks, *wallet_id, now)
                .await?
                .is_some()
            {
                evaluate_wallet_rules(
                    &ctx.db,
                    &ctx.locks,
                    &ctx.queue,
                    ctx.entitlements.as_ref(),
                    *wallet_id,
                    now,
                )
                .await?;
            }
        }
    }
    Ok(())
}

/// Retry behaviour applied to every task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled after each failure
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Builds the policy from the `[queue]` settings section.
    #[must_use]
    pub const fn from_settings(settings: &QueueSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.retry_base_ms),
        }
    }

    /// Delay before attempt number `attempt` (1-based, the first retry is 2).
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2).min(16);
        self.base_delay.saturating_mul(2_u32.pow(exponent))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&QueueSettings::default())
    }
}

/// Runs `task`, retrying on failure. Returns whether it eventually succeeded.
pub async fn execute_with_retry(ctx: &JobContext, task: &Task, policy: RetryPolicy) -> bool {
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            let delay = policy.delay_before(attempt);
            debug!(
                task = task.name(),
                wallet_id = task.wallet_id(),
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Retrying task"
            );
            tokio::time::sleep(delay).await;
        }

        match perform(ctx, task).await {
            Ok(()) => {
                if attempt > 1 {
                    info!(
                        task = task.name(),
                        wallet_id = task.wallet_id(),
                        attempt,
                        "Task succeeded after retry"
                    );
                }
                return true;
            }
            Err(e) if attempt < max_attempts => {
                warn!(
                    task = task.name(),
                    wallet_id = task.wallet_id(),
                    attempt,
                    error = %e,
                    "Task failed, will retry"
                );
            }
            Err(e) => {
                error!(
                    task = task.name(),
                    wallet_id = task.wallet_id(),
                    max_attempts,
                    error = %e,
                    "Task failed after all attempts"
                );
            }
        }
    }
    false
}

/// Consumes the task queue until shutdown.
pub struct Worker {
    ctx: Arc<JobContext>,
    receiver: TaskReceiver,
    concurrency: usize,
    retry: RetryPolicy,
}

impl Worker {
    /// Creates a worker over `receiver` using the `[queue]` settings.
    #[must_use]
    pub fn new(ctx: Arc<JobContext>, receiver: TaskReceiver, settings: &QueueSettings) -> Self {
        Self {
            ctx,
            receiver,
            concurrency: settings.concurrency.max(1),
            retry: RetryPolicy::from_settings(settings),
        }
    }

    /// Processes tasks until `shutdown` flips to `true` or every producer is gone,
    /// then waits for in-flight tasks to finish.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        info!(concurrency = self.concurrency, "Task worker started");

        loop {
            // Take a slot before a task so no received task waits outside the pool
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let task = tokio::select! {
                task = self.receiver.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let ctx = Arc::clone(&self.ctx);
            let retry = self.retry;
            tokio::spawn(async move {
                execute_with_retry(&ctx, &task, retry).await;
                drop(permit);
            });
        }

        // Wait for running tasks; queued ones stay undelivered
        let concurrency = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        if permits.acquire_many(concurrency).await.is_ok() {
            info!("Task worker stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::entities::{Wallet, wallet_transaction::TransactionSource};
    use crate::queue::CreateTransactionTask;
    use crate::test_utils::*;
    use rust_decimal::Decimal;
    use sea_orm::EntityTrait;

    #[test]
    fn test_retry_delays_double() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_before(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before(4), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_perform_create_transaction() -> Result<()> {
        let ctx = setup_job_context(false).await?;
        let customer = create_test_customer(&ctx.db, "acme").await?;
        let wallet = create_custom_wallet(&ctx.db, customer.id, "EUR", Decimal::ONE).await?;

        let task = Task::CreateWalletTransaction(CreateTransactionTask {
            wallet_id: wallet.id,
            paid_credits: Decimal::from(2),
            granted_credits: Decimal::from(3),
            source: TransactionSource::Manual,
        });
        perform(&ctx.job, &task).await?;

        let updated = Wallet::find_by_id(wallet.id).one(&ctx.db).await?.unwrap();
        assert_eq!(updated.credits_balance, Decimal::from(5));
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_task_gives_up_after_max_attempts() -> Result<()> {
        let ctx = setup_job_context(false).await?;
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
        };

        let task = Task::RefreshWalletBalance { wallet_id: 404 };
        assert!(!execute_with_retry(&ctx.job, &task, policy).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_worker_runs_tasks_until_shutdown() -> Result<()> {
        let db = setup_test_db().await?;
        let customer = create_test_customer(&db, "acme").await?;
        let wallet = create_custom_wallet(&db, customer.id, "EUR", Decimal::ONE).await?;

        let (queue, receiver) = crate::queue::TaskQueue::new(8);
        let ctx = Arc::new(JobContext {
            db: db.clone(),
            queue: queue.clone(),
            entitlements: Arc::new(crate::core::entitlement::License::new(false)),
            locks: WalletLocks::new(),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Worker::new(ctx, receiver, &QueueSettings::default());
        let handle = tokio::spawn(worker.run(shutdown_rx));

        queue
            .enqueue(Task::CreateWalletTransaction(CreateTransactionTask {
                wallet_id: wallet.id,
                paid_credits: Decimal::from(7),
                granted_credits: Decimal::ZERO,
                source: TransactionSource::Manual,
            }))
            .await?;

        let mut balance = Decimal::ZERO;
        for _ in 0..50 {
            balance = Wallet::find_by_id(wallet.id)
                .one(&db)
                .await?
                .unwrap()
                .credits_balance;
            if balance == Decimal::from(7) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(balance, Decimal::from(7));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        Ok(())
    }
    #[tokio::test]
    async fn test_full_queue_does_not_stall_rule_top_ups() -> Result<()> {
        let db = setup_test_db().await?;
        let (queue, receiver) = crate::queue::TaskQueue::new(1);

        let mut wallet_ids = Vec::new();
        for name in ["a", "b", "c", "d"] {
            let customer = create_test_customer(&db, name).await?;
            let wallet = create_rule_wallet(
                &db,
                &queue,
                customer.id,
                crate::core::recurring_rule::RecurringRuleParams {
                    rule_type: "threshold".to_string(),
                    threshold_credits: Some("1".to_string()),
                    paid_credits: Some("10".to_string()),
                    ..Default::default()
                },
            )
            .await?;
            wallet_ids.push(wallet.id);
        }

        let ctx = Arc::new(JobContext {
            db: db.clone(),
            queue: queue.clone(),
            entitlements: Arc::new(crate::core::entitlement::License::new(true)),
            locks: WalletLocks::new(),
        });
        let settings = QueueSettings {
            capacity: 1,
            concurrency: 1,
            ..QueueSettings::default()
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Worker::new(ctx, receiver, &settings).run(shutdown_rx));

        for wallet_id in &wallet_ids {
            queue
                .enqueue(Task::RefreshWalletBalance {
                    wallet_id: *wallet_id,
                })
                .await?;
        }

        let mut topped_up = 0;
        for _ in 0..150 {
            topped_up = 0;
            for wallet_id in &wallet_ids {
                let wallet = Wallet::find_by_id(*wallet_id).one(&db).await?.unwrap();
                if wallet.credits_balance == Decimal::from(10) {
                    topped_up += 1;
                }
            }
            if topped_up == wallet_ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(topped_up, wallet_ids.len());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        Ok(())
    }
}
