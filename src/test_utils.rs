//! Shared test utilities for the wallet service.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test entities with sensible defaults.

use crate::{
    core::{
        entitlement::License,
        locks::WalletLocks,
        recurring_rule::RecurringRuleParams,
        wallet::{CreateWalletParams, create_wallet},
    },
    entities::{customer, wallet, wallet::WalletStatus},
    errors::Result,
    jobs::worker::{JobContext, perform},
    queue::{Task, TaskQueue, TaskReceiver},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates a test customer with sensible defaults.
///
/// # Defaults
/// * `organization_id`: 1
/// * `name`: same as `external_id`
/// * `currency`: None
pub async fn create_test_customer(
    db: &DatabaseConnection,
    external_id: &str,
) -> Result<customer::Model> {
    create_custom_customer(db, external_id, None).await
}

/// Creates a test customer with a preset currency.
pub async fn create_custom_customer(
    db: &DatabaseConnection,
    external_id: &str,
    currency: Option<&str>,
) -> Result<customer::Model> {
    customer::ActiveModel {
        organization_id: Set(1),
        external_id: Set(external_id.to_string()),
        name: Set(external_id.to_string()),
        currency: Set(currency.map(str::to_string)),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Creates a wallet row directly, bypassing validation and the task queue.
///
/// Balances start at zero. Use this when a test needs a wallet without caring
/// how it was created.
pub async fn create_custom_wallet(
    db: &DatabaseConnection,
    customer_id: i64,
    currency: &str,
    rate_amount: Decimal,
) -> Result<wallet::Model> {
    let now = Utc::now();
    wallet::ActiveModel {
        organization_id: Set(1),
        customer_id: Set(customer_id),
        name: Set(None),
        status: Set(WalletStatus::Active),
        currency: Set(currency.to_string()),
        rate_amount: Set(rate_amount),
        credits_balance: Set(Decimal::ZERO),
        balance: Set(Decimal::ZERO),
        credits_ongoing_balance: Set(Decimal::ZERO),
        ongoing_balance: Set(Decimal::ZERO),
        ready_to_be_refreshed: Set(false),
        expiration_at: Set(None),
        last_balance_sync_at: Set(None),
        terminated_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Sets up a test database with a single customer.
/// Returns both the database connection and the customer.
pub async fn setup_with_customer(
    currency: Option<&str>,
) -> Result<(DatabaseConnection, customer::Model)> {
    let db = setup_test_db().await?;
    let customer = create_custom_customer(&db, "acme", currency).await?;
    Ok((db, customer))
}

/// Sets up a test database with a customer and an empty EUR wallet (rate 1).
/// Returns both the database connection and the wallet.
pub async fn setup_with_wallet() -> Result<(DatabaseConnection, wallet::Model)> {
    let (db, customer) = setup_with_customer(Some("EUR")).await?;
    let wallet = create_custom_wallet(&db, customer.id, "EUR", Decimal::ONE).await?;
    Ok((db, wallet))
}

/// Small queue for service tests that inspect emitted tasks.
pub fn queue_pair() -> (TaskQueue, TaskReceiver) {
    TaskQueue::new(16)
}

/// Everything a job-level test needs, sharing one database and queue.
pub struct TestContext {
    /// Database connection
    pub db: DatabaseConnection,
    /// Per-wallet locks shared with `job`
    pub locks: WalletLocks,
    /// Producer side of the queue
    pub queue: TaskQueue,
    /// Context handed to [`perform`]
    pub job: JobContext,
    receiver: Mutex<TaskReceiver>,
}

/// Creates a [`TestContext`] with the given premium entitlement.
pub async fn setup_job_context(premium: bool) -> Result<TestContext> {
    let db = setup_test_db().await?;
    let (queue, receiver) = queue_pair();
    let locks = WalletLocks::new();
    let job = JobContext {
        db: db.clone(),
        queue: queue.clone(),
        entitlements: Arc::new(License::new(premium)),
        locks: locks.clone(),
    };
    Ok(TestContext {
        db,
        locks,
        queue,
        job,
        receiver: Mutex::new(receiver),
    })
}

/// Creates a EUR wallet (rate 1, no initial credits) holding one recurring rule.
pub async fn create_wallet_with_rule(
    ctx: &TestContext,
    customer_id: i64,
    rule: RecurringRuleParams,
) -> Result<wallet::Model> {
    create_rule_wallet(&ctx.db, &ctx.queue, customer_id, rule).await
}

/// Same as [`create_wallet_with_rule`] for tests that wire their own queue.
pub async fn create_rule_wallet(
    db: &DatabaseConnection,
    queue: &TaskQueue,
    customer_id: i64,
    rule: RecurringRuleParams,
) -> Result<wallet::Model> {
    create_wallet(
        db,
        queue,
        &License::new(true),
        CreateWalletParams {
            organization_id: 1,
            customer_id,
            currency: "EUR".to_string(),
            rate_amount: "1".to_string(),
            recurring_transaction_rules: vec![rule],
            ..Default::default()
        },
    )
    .await
}

/// Runs every queued task, including tasks enqueued while draining.
/// Returns the tasks in execution order.
pub async fn drain_tasks(ctx: &TestContext) -> Result<Vec<Task>> {
    let mut receiver = ctx.receiver.lock().await;
    let mut executed = Vec::new();
    while let Ok(task) = receiver.try_recv() {
        perform(&ctx.job, &task).await?;
        executed.push(task);
    }
    Ok(executed)
}
