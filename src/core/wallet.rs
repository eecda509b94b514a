//! Wallet business logic - Creation, update and termination of wallets.
//!
//! Creation validates the whole request first and reports every problem keyed by
//! field; nothing is written unless all checks pass. The wallet, its optional
//! recurring rule and the customer's currency are then persisted in one database
//! transaction, and the initial credits are handed to the task queue.

use crate::{
    core::{
        amount::{is_valid_currency, parse_credit_amount, parse_optional_credit_amount},
        entitlement::Entitlements,
        recurring_rule::{
            INVALID_NUMBER_OF_RECURRING_RULES, INVALID_RECURRING_RULE, MAX_RULES_PER_WALLET,
            RULES_FIELD, RecurringRuleParams, RuleDefaults, ValidatedRule, get_active_rules,
            validate_rule, validate_rules,
        },
    },
    entities::{
        Customer, RecurringTransactionRule, Wallet, customer,
        recurring_transaction_rule::{self, RuleStatus},
        wallet::{self, WalletStatus},
        wallet_transaction::TransactionSource,
    },
    errors::{Error, Result, ValidationErrors},
    queue::{CreateTransactionTask, Task, TaskQueue},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use serde::Deserialize;

/// Error code returned when premium features are used without entitlement.
pub const PREMIUM_FEATURE: &str = "premium_feature";

/// Wallet creation request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateWalletParams {
    /// Tenant issuing the request
    pub organization_id: i64,
    /// Customer receiving the wallet
    pub customer_id: i64,
    /// Optional display name
    pub name: Option<String>,
    /// ISO 4217 currency code
    pub currency: String,
    /// Value of one credit in `currency`, decimal string
    pub rate_amount: String,
    /// Optional expiration, must be in the future
    pub expiration_at: Option<DateTime<Utc>>,
    /// Purchased credits to add at creation, decimal string
    pub paid_credits: Option<String>,
    /// Free credits to add at creation, decimal string
    pub granted_credits: Option<String>,
    /// At most one recurring rule
    #[serde(default)]
    pub recurring_transaction_rules: Vec<RecurringRuleParams>,
}

/// Wallet update request. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateWalletParams {
    /// New display name
    pub name: Option<String>,
    /// New expiration, must be in the future
    pub expiration_at: Option<DateTime<Utc>>,
    /// Replacement rule list; listed rules are created or updated, others terminated
    pub recurring_transaction_rules: Option<Vec<RecurringRuleParams>>,
}

/// Request values that passed validation.
struct ValidatedWallet {
    customer: customer::Model,
    rate_amount: Decimal,
    paid_credits: Decimal,
    granted_credits: Decimal,
    rule: Option<ValidatedRule>,
}

fn forbidden() -> Error {
    Error::Forbidden {
        code: PREMIUM_FEATURE.to_string(),
    }
}

/// Active wallet of a customer, if any.
pub async fn get_active_wallet_for_customer<C>(
    db: &C,
    customer_id: i64,
) -> Result<Option<wallet::Model>>
where
    C: ConnectionTrait,
{
    Wallet::find()
        .filter(wallet::Column::CustomerId.eq(customer_id))
        .filter(wallet::Column::Status.eq(WalletStatus::Active))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds a wallet by id.
pub async fn get_wallet<C>(db: &C, wallet_id: i64) -> Result<Option<wallet::Model>>
where
    C: ConnectionTrait,
{
    Wallet::find_by_id(wallet_id).one(db).await.map_err(Into::into)
}

/// Checks a creation request against the state seen by `db`.
///
/// Runs inside the creation transaction so the one-active-wallet and currency checks
/// hold for the rows it then writes.
async fn validate_create<C>(
    db: &C,
    params: &CreateWalletParams,
    now: DateTime<Utc>,
) -> Result<ValidatedWallet>
where
    C: ConnectionTrait,
{
    let mut errors = ValidationErrors::new();

    let customer = Customer::find_by_id(params.customer_id)
        .one(db)
        .await?
        .filter(|c| c.organization_id == params.organization_id);
    match &customer {
        None => errors.add("customer", "customer_not_found"),
        Some(c) => {
            if get_active_wallet_for_customer(db, c.id).await?.is_some() {
                errors.add("customer", "wallet_already_exists");
            }
        }
    }

    if !is_valid_currency(&params.currency) {
        errors.add("currency", "invalid_currency");
    } else if let Some(existing) = customer.as_ref().and_then(|c| c.currency.as_deref()) {
        if existing != params.currency {
            errors.add("currency", "currencies_does_not_match");
        }
    }

    let rate_amount = parse_credit_amount(&params.rate_amount).filter(|r| !r.is_zero());
    if rate_amount.is_none() {
        errors.add("rate_amount", "invalid_rate_amount");
    }

    let paid_credits = parse_optional_credit_amount(params.paid_credits.as_deref());
    if paid_credits.is_none() {
        errors.add("paid_credits", "invalid_paid_credits");
    }
    let granted_credits = parse_optional_credit_amount(params.granted_credits.as_deref());
    if granted_credits.is_none() {
        errors.add("granted_credits", "invalid_granted_credits");
    }

    if params.expiration_at.is_some_and(|at| at <= now) {
        errors.add("expiration_at", "invalid_date");
    }

    let defaults = RuleDefaults {
        paid_credits: paid_credits.unwrap_or_default(),
        granted_credits: granted_credits.unwrap_or_default(),
    };
    let rule = match validate_rules(&params.recurring_transaction_rules, defaults) {
        Ok(rule) => rule,
        Err(code) => {
            errors.add(RULES_FIELD, code);
            None
        }
    };

    errors.into_result()?;

    match (customer, rate_amount, paid_credits, granted_credits) {
        (Some(customer), Some(rate_amount), Some(paid_credits), Some(granted_credits)) => {
            Ok(ValidatedWallet {
                customer,
                rate_amount,
                paid_credits,
                granted_credits,
                rule,
            })
        }
        // Every `None` above recorded an error
        _ => Err(Error::validation("base", "invalid_params")),
    }
}

fn new_rule(
    wallet_id: i64,
    rule: &ValidatedRule,
    now: DateTime<Utc>,
) -> recurring_transaction_rule::ActiveModel {
    recurring_transaction_rule::ActiveModel {
        wallet_id: Set(wallet_id),
        rule_type: Set(rule.rule_type),
        interval: Set(rule.interval),
        threshold_credits: Set(rule.threshold_credits),
        paid_credits: Set(rule.paid_credits),
        granted_credits: Set(rule.granted_credits),
        status: Set(RuleStatus::Active),
        last_triggered_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
}

/// Creates a wallet, optionally with one recurring rule.
///
/// On success the customer adopts the wallet currency if it had none, and a
/// `CreateWalletTransaction` task is enqueued for the initial credits (unless both
/// are zero).
///
/// # Errors
/// * `Forbidden` when rules are supplied without the premium entitlement
/// * `Validation` with field-keyed codes for any invalid input
pub async fn create_wallet(
    db: &DatabaseConnection,
    queue: &TaskQueue,
    entitlements: &dyn Entitlements,
    params: CreateWalletParams,
) -> Result<wallet::Model> {
    if !params.recurring_transaction_rules.is_empty() && !entitlements.is_premium() {
        return Err(forbidden());
    }

    let now = Utc::now();
    let txn = db.begin().await?;
    let validated = validate_create(&txn, &params, now).await?;

    if validated.customer.currency.is_none() {
        let mut customer: customer::ActiveModel = validated.customer.clone().into();
        customer.currency = Set(Some(params.currency.clone()));
        customer.update(&txn).await?;
    }

    let wallet = wallet::ActiveModel {
        organization_id: Set(params.organization_id),
        customer_id: Set(validated.customer.id),
        name: Set(params.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())),
        status: Set(WalletStatus::Active),
        currency: Set(params.currency),
        rate_amount: Set(validated.rate_amount),
        credits_balance: Set(Decimal::ZERO),
        balance: Set(Decimal::ZERO),
        credits_ongoing_balance: Set(Decimal::ZERO),
        ongoing_balance: Set(Decimal::ZERO),
        ready_to_be_refreshed: Set(false),
        expiration_at: Set(params.expiration_at),
        last_balance_sync_at: Set(None),
        terminated_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    if let Some(rule) = &validated.rule {
        new_rule(wallet.id, rule, now).insert(&txn).await?;
    }

    txn.commit().await?;

    tracing::info!(
        wallet_id = wallet.id,
        customer_id = wallet.customer_id,
        currency = %wallet.currency,
        with_rule = validated.rule.is_some(),
        "Wallet created"
    );

    if validated.paid_credits.is_zero() && validated.granted_credits.is_zero() {
        return Ok(wallet);
    }

    let task = Task::CreateWalletTransaction(CreateTransactionTask {
        wallet_id: wallet.id,
        paid_credits: validated.paid_credits,
        granted_credits: validated.granted_credits,
        source: TransactionSource::Manual,
    });
    match queue.enqueue(task).await {
        Ok(()) => Ok(wallet),
        Err(e) => {
            // The wallet is committed; the caller still gets it
            tracing::error!(
                wallet_id = wallet.id,
                paid_credits = %validated.paid_credits,
                granted_credits = %validated.granted_credits,
                error = %e,
                "Initial wallet credits could not be enqueued"
            );
            let mut active_model: wallet::ActiveModel = wallet.into();
            active_model.ready_to_be_refreshed = Set(true);
            active_model.update(db).await.map_err(Into::into)
        }
    }
}

/// Updates a wallet's name, expiration and recurring rules.
///
/// Listed rules with an `id` are updated in place, listed rules without one are
/// created, and active rules missing from the list are terminated. The wallet is
/// flagged for refresh when its rules change so they are evaluated on the next tick.
///
/// # Errors
/// * `WalletNotFound` / `WalletTerminated`
/// * `Forbidden` when rules are supplied without the premium entitlement
/// * `RuleNotFound` when a listed `id` is not an active rule of this wallet
/// * `Validation` for an invalid date or rule list
pub async fn update_wallet(
    db: &DatabaseConnection,
    entitlements: &dyn Entitlements,
    wallet_id: i64,
    params: UpdateWalletParams,
) -> Result<wallet::Model> {
    if params.recurring_transaction_rules.is_some() && !entitlements.is_premium() {
        return Err(forbidden());
    }

    let now = Utc::now();
    let txn = db.begin().await?;

    let wallet = get_wallet(&txn, wallet_id)
        .await?
        .ok_or(Error::WalletNotFound { id: wallet_id })?;
    if wallet.status == WalletStatus::Terminated {
        return Err(Error::WalletTerminated { id: wallet_id });
    }

    let mut errors = ValidationErrors::new();
    if params.expiration_at.is_some_and(|at| at <= now) {
        errors.add("expiration_at", "invalid_date");
    }

    let existing_rules = get_active_rules(&txn, wallet_id).await?;
    let mut validated_rules = Vec::new();
    if let Some(rules) = &params.recurring_transaction_rules {
        if rules.len() > MAX_RULES_PER_WALLET {
            errors.add(RULES_FIELD, INVALID_NUMBER_OF_RECURRING_RULES);
        } else {
            for rule_params in rules {
                let defaults = match rule_params.id {
                    Some(id) => {
                        let existing = existing_rules
                            .iter()
                            .find(|r| r.id == id)
                            .ok_or(Error::RuleNotFound { id })?;
                        RuleDefaults {
                            paid_credits: existing.paid_credits,
                            granted_credits: existing.granted_credits,
                        }
                    }
                    None => RuleDefaults::default(),
                };
                match validate_rule(rule_params, defaults) {
                    Some(rule) => validated_rules.push(rule),
                    None => errors.add(RULES_FIELD, INVALID_RECURRING_RULE),
                }
            }
        }
    }
    errors.into_result()?;

    let rules_changed = params.recurring_transaction_rules.is_some();
    if rules_changed {
        for existing in &existing_rules {
            if !validated_rules.iter().any(|r| r.id == Some(existing.id)) {
                let mut active_model: recurring_transaction_rule::ActiveModel =
                    existing.clone().into();
                active_model.status = Set(RuleStatus::Terminated);
                active_model.updated_at = Set(now);
                active_model.update(&txn).await?;
            }
        }

        for rule in &validated_rules {
            match rule.id.and_then(|id| existing_rules.iter().find(|r| r.id == id)) {
                Some(existing) => {
                    let mut active_model: recurring_transaction_rule::ActiveModel =
                        existing.clone().into();
                    active_model.rule_type = Set(rule.rule_type);
                    active_model.interval = Set(rule.interval);
                    active_model.threshold_credits = Set(rule.threshold_credits);
                    active_model.paid_credits = Set(rule.paid_credits);
                    active_model.granted_credits = Set(rule.granted_credits);
                    active_model.updated_at = Set(now);
                    active_model.update(&txn).await?;
                }
                None => {
                    new_rule(wallet_id, rule, now).insert(&txn).await?;
                }
            }
        }
    }

    let mut active_model: wallet::ActiveModel = wallet.into();
    if let Some(name) = params.name {
        let name = name.trim().to_string();
        active_model.name = Set((!name.is_empty()).then_some(name));
    }
    if let Some(expiration_at) = params.expiration_at {
        active_model.expiration_at = Set(Some(expiration_at));
    }
    if rules_changed {
        active_model.ready_to_be_refreshed = Set(true);
    }
    active_model.updated_at = Set(now);
    let updated = active_model.update(&txn).await?;

    txn.commit().await?;
    tracing::info!(wallet_id, rules_changed, "Wallet updated");
    Ok(updated)
}

/// Terminates a wallet and its active rules. Terminating twice is a no-op.
pub async fn terminate_wallet(
    db: &DatabaseConnection,
    wallet_id: i64,
    now: DateTime<Utc>,
) -> Result<wallet::Model> {
    let txn = db.begin().await?;

    let wallet = get_wallet(&txn, wallet_id)
        .await?
        .ok_or(Error::WalletNotFound { id: wallet_id })?;
    if wallet.status == WalletStatus::Terminated {
        return Ok(wallet);
    }

    RecurringTransactionRule::update_many()
        .col_expr(
            recurring_transaction_rule::Column::Status,
            Expr::value(RuleStatus::Terminated),
        )
        .col_expr(recurring_transaction_rule::Column::UpdatedAt, Expr::value(now))
        .filter(recurring_transaction_rule::Column::WalletId.eq(wallet_id))
        .filter(recurring_transaction_rule::Column::Status.eq(RuleStatus::Active))
        .exec(&txn)
        .await?;

    let mut active_model: wallet::ActiveModel = wallet.into();
    active_model.status = Set(WalletStatus::Terminated);
    active_model.terminated_at = Set(Some(now));
    active_model.updated_at = Set(now);
    let terminated = active_model.update(&txn).await?;

    txn.commit().await?;
    tracing::info!(wallet_id, "Wallet terminated");
    Ok(terminated)
}

/// Terminates every active wallet whose expiration has passed. Returns their ids.
pub async fn terminate_expired_wallets(
    db: &DatabaseConnection,
    now: DateTime<Utc>,
) -> Result<Vec<i64>> {
    let candidates = Wallet::find()
        .filter(wallet::Column::Status.eq(WalletStatus::Active))
        .filter(wallet::Column::ExpirationAt.is_not_null())
        .order_by_asc(wallet::Column::Id)
        .all(db)
        .await?;

    let mut terminated = Vec::new();
    for wallet in candidates.into_iter().filter(|w| w.is_expired(now)) {
        terminate_wallet(db, wallet.id, now).await?;
        terminated.push(wallet.id);
    }
    Ok(terminated)
}
