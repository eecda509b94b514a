//! Recurring transaction rules - Validation and evaluation.
//!
//! Rules arrive as loosely typed parameters (strings from the API layer) and are
//! validated into [`ValidatedRule`] before they are stored. Evaluation is a pure
//! decision ([`evaluate_rule`]) plus a persisted trigger stamp, so repeated
//! evaluation of the same interval boundary or threshold crossing fires once.

use crate::{
    core::{
        amount::{parse_credit_amount, parse_optional_credit_amount},
        entitlement::Entitlements,
        locks::WalletLocks,
        transaction::latest_consumption_at,
    },
    entities::{
        RecurringTransactionRule, Wallet,
        recurring_transaction_rule::{self, RuleInterval, RuleStatus, RuleType},
        wallet::{self, WalletStatus},
        wallet_transaction::TransactionSource,
    },
    errors::{Error, Result},
    queue::{CreateTransactionTask, Task, TaskQueue},
};
use chrono::{DateTime, Days, Months, Utc};
use rust_decimal::Decimal;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use serde::Deserialize;

/// Field key used for every rule validation error.
pub const RULES_FIELD: &str = "recurring_transaction_rules";
/// A rule is malformed.
pub const INVALID_RECURRING_RULE: &str = "invalid_recurring_rule";
/// More rules were supplied than a wallet may hold.
pub const INVALID_NUMBER_OF_RECURRING_RULES: &str = "invalid_number_of_recurring_rules";

/// Rules a wallet may hold at once.
pub const MAX_RULES_PER_WALLET: usize = 1;

/// Rule input as received from the API layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RecurringRuleParams {
    /// Existing rule to update; `None` creates a rule
    pub id: Option<i64>,
    /// `"interval"` or `"threshold"`
    pub rule_type: String,
    /// `"weekly"`, `"monthly"`, `"quarterly"` or `"yearly"` for interval rules
    pub interval: Option<String>,
    /// Decimal string, required for threshold rules
    pub threshold_credits: Option<String>,
    /// Decimal string, defaults to the wallet's purchased credits
    pub paid_credits: Option<String>,
    /// Decimal string, defaults to the wallet's granted credits
    pub granted_credits: Option<String>,
}

/// A rule that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRule {
    /// Existing rule to update
    pub id: Option<i64>,
    /// Trigger kind
    pub rule_type: RuleType,
    /// Period for interval rules
    pub interval: Option<RuleInterval>,
    /// Threshold for threshold rules, zero for interval rules
    pub threshold_credits: Decimal,
    /// Purchased credits added on each firing
    pub paid_credits: Decimal,
    /// Free credits added on each firing
    pub granted_credits: Decimal,
}

/// Credits a rule falls back to when its own amounts are omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuleDefaults {
    /// Default purchased credits
    pub paid_credits: Decimal,
    /// Default granted credits
    pub granted_credits: Decimal,
}

fn parse_rule_type(raw: &str) -> Option<RuleType> {
    match raw {
        "interval" => Some(RuleType::Interval),
        "threshold" => Some(RuleType::Threshold),
        _ => None,
    }
}

fn parse_interval(raw: &str) -> Option<RuleInterval> {
    match raw {
        "weekly" => Some(RuleInterval::Weekly),
        "monthly" => Some(RuleInterval::Monthly),
        "quarterly" => Some(RuleInterval::Quarterly),
        "yearly" => Some(RuleInterval::Yearly),
        _ => None,
    }
}

/// Validates one rule. Returns `None` when the rule is malformed.
#[must_use]
pub fn validate_rule(params: &RecurringRuleParams, defaults: RuleDefaults) -> Option<ValidatedRule> {
    let rule_type = parse_rule_type(&params.rule_type)?;

    let (interval, threshold_credits) = match rule_type {
        RuleType::Interval => {
            let interval = parse_interval(params.interval.as_deref()?)?;
            let threshold = parse_optional_credit_amount(params.threshold_credits.as_deref())?;
            (Some(interval), threshold)
        }
        RuleType::Threshold => (None, parse_credit_amount(params.threshold_credits.as_deref()?)?),
    };

    let paid_credits = params
        .paid_credits
        .as_deref()
        .map_or(Some(defaults.paid_credits), parse_credit_amount)?;
    let granted_credits = params
        .granted_credits
        .as_deref()
        .map_or(Some(defaults.granted_credits), parse_credit_amount)?;

    Some(ValidatedRule {
        id: params.id,
        rule_type,
        interval,
        threshold_credits,
        paid_credits,
        granted_credits,
    })
}

/// Validates the rule list supplied with a wallet.
///
/// # Errors
/// Returns the error code to report under [`RULES_FIELD`].
pub fn validate_rules(
    rules: &[RecurringRuleParams],
    defaults: RuleDefaults,
) -> std::result::Result<Option<ValidatedRule>, &'static str> {
    if rules.len() > MAX_RULES_PER_WALLET {
        return Err(INVALID_NUMBER_OF_RECURRING_RULES);
    }
    rules
        .first()
        .map(|params| validate_rule(params, defaults).ok_or(INVALID_RECURRING_RULE))
        .transpose()
}

/// Boundary `periods` intervals after `origin`.
fn boundary_after(
    origin: DateTime<Utc>,
    interval: RuleInterval,
    periods: u32,
) -> Option<DateTime<Utc>> {
    match interval {
        RuleInterval::Weekly => origin.checked_add_days(Days::new(7 * u64::from(periods))),
        RuleInterval::Monthly => origin.checked_add_months(Months::new(periods)),
        RuleInterval::Quarterly => origin.checked_add_months(Months::new(periods.checked_mul(3)?)),
        RuleInterval::Yearly => origin.checked_add_months(Months::new(periods.checked_mul(12)?)),
    }
}

/// End of the interval that started at `anchor`.
#[must_use]
pub fn next_boundary(anchor: DateTime<Utc>, interval: RuleInterval) -> Option<DateTime<Utc>> {
    boundary_after(anchor, interval, 1)
}

/// Latest period boundary of an interval rule at or before `now`.
///
/// Boundaries are counted from the later of wallet and rule creation, so a
/// month-end start keeps landing on month ends. `None` before the first boundary.
#[must_use]
pub fn current_boundary(
    rule: &recurring_transaction_rule::Model,
    wallet: &wallet::Model,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let interval = rule.interval?;
    let origin = wallet.created_at.max(rule.created_at);

    let mut latest = None;
    for periods in 1..=u32::MAX {
        match boundary_after(origin, interval, periods) {
            Some(boundary) if boundary <= now => latest = Some(boundary),
            _ => break,
        }
    }
    latest
}

/// Whether an interval rule has a boundary at or before `now` it has not fired for.
///
/// After downtime spanning several periods this is a single firing.
#[must_use]
pub fn is_interval_due(
    rule: &recurring_transaction_rule::Model,
    wallet: &wallet::Model,
    now: DateTime<Utc>,
) -> bool {
    if rule.status != RuleStatus::Active || rule.rule_type != RuleType::Interval {
        return false;
    }
    current_boundary(rule, wallet, now).is_some_and(|boundary| {
        rule.last_triggered_at.is_none_or(|fired| fired < boundary)
    })
}

/// A rule decision to top up a wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firing {
    /// Rule that fired
    pub rule_id: i64,
    /// Wallet to top up
    pub wallet_id: i64,
    /// Interval or threshold
    pub source: TransactionSource,
    /// Purchased credits to add
    pub paid_credits: Decimal,
    /// Free credits to add
    pub granted_credits: Decimal,
    /// Stamped on the rule: the crossed boundary for interval rules, `now` otherwise
    pub triggered_at: DateTime<Utc>,
}

impl Firing {
    /// Task that applies the top-up.
    #[must_use]
    pub const fn to_task(&self) -> Task {
        Task::CreateWalletTransaction(CreateTransactionTask {
            wallet_id: self.wallet_id,
            paid_credits: self.paid_credits,
            granted_credits: self.granted_credits,
            source: self.source,
        })
    }
}

/// Decides whether `rule` fires for `wallet` at `now`.
///
/// * Interval rules fire once per period boundary they have not fired for.
/// * Threshold rules fire when the ongoing credit balance is at or below the
///   threshold, at most once per consumption that brought it there.
#[must_use]
pub fn evaluate_rule(
    rule: &recurring_transaction_rule::Model,
    wallet: &wallet::Model,
    latest_consumption_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<Firing> {
    if rule.status != RuleStatus::Active || wallet.status != WalletStatus::Active {
        return None;
    }

    let (source, triggered_at) = match rule.rule_type {
        RuleType::Interval => {
            if !is_interval_due(rule, wallet, now) {
                return None;
            }
            (TransactionSource::Interval, current_boundary(rule, wallet, now)?)
        }
        RuleType::Threshold => {
            if wallet.credits_ongoing_balance > rule.threshold_credits {
                return None;
            }
            let already_fired = rule.last_triggered_at.is_some_and(|fired| {
                latest_consumption_at.is_none_or(|consumed| consumed <= fired)
            });
            if already_fired {
                return None;
            }
            (TransactionSource::Threshold, now)
        }
    };

    Some(Firing {
        rule_id: rule.id,
        wallet_id: wallet.id,
        source,
        paid_credits: rule.paid_credits,
        granted_credits: rule.granted_credits,
        triggered_at,
    })
}

/// Active rules of a wallet, oldest first.
pub async fn get_active_rules<C>(
    db: &C,
    wallet_id: i64,
) -> Result<Vec<recurring_transaction_rule::Model>>
where
    C: ConnectionTrait,
{
    RecurringTransactionRule::find()
        .filter(recurring_transaction_rule::Column::WalletId.eq(wallet_id))
        .filter(recurring_transaction_rule::Column::Status.eq(RuleStatus::Active))
        .order_by_asc(recurring_transaction_rule::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Evaluates every active rule of a wallet and enqueues one top-up per firing.
///
/// Firings are stamped on the rule before the wallet lock is released; top-ups go
/// to the queue's follow-up lane afterwards. Without the premium entitlement this
/// is a no-op.
pub async fn evaluate_wallet_rules(
    db: &DatabaseConnection,
    locks: &WalletLocks,
    queue: &TaskQueue,
    entitlements: &dyn Entitlements,
    wallet_id: i64,
    now: DateTime<Utc>,
) -> Result<Vec<Firing>> {
    if !entitlements.is_premium() {
        return Ok(Vec::new());
    }

    let firings = {
        let _guard = locks.lock(wallet_id).await;
        let txn = db.begin().await?;

        let wallet = Wallet::find_by_id(wallet_id)
            .one(&txn)
            .await?
            .ok_or(Error::WalletNotFound { id: wallet_id })?;
        let rules = get_active_rules(&txn, wallet_id).await?;
        let consumed_at = latest_consumption_at(&txn, wallet_id).await?;

        let mut firings = Vec::new();
        for rule in rules {
            if let Some(firing) = evaluate_rule(&rule, &wallet, consumed_at, now) {
                let mut active_model: recurring_transaction_rule::ActiveModel = rule.into();
                active_model.last_triggered_at = Set(Some(firing.triggered_at));
                active_model.updated_at = Set(now);
                active_model.update(&txn).await?;
                firings.push(firing);
            }
        }

        txn.commit().await?;
        firings
    };

    for firing in &firings {
        tracing::info!(
            wallet_id,
            rule_id = firing.rule_id,
            source = ?firing.source,
            "Recurring transaction rule fired"
        );
        queue.enqueue_follow_up(firing.to_task())?;
    }

    Ok(firings)
}
