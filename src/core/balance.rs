//! Wallet balance computation.
//!
//! Balances are never set directly: they are folded from the ledger and written
//! back here, always inside a database transaction and under the wallet's lock.

use crate::{
    core::{amount::credits_to_currency, locks::WalletLocks},
    entities::{
        Wallet, WalletTransaction,
        wallet::{self, WalletStatus},
        wallet_transaction::{self, TransactionStatus, TransactionType},
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{Set, TransactionTrait, prelude::*};

/// Derived balances of a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Balances {
    /// Settled inbound minus settled outbound credits
    pub credits_balance: Decimal,
    /// `credits_balance` in the wallet currency
    pub balance: Decimal,
    /// `credits_balance` minus pending usage
    pub credits_ongoing_balance: Decimal,
    /// `credits_ongoing_balance` in the wallet currency
    pub ongoing_balance: Decimal,
}

/// Folds ledger entries into balances.
#[must_use]
pub fn compute_balances(
    transactions: &[wallet_transaction::Model],
    rate_amount: Decimal,
    currency: &str,
) -> Balances {
    let mut settled_inbound = Decimal::ZERO;
    let mut settled_outbound = Decimal::ZERO;
    let mut pending_outbound = Decimal::ZERO;

    for tx in transactions {
        match (tx.transaction_type, tx.status) {
            (TransactionType::Inbound, TransactionStatus::Settled) => {
                settled_inbound += tx.credit_amount;
            }
            (TransactionType::Outbound, TransactionStatus::Settled) => {
                settled_outbound += tx.credit_amount;
            }
            (TransactionType::Outbound, TransactionStatus::Pending) => {
                pending_outbound += tx.credit_amount;
            }
            // Inbound credits only count once settled
            (TransactionType::Inbound, TransactionStatus::Pending) => {}
        }
    }

    let credits_balance = settled_inbound - settled_outbound;
    let credits_ongoing_balance = credits_balance - pending_outbound;

    Balances {
        credits_balance,
        balance: credits_to_currency(credits_balance, rate_amount, currency),
        credits_ongoing_balance,
        ongoing_balance: credits_to_currency(credits_ongoing_balance, rate_amount, currency),
    }
}

/// Recomputes and stores the balances of `wallet` from its ledger.
///
/// Callers provide the connection or open transaction and must hold the wallet lock.
/// Stamps `last_balance_sync_at`. `ready_to_be_refreshed` is left alone: only
/// [`refresh_wallet_balance`] clears it, since rule evaluation follows that refresh.
pub(crate) async fn write_balances<C>(
    db: &C,
    wallet: wallet::Model,
    now: DateTime<Utc>,
) -> Result<wallet::Model>
where
    C: ConnectionTrait,
{
    let transactions = WalletTransaction::find()
        .filter(wallet_transaction::Column::WalletId.eq(wallet.id))
        .all(db)
        .await?;

    let balances = compute_balances(&transactions, wallet.rate_amount, &wallet.currency);

    let mut active_model: wallet::ActiveModel = wallet.into();
    active_model.credits_balance = Set(balances.credits_balance);
    active_model.balance = Set(balances.balance);
    active_model.credits_ongoing_balance = Set(balances.credits_ongoing_balance);
    active_model.ongoing_balance = Set(balances.ongoing_balance);
    active_model.last_balance_sync_at = Set(Some(now));
    active_model.updated_at = Set(now);

    active_model.update(db).await.map_err(Into::into)
}

/// Refreshes the ongoing balance of one wallet.
///
/// Returns `Ok(None)` for terminated wallets, which keep their last balances.
pub async fn refresh_wallet_balance(
    db: &DatabaseConnection,
    locks: &WalletLocks,
    wallet_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<wallet::Model>> {
    let _guard = locks.lock(wallet_id).await;
    let txn = db.begin().await?;

    let wallet = Wallet::find_by_id(wallet_id)
        .one(&txn)
        .await?
        .ok_or(Error::WalletNotFound { id: wallet_id })?;

    if wallet.status == WalletStatus::Terminated {
        tracing::debug!(wallet_id, "Skipping balance refresh of terminated wallet");
        return Ok(None);
    }

    let mut active_model: wallet::ActiveModel = wallet.into();
    active_model.ready_to_be_refreshed = Set(false);
    let wallet = active_model.update(&txn).await?;

    let updated = write_balances(&txn, wallet, now).await?;
    txn.commit().await?;

    tracing::debug!(
        wallet_id,
        credits_ongoing_balance = %updated.credits_ongoing_balance,
        "Wallet balance refreshed"
    );
    Ok(Some(updated))
}
