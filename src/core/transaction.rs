//! Wallet ledger - Append-only credit movements.
//!
//! Inbound credits are written together with the resulting balances in one database
//! transaction. Consumption is recorded as an outbound entry and flags the wallet for
//! the next scheduled refresh. Entries are never updated or deleted.

use crate::{
    core::{amount::credits_to_currency, balance::write_balances, locks::WalletLocks},
    entities::{
        Wallet, WalletTransaction, wallet,
        wallet::WalletStatus,
        wallet_transaction::{
            self, CreditKind, TransactionSource, TransactionStatus, TransactionType,
        },
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};

/// Loads a wallet that can still receive ledger entries.
async fn find_active_wallet<C>(db: &C, wallet_id: i64) -> Result<wallet::Model>
where
    C: ConnectionTrait,
{
    let wallet = Wallet::find_by_id(wallet_id)
        .one(db)
        .await?
        .ok_or(Error::WalletNotFound { id: wallet_id })?;

    if wallet.status == WalletStatus::Terminated {
        return Err(Error::WalletTerminated { id: wallet_id });
    }
    Ok(wallet)
}

fn new_entry(
    wallet: &wallet::Model,
    transaction_type: TransactionType,
    status: TransactionStatus,
    kind: CreditKind,
    source: TransactionSource,
    credits: Decimal,
    now: DateTime<Utc>,
) -> wallet_transaction::ActiveModel {
    wallet_transaction::ActiveModel {
        wallet_id: Set(wallet.id),
        transaction_type: Set(transaction_type),
        status: Set(status),
        transaction_status: Set(kind),
        source: Set(source),
        credit_amount: Set(credits),
        amount: Set(credits_to_currency(
            credits,
            wallet.rate_amount,
            &wallet.currency,
        )),
        created_at: Set(now),
        settled_at: Set((status == TransactionStatus::Settled).then_some(now)),
        ..Default::default()
    }
}

/// Adds purchased and granted credits to a wallet and updates its balances.
///
/// One ledger entry is written per non-zero amount; when both are zero nothing is
/// written and an empty list is returned.
///
/// # Errors
/// * `InvalidAmount` when an amount is negative
/// * `WalletNotFound` / `WalletTerminated` when the wallet cannot receive credits
pub async fn create_inbound_transactions(
    db: &DatabaseConnection,
    locks: &WalletLocks,
    wallet_id: i64,
    paid_credits: Decimal,
    granted_credits: Decimal,
    source: TransactionSource,
) -> Result<Vec<wallet_transaction::Model>> {
    for amount in [paid_credits, granted_credits] {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(Error::InvalidAmount {
                amount: amount.to_string(),
            });
        }
    }

    if paid_credits.is_zero() && granted_credits.is_zero() {
        return Ok(Vec::new());
    }

    let _guard = locks.lock(wallet_id).await;
    let txn = db.begin().await?;
    let wallet = find_active_wallet(&txn, wallet_id).await?;
    let now = Utc::now();

    let mut created = Vec::new();
    for (kind, credits) in [
        (CreditKind::Purchased, paid_credits),
        (CreditKind::Granted, granted_credits),
    ] {
        if credits.is_zero() {
            continue;
        }
        let entry = new_entry(
            &wallet,
            TransactionType::Inbound,
            TransactionStatus::Settled,
            kind,
            source,
            credits,
            now,
        );
        created.push(entry.insert(&txn).await?);
    }

    write_balances(&txn, wallet, now).await?;
    txn.commit().await?;

    tracing::info!(
        wallet_id,
        paid_credits = %paid_credits,
        granted_credits = %granted_credits,
        source = ?source,
        "Inbound wallet transactions created"
    );
    Ok(created)
}

/// Records credits consumed by usage.
///
/// `settled = false` records ongoing usage that is not invoiced yet; it lowers the
/// ongoing balance only. The wallet is flagged for the next balance refresh.
///
/// # Errors
/// * `InvalidAmount` when `credits` is zero or negative
/// * `WalletNotFound` / `WalletTerminated` when the wallet cannot be charged
pub async fn record_consumption(
    db: &DatabaseConnection,
    locks: &WalletLocks,
    wallet_id: i64,
    credits: Decimal,
    settled: bool,
) -> Result<wallet_transaction::Model> {
    if credits <= Decimal::ZERO {
        return Err(Error::InvalidAmount {
            amount: credits.to_string(),
        });
    }

    let _guard = locks.lock(wallet_id).await;
    let txn = db.begin().await?;
    let wallet = find_active_wallet(&txn, wallet_id).await?;
    let now = Utc::now();

    let status = if settled {
        TransactionStatus::Settled
    } else {
        TransactionStatus::Pending
    };
    let entry = new_entry(
        &wallet,
        TransactionType::Outbound,
        status,
        CreditKind::Invoiced,
        TransactionSource::Manual,
        credits,
        now,
    )
    .insert(&txn)
    .await?;

    let mut active_model: wallet::ActiveModel = wallet.into();
    active_model.ready_to_be_refreshed = Set(true);
    active_model.updated_at = Set(now);
    active_model.update(&txn).await?;

    txn.commit().await?;
    Ok(entry)
}

/// Retrieves all ledger entries of a wallet, newest first.
pub async fn get_transactions_for_wallet<C>(
    db: &C,
    wallet_id: i64,
) -> Result<Vec<wallet_transaction::Model>>
where
    C: ConnectionTrait,
{
    WalletTransaction::find()
        .filter(wallet_transaction::Column::WalletId.eq(wallet_id))
        .order_by_desc(wallet_transaction::Column::CreatedAt)
        .order_by_desc(wallet_transaction::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Timestamp of the most recent consumption, if any.
pub async fn latest_consumption_at<C>(db: &C, wallet_id: i64) -> Result<Option<DateTime<Utc>>>
where
    C: ConnectionTrait,
{
    let latest = WalletTransaction::find()
        .filter(wallet_transaction::Column::WalletId.eq(wallet_id))
        .filter(wallet_transaction::Column::TransactionType.eq(TransactionType::Outbound))
        .order_by_desc(wallet_transaction::Column::Id)
        .one(db)
        .await?;
    Ok(latest.map(|tx| tx.created_at))
}
