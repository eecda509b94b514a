//! Wallet entity - A prepaid credit balance held by a customer.
//!
//! Balances are derived from the wallet's ledger and written only by the
//! balance refresh; `currency` never changes after creation. Wallets are
//! terminated, never deleted.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a wallet
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum WalletStatus {
    /// Accepting transactions and refreshes
    #[sea_orm(string_value = "active")]
    Active,
    /// Closed or expired
    #[sea_orm(string_value = "terminated")]
    Terminated,
}

/// Wallet database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wallets")]
pub struct Model {
    /// Unique identifier for the wallet
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning organization (tenant)
    pub organization_id: i64,
    /// Customer holding the wallet
    pub customer_id: i64,
    /// Optional display name
    pub name: Option<String>,
    /// Lifecycle status
    pub status: WalletStatus,
    /// ISO 4217 currency code
    pub currency: String,
    /// Value of one credit in `currency`
    pub rate_amount: Decimal,
    /// Settled credits
    pub credits_balance: Decimal,
    /// `credits_balance` expressed in `currency`
    pub balance: Decimal,
    /// Settled credits minus usage not yet invoiced
    pub credits_ongoing_balance: Decimal,
    /// `credits_ongoing_balance` expressed in `currency`
    pub ongoing_balance: Decimal,
    /// Set when the ledger changed since the last balance refresh
    pub ready_to_be_refreshed: bool,
    /// After this instant the wallet is terminated by the clock
    pub expiration_at: Option<DateTimeUtc>,
    /// Last time the balances were recomputed
    pub last_balance_sync_at: Option<DateTimeUtc>,
    /// When the wallet was terminated
    pub terminated_at: Option<DateTimeUtc>,
    /// When the wallet was created
    pub created_at: DateTimeUtc,
    /// When the wallet was last modified
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Whether the wallet is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }

    /// Whether the wallet has passed its expiration date at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTimeUtc) -> bool {
        self.expiration_at.is_some_and(|at| at <= now)
    }
}

/// Defines relationships between Wallet and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each wallet belongs to one customer
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
    /// One wallet has many ledger entries
    #[sea_orm(has_many = "super::wallet_transaction::Entity")]
    WalletTransactions,
    /// One wallet has many recurring rules (at most one active)
    #[sea_orm(has_many = "super::recurring_transaction_rule::Entity")]
    RecurringTransactionRules,
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl Related<super::wallet_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WalletTransactions.def()
    }
}

impl Related<super::recurring_transaction_rule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RecurringTransactionRules.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
