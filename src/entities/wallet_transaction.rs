//! Wallet transaction entity - Append-only ledger of credit movements.
//!
//! Inbound entries add purchased or granted credits; outbound entries consume
//! them. Each entry stores both the credit amount and its value in the wallet's
//! currency at the time it was written.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Direction of the movement
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum TransactionType {
    /// Credits added to the wallet
    #[sea_orm(string_value = "inbound")]
    Inbound,
    /// Credits consumed from the wallet
    #[sea_orm(string_value = "outbound")]
    Outbound,
}

/// Settlement state
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum TransactionStatus {
    /// Ongoing usage that has not been invoiced yet
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Final
    #[sea_orm(string_value = "settled")]
    Settled,
}

/// What the credits represent
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum CreditKind {
    /// Credits bought by the customer
    #[sea_orm(string_value = "purchased")]
    Purchased,
    /// Credits offered for free
    #[sea_orm(string_value = "granted")]
    Granted,
    /// Credits consumed by usage
    #[sea_orm(string_value = "invoiced")]
    Invoiced,
}

/// Origin of an inbound movement
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum TransactionSource {
    /// Wallet creation or an explicit top-up
    #[sea_orm(string_value = "manual")]
    Manual,
    /// Fired by an interval rule
    #[sea_orm(string_value = "interval")]
    Interval,
    /// Fired by a threshold rule
    #[sea_orm(string_value = "threshold")]
    Threshold,
}

/// Wallet transaction database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wallet_transactions")]
pub struct Model {
    /// Unique identifier for the ledger entry
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Wallet the entry belongs to
    pub wallet_id: i64,
    /// Direction
    pub transaction_type: TransactionType,
    /// Settlement state
    pub status: TransactionStatus,
    /// Purchased, granted or invoiced credits
    pub transaction_status: CreditKind,
    /// Origin of the movement
    pub source: TransactionSource,
    /// Number of credits moved, always positive
    pub credit_amount: Decimal,
    /// `credit_amount` in the wallet's currency
    pub amount: Decimal,
    /// When the entry was written
    pub created_at: DateTimeUtc,
    /// When the entry settled
    pub settled_at: Option<DateTimeUtc>,
}

/// Defines relationships between `WalletTransaction` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each entry belongs to one wallet
    #[sea_orm(
        belongs_to = "super::wallet::Entity",
        from = "Column::WalletId",
        to = "super::wallet::Column::Id"
    )]
    Wallet,
}

impl Related<super::wallet::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Wallet.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
