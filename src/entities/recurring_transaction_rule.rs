//! Recurring transaction rule entity - Automatic top-up configuration for a wallet.
//!
//! An `interval` rule tops the wallet up every period; a `threshold` rule tops it
//! up when the ongoing credit balance falls to `threshold_credits` or below.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// What triggers the rule
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum RuleType {
    /// Fires once per elapsed interval
    #[sea_orm(string_value = "interval")]
    Interval,
    /// Fires when the ongoing balance reaches the threshold
    #[sea_orm(string_value = "threshold")]
    Threshold,
}

/// Period of an interval rule
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum RuleInterval {
    /// Every 7 days
    #[sea_orm(string_value = "weekly")]
    Weekly,
    /// Every calendar month
    #[sea_orm(string_value = "monthly")]
    Monthly,
    /// Every 3 calendar months
    #[sea_orm(string_value = "quarterly")]
    Quarterly,
    /// Every 12 calendar months
    #[sea_orm(string_value = "yearly")]
    Yearly,
}

/// Whether the rule is still in effect
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum RuleStatus {
    /// Evaluated on every refresh
    #[sea_orm(string_value = "active")]
    Active,
    /// Replaced, removed, or its wallet was terminated
    #[sea_orm(string_value = "terminated")]
    Terminated,
}

/// Recurring transaction rule database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "recurring_transaction_rules")]
pub struct Model {
    /// Unique identifier for the rule
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Wallet the rule tops up
    pub wallet_id: i64,
    /// Trigger kind
    pub rule_type: RuleType,
    /// Period, set for interval rules only
    pub interval: Option<RuleInterval>,
    /// Ongoing credit balance at or below which a threshold rule fires
    pub threshold_credits: Decimal,
    /// Purchased credits added on each firing
    pub paid_credits: Decimal,
    /// Free credits added on each firing
    pub granted_credits: Decimal,
    /// Lifecycle status
    pub status: RuleStatus,
    /// Last time the rule fired
    pub last_triggered_at: Option<DateTimeUtc>,
    /// When the rule was created
    pub created_at: DateTimeUtc,
    /// When the rule was last modified
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between `RecurringTransactionRule` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each rule belongs to one wallet
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
