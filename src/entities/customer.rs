//! Customer entity - The billed party a wallet belongs to.
//!
//! Only the fields wallets depend on are modelled here. `currency` starts empty
//! and is assigned from the first wallet created for the customer.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Customer database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "customers")]
pub struct Model {
    /// Unique identifier for the customer
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning organization (tenant)
    pub organization_id: i64,
    /// Identifier of the customer in the organization's own system
    pub external_id: String,
    /// Display name
    pub name: String,
    /// ISO 4217 currency code, `None` until the first wallet or subscription sets it
    pub currency: Option<String>,
    /// When the customer was created
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Customer and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One customer has many wallets (at most one active)
    #[sea_orm(has_many = "super::wallet::Entity")]
    Wallets,
}

impl Related<super::wallet::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Wallets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
