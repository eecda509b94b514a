//! Core business logic - framework-agnostic wallet, ledger and rule operations.

/// Credit amount parsing and currency conversion
pub mod amount;
/// Balance computation and refresh
pub mod balance;
/// Licensed feature checks
pub mod entitlement;
/// Per-wallet serialization
pub mod locks;
/// Recurring rule validation and evaluation
pub mod recurring_rule;
/// Eligibility query for the scheduled refresh
pub mod repository;
/// Append-only wallet ledger
pub mod transaction;
/// Wallet creation, update and termination
pub mod wallet;
