//! Per-wallet serialization.
//!
//! Ledger writes, balance refreshes and rule evaluation for one wallet run one at a
//! time; different wallets proceed in parallel.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of one async mutex per wallet id.
#[derive(Debug, Clone, Default)]
pub struct WalletLocks {
    inner: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl WalletLocks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `wallet_id`; released when the guard drops.
    pub async fn lock(&self, wallet_id: i64) -> OwnedMutexGuard<()> {
        let mutex = self.inner.entry(wallet_id).or_default().value().clone();
        mutex.lock_owned().await
    }
}
