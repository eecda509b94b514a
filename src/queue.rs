//! In-process task queue.
//!
//! Services emit [`Task`]s through a cloneable [`TaskQueue`] handle; the worker pool
//! in [`crate::jobs::worker`] consumes them. External producers go through a bounded
//! channel and wait when the workers fall behind. Tasks emitted by a running task
//! (rule top-ups) use a separate unbounded lane: a running task never waits on the
//! channel its own worker drains.

use crate::entities::wallet_transaction::TransactionSource;
use crate::errors::{Error, Result};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Payload of a "create wallet transaction" task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTransactionTask {
    /// Wallet receiving the credits
    pub wallet_id: i64,
    /// Purchased credits to add
    pub paid_credits: Decimal,
    /// Free credits to add
    pub granted_credits: Decimal,
    /// Why the credits are added
    pub source: TransactionSource,
}

/// Unit of background work, always scoped to one wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Append inbound credits to a wallet's ledger
    CreateWalletTransaction(CreateTransactionTask),
    /// Recompute a wallet's balances and evaluate its recurring rules
    RefreshWalletBalance {
        /// Wallet to refresh
        wallet_id: i64,
    },
}

impl Task {
    /// Wallet the task operates on.
    #[must_use]
    pub const fn wallet_id(&self) -> i64 {
        match self {
            Self::CreateWalletTransaction(task) => task.wallet_id,
            Self::RefreshWalletBalance { wallet_id } => *wallet_id,
        }
    }

    /// Short task name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateWalletTransaction(_) => "create_wallet_transaction",
            Self::RefreshWalletBalance { .. } => "refresh_wallet_balance",
        }
    }
}

/// Receiving end handed to the worker.
#[derive(Debug)]
pub struct TaskReceiver {
    tasks: mpsc::Receiver<Task>,
    follow_ups: mpsc::UnboundedReceiver<Task>,
}

impl TaskReceiver {
    /// Next task, follow-ups first. `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<Task> {
        tokio::select! {
            biased;
            Some(task) = self.follow_ups.recv() => Some(task),
            task = self.tasks.recv() => match task {
                Some(task) => Some(task),
                None => self.follow_ups.recv().await,
            },
        }
    }

    /// Takes a task without waiting, follow-ups first.
    pub fn try_recv(&mut self) -> std::result::Result<Task, TryRecvError> {
        match self.follow_ups.try_recv() {
            Ok(task) => Ok(task),
            Err(_) => self.tasks.try_recv(),
        }
    }
}

/// Producer handle.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    sender: mpsc::Sender<Task>,
    follow_ups: mpsc::UnboundedSender<Task>,
}

impl TaskQueue {
    /// Creates a queue holding at most `capacity` pending external tasks.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, TaskReceiver) {
        let (sender, tasks) = mpsc::channel(capacity.max(1));
        let (follow_ups, follow_up_receiver) = mpsc::unbounded_channel();
        (
            Self { sender, follow_ups },
            TaskReceiver {
                tasks,
                follow_ups: follow_up_receiver,
            },
        )
    }

    /// Adds a task, waiting for room when the queue is full.
    ///
    /// Must not be called from inside a running task; use [`Self::enqueue_follow_up`].
    pub async fn enqueue(&self, task: Task) -> Result<()> {
        tracing::debug!(task = task.name(), wallet_id = task.wallet_id(), "Enqueueing task");
        self.sender.send(task).await.map_err(|e| Error::Queue {
            message: format!("Failed to enqueue {}: queue closed", e.0.name()),
        })
    }

    /// Adds a task emitted by a running task. Never waits.
    pub fn enqueue_follow_up(&self, task: Task) -> Result<()> {
        tracing::debug!(
            task = task.name(),
            wallet_id = task.wallet_id(),
            "Enqueueing follow-up task"
        );
        self.follow_ups.send(task).map_err(|e| Error::Queue {
            message: format!("Failed to enqueue {}: queue closed", e.0.name()),
        })
    }
}
