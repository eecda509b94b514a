//! Unified error types for the wallet service.
//!
//! Validation failures are collected per field into [`ValidationErrors`] so callers
//! receive every problem with a request at once, keyed the same way the API layer
//! reports them (e.g. `paid_credits => ["invalid_paid_credits"]`).

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Field-keyed validation messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    messages: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    /// Creates an empty set of validation errors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `code` against `field`.
    pub fn add(&mut self, field: &str, code: &str) {
        self.messages
            .entry(field.to_string())
            .or_default()
            .push(code.to_string());
    }

    /// Returns the codes recorded for `field`, if any.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.messages.get(field).map(Vec::as_slice)
    }

    /// Whether no errors were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Converts the collected messages into `Err(Error::Validation)` when non-empty.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation { messages: self })
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, codes) in &self.messages {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{field}: {}", codes.join(", "))?;
            first = false;
        }
        Ok(())
    }
}

/// Errors produced by wallet services, ledger operations and background jobs.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded or parsed
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable description
        message: String,
    },

    /// One or more request fields failed validation
    #[error("Validation failed: {messages}")]
    Validation {
        /// Codes keyed by field name
        messages: ValidationErrors,
    },

    /// The operation requires an entitlement the organization does not hold
    #[error("Forbidden: {code}")]
    Forbidden {
        /// Machine-readable reason, e.g. `premium_feature`
        code: String,
    },

    /// Amount was zero, negative or not a finite number
    #[error("Invalid amount: {amount}")]
    InvalidAmount {
        /// The rejected amount as given
        amount: String,
    },

    /// No wallet with this id exists
    #[error("Wallet not found: {id}")]
    WalletNotFound {
        /// Wallet id
        id: i64,
    },

    /// The wallet exists but has been terminated
    #[error("Wallet {id} is terminated")]
    WalletTerminated {
        /// Wallet id
        id: i64,
    },

    /// No recurring rule with this id exists on the wallet
    #[error("Recurring transaction rule not found: {id}")]
    RuleNotFound {
        /// Rule id
        id: i64,
    },

    /// The task queue is closed
    #[error("Task queue error: {message}")]
    Queue {
        /// Human-readable description
        message: String,
    },

    /// Database failure
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a single-field validation error.
    #[must_use]
    pub fn validation(field: &str, code: &str) -> Self {
        let mut messages = ValidationErrors::new();
        messages.add(field, code);
        Self::Validation { messages }
    }

    /// Returns the validation messages when this is a validation error.
    #[must_use]
    pub const fn validation_messages(&self) -> Option<&ValidationErrors> {
        match self {
            Self::Validation { messages } => Some(messages),
            _ => None,
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
