//! Error types for ledger, projector and orchestration operations.

use thiserror::Error;
use uuid::Uuid;

use crate::model::TxStatus;

/// Result type for wallet state operations.
pub type WalletResult<T> = Result<T, WalletError>;

/// Failures of the underlying persistence engine.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The sled database could not be opened.
    #[error("failed to open database at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: sled::Error,
    },

    /// The data directory for the database could not be created.
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A read or write against sled failed.
    #[error("database error: {0}")]
    Sled(#[from] sled::Error),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value is structurally invalid.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Errors surfaced by wallet state operations.
#[derive(Error, Debug)]
pub enum WalletError {
    /// Missing or malformed input.
    #[error("{0}")]
    Validation(String),

    /// Referenced wallet or transaction does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Duplicate unique key (wallet address, transaction hash).
    #[error("{0}")]
    Conflict(String),

    /// A status change that the state machine does not allow.
    #[error("transaction {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: TxStatus,
        to: TxStatus,
    },

    /// The proving backend failed to produce a proof reference.
    #[error("proving backend error: {0}")]
    Proving(String),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WalletError {
    pub fn validation(message: impl Into<String>) -> Self {
        WalletError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        WalletError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        WalletError::Conflict(message.into())
    }

    pub(crate) fn wallet_not_found(address: &str) -> Self {
        WalletError::NotFound(format!("wallet {address} not found"))
    }

    pub(crate) fn transaction_not_found(id: Uuid) -> Self {
        WalletError::NotFound(format!("transaction {id} not found"))
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        WalletError::Store(StoreError::Serialization(err))
    }
}

impl From<sled::Error> for WalletError {
    fn from(err: sled::Error) -> Self {
        WalletError::Store(StoreError::Sled(err))
    }
}
