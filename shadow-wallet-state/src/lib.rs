//! ShadowWallet state layer
//!
//! This crate owns everything below the HTTP surface:
//! - `LedgerStore`: append-only transaction history with a constrained status
//!   lifecycle (`pending → confirmed | failed`)
//! - `BalanceProjector`: cached shielded balance per wallet, adjusted inside a
//!   per-wallet serialized section and reconcilable against the ledger
//! - `Orchestrator`: shield, transfer, unshield and cancel, built on the two
//!   above plus a `ProvingBackend` and the deferred `ConfirmationScheduler`
//!
//! # Amounts
//!
//! Every amount is a decimal rounded half away from zero to three fractional
//! digits and rendered as a string (`"0.700"`).
//!
//! # Storage
//!
//! `Database` is an injected handle over either in-memory tables or a sled
//! database that is opened lazily on first use.

pub mod amount;
pub mod confirm;
pub mod error;
pub mod ledger;
pub mod model;
pub mod orchestrator;
pub mod projector;
pub mod proving;
pub mod store;

pub use amount::{Amount, AMOUNT_SCALE};
pub use confirm::{
    ConfirmationOutcome, ConfirmationScheduler, ConfirmationStats, DEFAULT_CONFIRMATION_DELAY,
};
pub use error::{StoreError, WalletError, WalletResult};
pub use ledger::{LedgerStore, DEFAULT_PAGE_LIMIT};
pub use model::{
    AccountPatch, NewAccount, NewTransaction, Preferences, PreferencesPatch, PrivateKeyMaterial,
    Privacy, TransactionPatch, TransactionRecord, TxKind, TxStatus, WalletAccount, DEFAULT_TOKEN,
};
pub use orchestrator::{OperationReceipt, Orchestrator, TransferReceipt};
pub use projector::{AdjustMode, BalanceProjector, ReconcileReport, WalletGuard};
pub use proving::{MockProvingBackend, ProofStatement, ProvingBackend};
pub use store::{Database, Modified, IN_MEMORY_LOCATION};
