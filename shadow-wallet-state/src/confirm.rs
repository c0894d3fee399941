//! Deferred confirmation of pending transfers.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{ledger::LedgerStore, model::TransactionRecord, store::Modified};

pub const DEFAULT_CONFIRMATION_DELAY: Duration = Duration::from_millis(2000);

/// How a scheduled confirmation ended.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfirmationOutcome {
    Confirmed(TransactionRecord),
    /// The record was gone or had already left `pending`.
    Dropped,
    /// The store failed; the record stays `pending`.
    Failed(String),
}

#[derive(Default)]
struct ConfirmationHealth {
    scheduled: AtomicU64,
    confirmed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Counters reported by the health endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConfirmationStats {
    pub scheduled: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Clone)]
pub struct ConfirmationScheduler {
    ledger: LedgerStore,
    delay: Duration,
    health: Arc<ConfirmationHealth>,
}

impl ConfirmationScheduler {
    pub fn new(ledger: LedgerStore, delay: Duration) -> Self {
        Self {
            ledger,
            delay,
            health: Arc::new(ConfirmationHealth::default()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Confirms `id` after the configured delay. There is no way to cancel the
    /// timer; a record that is no longer pending by then is left alone.
    pub fn schedule(&self, id: Uuid) -> JoinHandle<ConfirmationOutcome> {
        self.health.scheduled.fetch_add(1, Ordering::Relaxed);
        let ledger = self.ledger.clone();
        let health = Arc::clone(&self.health);
        let delay = self.delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match ledger.confirm_if_pending(id) {
                Ok(Modified::Updated(record)) => {
                    health.confirmed.fetch_add(1, Ordering::Relaxed);
                    info!(tx_id = %id, wallet = %record.wallet_address, "transaction confirmed");
                    ConfirmationOutcome::Confirmed(record)
                }
                Ok(Modified::Unchanged(record)) => {
                    health.dropped.fetch_add(1, Ordering::Relaxed);
                    info!(tx_id = %id, status = %record.status, "confirmation skipped, record no longer pending");
                    ConfirmationOutcome::Dropped
                }
                Ok(Modified::Missing) => {
                    health.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(tx_id = %id, "confirmation target not found");
                    ConfirmationOutcome::Dropped
                }
                Err(err) => {
                    health.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(tx_id = %id, error = %err, "deferred confirmation failed, record left pending");
                    ConfirmationOutcome::Failed(err.to_string())
                }
            }
        })
    }

    pub fn stats(&self) -> ConfirmationStats {
        ConfirmationStats {
            scheduled: self.health.scheduled.load(Ordering::Relaxed),
            confirmed: self.health.confirmed.load(Ordering::Relaxed),
            failed: self.health.failed.load(Ordering::Relaxed),
            dropped: self.health.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        amount::Amount,
        error::WalletError,
        model::{NewTransaction, Privacy, TxKind, TxStatus},
        store::Database,
    };

    fn pending(ledger: &LedgerStore) -> TransactionRecord {
        ledger
            .append(
                NewTransaction::new(
                    "0xABC",
                    TxKind::Transfer,
                    Amount::from_milli(300),
                    "ETH",
                    Privacy::Private,
                )
                .with_recipient("0xDEF")
                .with_proof("zkp_test"),
            )
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn confirms_after_the_delay() {
        let ledger = LedgerStore::new(Database::in_memory());
        let scheduler = ConfirmationScheduler::new(ledger.clone(), DEFAULT_CONFIRMATION_DELAY);
        let record = pending(&ledger);

        let handle = scheduler.schedule(record.id);
        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert_eq!(ledger.get(record.id).unwrap().status, TxStatus::Pending);

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, ConfirmationOutcome::Confirmed(ref r) if r.id == record.id));
        assert_eq!(ledger.get(record.id).unwrap().status, TxStatus::Confirmed);
        assert_eq!(
            scheduler.stats(),
            ConfirmationStats {
                scheduled: 1,
                confirmed: 1,
                ..ConfirmationStats::default()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn drops_missing_or_settled_records() {
        let ledger = LedgerStore::new(Database::in_memory());
        let scheduler = ConfirmationScheduler::new(ledger.clone(), Duration::from_millis(10));

        let missing = scheduler.schedule(Uuid::new_v4()).await.unwrap();
        assert_eq!(missing, ConfirmationOutcome::Dropped);

        let record = pending(&ledger);
        let handle = scheduler.schedule(record.id);
        ledger.fail_if_pending(record.id, "cancelled").unwrap();
        assert_eq!(handle.await.unwrap(), ConfirmationOutcome::Dropped);
        assert_eq!(ledger.get(record.id).unwrap().status, TxStatus::Failed);

        let stats = scheduler.stats();
        assert_eq!(stats.scheduled, 2);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.confirmed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_is_counted_and_leaves_record_pending() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let ledger = LedgerStore::new(Database::persistent(blocker.join("wallet.db")));
        let scheduler = ConfirmationScheduler::new(ledger.clone(), Duration::from_millis(10));

        let id = Uuid::new_v4();
        let outcome = scheduler.schedule(id).await.unwrap();
        assert!(matches!(outcome, ConfirmationOutcome::Failed(ref reason) if !reason.is_empty()));
        assert_eq!(
            scheduler.stats(),
            ConfirmationStats {
                scheduled: 1,
                failed: 1,
                ..ConfirmationStats::default()
            }
        );
        assert!(matches!(ledger.get(id), Err(WalletError::Store(_))));

        // once the store can open, nothing was written on its behalf
        std::fs::remove_file(&blocker).unwrap();
        assert!(matches!(ledger.get(id), Err(WalletError::NotFound(_))));
        let record = pending(&ledger);
        assert_eq!(ledger.get(record.id).unwrap().status, TxStatus::Pending);
    }
}
