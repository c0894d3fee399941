//! The transaction ledger.
//!
//! Records are appended in `pending` status and afterwards only their status
//! and metadata change. [`LedgerStore::update_status`] is the raw patch path
//! and deliberately does not validate transitions; the orchestrator uses the
//! compare-and-set helpers instead.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::{
    amount::Amount,
    error::{WalletError, WalletResult},
    model::{NewTransaction, TransactionPatch, TransactionRecord, TxKind, TxStatus, DEFAULT_GAS_VALUE},
    store::{Database, Modified, TxInsert},
};

/// Page size used when a caller does not ask for one.
pub const DEFAULT_PAGE_LIMIT: usize = 10;

#[derive(Clone)]
pub struct LedgerStore {
    db: Database,
}

impl LedgerStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Validates and stores a new record in `pending` status.
    pub fn append(&self, new: NewTransaction) -> WalletResult<TransactionRecord> {
        let wallet_address = non_empty(Some(new.wallet_address), "walletAddress")?;
        let (Some(kind), Some(amount), Some(token), Some(privacy)) =
            (new.kind, new.amount, non_blank(new.token), new.privacy)
        else {
            return Err(WalletError::validation(
                "Required fields: walletAddress, type, amount, token, privacy",
            ));
        };

        if !amount.is_positive() {
            return Err(WalletError::validation(format!(
                "amount must be greater than zero, got {amount}"
            )));
        }

        let recipient_address = non_blank(new.recipient_address);
        match (kind, &recipient_address) {
            (TxKind::Transfer, None) => {
                return Err(WalletError::validation(
                    "recipientAddress is required for transfer transactions",
                ))
            }
            (TxKind::Shield | TxKind::Unshield, Some(_)) => {
                return Err(WalletError::validation(format!(
                    "recipientAddress is only allowed on transfer transactions, not {kind}"
                )))
            }
            _ => {}
        }

        let zk_proof = non_blank(new.zk_proof);
        match (privacy.requires_proof(), &zk_proof) {
            (true, None) => {
                return Err(WalletError::validation(format!(
                    "zkProof is required for {privacy} transactions"
                )))
            }
            (false, Some(_)) => {
                return Err(WalletError::validation(
                    "zkProof must not be set on revealed transactions",
                ))
            }
            _ => {}
        }

        let now = Utc::now();
        let record = TransactionRecord {
            id: Uuid::new_v4(),
            wallet_address,
            tx_hash: non_blank(new.tx_hash),
            kind,
            amount,
            token,
            recipient_address,
            status: TxStatus::Pending,
            privacy,
            zk_proof,
            gas_used: DEFAULT_GAS_VALUE.to_string(),
            gas_price: DEFAULT_GAS_VALUE.to_string(),
            block_number: 0,
            failure_reason: None,
            balance_applied: new.balance_applied,
            sequence: self.db.next_sequence()?,
            created_at: now,
            updated_at: now,
        };

        match self.db.insert_transaction(&record)? {
            TxInsert::Inserted => {
                debug!(
                    tx_id = %record.id,
                    wallet = %record.wallet_address,
                    kind = %record.kind,
                    amount = %record.amount,
                    "ledger record appended"
                );
                Ok(record)
            }
            TxInsert::DuplicateHash(owner) => Err(WalletError::conflict(format!(
                "transaction hash {} already recorded by {owner}",
                record.tx_hash.as_deref().unwrap_or_default()
            ))),
        }
    }

    pub fn get(&self, id: Uuid) -> WalletResult<TransactionRecord> {
        self.db
            .get_transaction(id)?
            .ok_or_else(|| WalletError::transaction_not_found(id))
    }

    /// Records for `wallet_address`, newest first. `limit == 0` returns every
    /// record after `offset`.
    pub fn list(
        &self,
        wallet_address: &str,
        limit: usize,
        offset: usize,
    ) -> WalletResult<Vec<TransactionRecord>> {
        if wallet_address.trim().is_empty() {
            return Err(WalletError::validation("Wallet address is required"));
        }
        let records = self.all_for_wallet(wallet_address)?;
        let page = records.into_iter().skip(offset);
        Ok(if limit == 0 {
            page.collect()
        } else {
            page.take(limit).collect()
        })
    }

    /// Every record for `wallet_address`, newest first.
    pub fn all_for_wallet(&self, wallet_address: &str) -> WalletResult<Vec<TransactionRecord>> {
        let mut records = self.db.transactions_for_wallet(wallet_address)?;
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.sequence.cmp(&a.sequence))
        });
        Ok(records)
    }

    /// Signed sum of the balance effects of every non-failed record.
    pub fn net_balance(&self, wallet_address: &str) -> WalletResult<Amount> {
        self.db
            .transactions_for_wallet(wallet_address)?
            .iter()
            .try_fold(Amount::ZERO, |total, record| {
                total.checked_add(record.balance_effect()).ok_or_else(|| {
                    WalletError::validation(format!(
                        "ledger balance for {wallet_address} overflows"
                    ))
                })
            })
    }

    /// Merges `patch` into the record. No transition rules are enforced here.
    pub fn update_status(&self, id: Uuid, patch: TransactionPatch) -> WalletResult<TransactionRecord> {
        match self.db.modify_transaction(id, |record| {
            patch.clone().apply_to(record);
            record.updated_at = Utc::now();
            true
        })? {
            Modified::Missing => Err(WalletError::transaction_not_found(id)),
            Modified::Unchanged(record) | Modified::Updated(record) => Ok(record),
        }
    }

    /// Confirms the record if it is still `pending`.
    pub fn confirm_if_pending(&self, id: Uuid) -> WalletResult<Modified<TransactionRecord>> {
        self.transition_from_pending(id, TxStatus::Confirmed, None)
    }

    /// Fails the record if it is still `pending`.
    pub fn fail_if_pending(
        &self,
        id: Uuid,
        reason: impl Into<String>,
    ) -> WalletResult<Modified<TransactionRecord>> {
        self.transition_from_pending(id, TxStatus::Failed, Some(reason.into()))
    }

    /// Moves a `pending` record to `to`, leaving it alone in any other status.
    pub fn transition_from_pending(
        &self,
        id: Uuid,
        to: TxStatus,
        failure_reason: Option<String>,
    ) -> WalletResult<Modified<TransactionRecord>> {
        Ok(self.db.modify_transaction(id, |record| {
            if !record.status.can_transition_to(to) {
                return false;
            }
            record.status = to;
            if to == TxStatus::Failed {
                record.failure_reason = failure_reason.clone();
            }
            record.updated_at = Utc::now();
            true
        })?)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn non_empty(value: Option<String>, field: &str) -> WalletResult<String> {
    non_blank(value).ok_or_else(|| WalletError::validation(format!("{field} is required")))
}
