//! Shield, transfer, unshield and cancel.
//!
//! Each operation runs inside the wallet's serialized section: the balance
//! check, the ledger append and the cached balance update happen without
//! another operation on the same wallet interleaving. Transfers leave their
//! record `pending` and hand it to the [`ConfirmationScheduler`].

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    amount::Amount,
    confirm::{ConfirmationOutcome, ConfirmationScheduler},
    error::{WalletError, WalletResult},
    ledger::LedgerStore,
    model::{NewTransaction, Privacy, TransactionRecord, TxKind, TxStatus, WalletAccount},
    projector::{BalanceProjector, WalletGuard},
    proving::{ProofStatement, ProvingBackend},
    store::Modified,
};

/// The stored record and the account after the operation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReceipt {
    pub transaction: TransactionRecord,
    pub account: WalletAccount,
}

/// A transfer receipt plus the pending confirmation.
#[derive(Debug)]
pub struct TransferReceipt {
    pub receipt: OperationReceipt,
    pub confirmation: JoinHandle<ConfirmationOutcome>,
}

#[derive(Clone)]
pub struct Orchestrator {
    ledger: LedgerStore,
    projector: BalanceProjector,
    prover: Arc<dyn ProvingBackend>,
    confirmations: ConfirmationScheduler,
}

impl Orchestrator {
    pub fn new(
        ledger: LedgerStore,
        projector: BalanceProjector,
        prover: Arc<dyn ProvingBackend>,
        confirmations: ConfirmationScheduler,
    ) -> Self {
        Self {
            ledger,
            projector,
            prover,
            confirmations,
        }
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    pub fn projector(&self) -> &BalanceProjector {
        &self.projector
    }

    pub fn prover(&self) -> &dyn ProvingBackend {
        self.prover.as_ref()
    }

    pub fn confirmations(&self) -> &ConfirmationScheduler {
        &self.confirmations
    }

    /// Moves `amount` from the public balance into the shielded balance.
    pub async fn shield(
        &self,
        wallet_address: &str,
        amount: Amount,
        token: &str,
    ) -> WalletResult<OperationReceipt> {
        validate_request(wallet_address, amount, token)?;
        let guard = self.projector.lock_wallet(wallet_address).await?;

        let proof = self.prover.prove(&ProofStatement {
            kind: TxKind::Shield,
            wallet_address,
            recipient_address: None,
            amount,
            token,
        })?;
        let record = self.ledger.append(
            NewTransaction::new(wallet_address, TxKind::Shield, amount, token, Privacy::Shielded)
                .with_proof(proof)
                .with_tx_hash(self.prover.transaction_hash())
                .with_balance_applied(),
        )?;
        let account = self.settle(&guard, &record, amount).await?;
        let transaction = self.confirm_now(record)?;

        info!(wallet = %wallet_address, tx_id = %transaction.id, amount = %amount, "shield completed");
        Ok(OperationReceipt {
            transaction,
            account,
        })
    }

    /// Sends `amount` from the shielded balance to `recipient_address`.
    ///
    /// The sender is debited immediately; the record stays `pending` until
    /// the scheduled confirmation fires. The recipient is not credited.
    pub async fn transfer(
        &self,
        wallet_address: &str,
        recipient_address: &str,
        amount: Amount,
        token: &str,
    ) -> WalletResult<TransferReceipt> {
        validate_request(wallet_address, amount, token)?;
        if recipient_address.trim().is_empty() {
            return Err(WalletError::validation("Recipient address is required"));
        }
        let guard = self.projector.lock_wallet(wallet_address).await?;
        ensure_funds(&self.projector.get(wallet_address)?, amount)?;

        let proof = self.prover.prove(&ProofStatement {
            kind: TxKind::Transfer,
            wallet_address,
            recipient_address: Some(recipient_address),
            amount,
            token,
        })?;
        let record = self.ledger.append(
            NewTransaction::new(wallet_address, TxKind::Transfer, amount, token, Privacy::Private)
                .with_recipient(recipient_address)
                .with_proof(proof)
                .with_tx_hash(self.prover.transaction_hash())
                .with_balance_applied(),
        )?;
        let account = self.settle(&guard, &record, -amount).await?;
        let confirmation = self.confirmations.schedule(record.id);

        info!(
            wallet = %wallet_address,
            recipient = %recipient_address,
            tx_id = %record.id,
            amount = %amount,
            delay_ms = self.confirmations.delay().as_millis() as u64,
            "transfer submitted"
        );
        Ok(TransferReceipt {
            receipt: OperationReceipt {
                transaction: record,
                account,
            },
            confirmation,
        })
    }

    /// Moves `amount` out of the shielded balance. No proof is attached.
    pub async fn unshield(
        &self,
        wallet_address: &str,
        amount: Amount,
        token: &str,
    ) -> WalletResult<OperationReceipt> {
        validate_request(wallet_address, amount, token)?;
        let guard = self.projector.lock_wallet(wallet_address).await?;
        ensure_funds(&self.projector.get(wallet_address)?, amount)?;

        let record = self.ledger.append(
            NewTransaction::new(wallet_address, TxKind::Unshield, amount, token, Privacy::Revealed)
                .with_tx_hash(self.prover.transaction_hash())
                .with_balance_applied(),
        )?;
        let account = self.settle(&guard, &record, -amount).await?;
        let transaction = self.confirm_now(record)?;

        info!(wallet = %wallet_address, tx_id = %transaction.id, amount = %amount, "unshield completed");
        Ok(OperationReceipt {
            transaction,
            account,
        })
    }

    /// Fails a `pending` record. The cached balance is restored only for
    /// records whose effect was applied to it; raw ledger entries fail with
    /// the balance untouched.
    pub async fn cancel(&self, id: Uuid, reason: &str) -> WalletResult<OperationReceipt> {
        let record = self.ledger.get(id)?;
        let guard = self.projector.lock_wallet(&record.wallet_address).await?;

        let account = self.projector.get(&record.wallet_address)?;
        let reversal = if record.balance_applied {
            -record.kind.balance_effect(record.amount)
        } else {
            Amount::ZERO
        };
        let reversed = account.shielded_balance.checked_add(reversal);
        if reversed.map_or(true, |balance| balance.is_negative()) {
            return Err(WalletError::validation(format!(
                "cannot cancel {id}: reversing {reversal} would leave a negative balance"
            )));
        }

        let failed = match self.ledger.fail_if_pending(id, reason)? {
            Modified::Updated(record) => record,
            Modified::Unchanged(current) => {
                return Err(WalletError::InvalidTransition {
                    id,
                    from: current.status,
                    to: TxStatus::Failed,
                })
            }
            Modified::Missing => return Err(WalletError::transaction_not_found(id)),
        };

        if reversal.is_zero() {
            info!(
                wallet = %failed.wallet_address,
                tx_id = %id,
                reason = %reason,
                "transaction cancelled, balance was never applied"
            );
            return Ok(OperationReceipt {
                transaction: failed,
                account,
            });
        }

        let account = self
            .projector
            .apply_delta(&guard, &failed.wallet_address, reversal)
            .await
            .map_err(|err| {
                error!(tx_id = %id, error = %err, "failed to reverse balance of cancelled transaction");
                err
            })?;

        info!(
            wallet = %failed.wallet_address,
            tx_id = %id,
            reversal = %reversal,
            reason = %reason,
            "transaction cancelled"
        );
        Ok(OperationReceipt {
            transaction: failed,
            account,
        })
    }

    /// Applies the balance effect of a freshly appended record, failing the
    /// record when the adjustment does not go through.
    async fn settle(
        &self,
        guard: &WalletGuard,
        record: &TransactionRecord,
        delta: Amount,
    ) -> WalletResult<WalletAccount> {
        match self
            .projector
            .apply_delta(guard, &record.wallet_address, delta)
            .await
        {
            Ok(account) => Ok(account),
            Err(err) => {
                warn!(tx_id = %record.id, error = %err, "balance adjustment failed, failing record");
                let reason = format!("balance adjustment failed: {err}");
                if let Err(mark_err) = self.ledger.fail_if_pending(record.id, reason) {
                    error!(tx_id = %record.id, error = %mark_err, "could not mark record failed");
                }
                Err(err)
            }
        }
    }

    fn confirm_now(&self, record: TransactionRecord) -> WalletResult<TransactionRecord> {
        match self.ledger.confirm_if_pending(record.id)? {
            Modified::Updated(confirmed) | Modified::Unchanged(confirmed) => Ok(confirmed),
            Modified::Missing => Err(WalletError::transaction_not_found(record.id)),
        }
    }
}

fn validate_request(wallet_address: &str, amount: Amount, token: &str) -> WalletResult<()> {
    if wallet_address.trim().is_empty() {
        return Err(WalletError::validation("Wallet address is required"));
    }
    if !amount.is_positive() {
        return Err(WalletError::validation("Amount must be greater than zero"));
    }
    if token.trim().is_empty() {
        return Err(WalletError::validation("Token is required"));
    }
    Ok(())
}

fn ensure_funds(account: &WalletAccount, amount: Amount) -> WalletResult<()> {
    if amount > account.shielded_balance {
        return Err(WalletError::validation(format!(
            "Insufficient balance: {} available, {amount} requested",
            account.shielded_balance
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        confirm::DEFAULT_CONFIRMATION_DELAY,
        projector::AdjustMode,
        proving::MockProvingBackend,
        store::Database,
    };

    fn orchestrator() -> Orchestrator {
        orchestrator_with(Arc::new(MockProvingBackend))
    }

    fn orchestrator_with(prover: Arc<dyn ProvingBackend>) -> Orchestrator {
        let db = Database::in_memory();
        let ledger = LedgerStore::new(db.clone());
        let projector = BalanceProjector::new(db, ledger.clone()).with_mode(AdjustMode::Serialized);
        let confirmations = ConfirmationScheduler::new(ledger.clone(), DEFAULT_CONFIRMATION_DELAY);
        Orchestrator::new(ledger, projector, prover, confirmations)
    }

    fn amount(s: &str) -> Amount {
        s.parse().unwrap()
    }

    fn balance(orchestrator: &Orchestrator, wallet: &str) -> String {
        orchestrator
            .projector()
            .get(wallet)
            .unwrap()
            .shielded_balance
            .to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn shield_then_transfer_confirms_after_delay() {
        let orch = orchestrator();
        orch.projector().get_or_create("0xABC", "pk").unwrap();

        let shield = orch.shield("0xABC", amount("1.0"), "ETH").await.unwrap();
        assert_eq!(shield.account.shielded_balance.to_string(), "1.000");
        assert_eq!(shield.transaction.status, TxStatus::Confirmed);
        assert_eq!(shield.transaction.privacy, Privacy::Shielded);
        assert!(shield.transaction.zk_proof.as_deref().unwrap().starts_with("zkp_"));

        let transfer = orch
            .transfer("0xABC", "0xDEF", amount("0.3"), "ETH")
            .await
            .unwrap();
        let pending = &transfer.receipt.transaction;
        assert_eq!(transfer.receipt.account.shielded_balance.to_string(), "0.700");
        assert_eq!(pending.status, TxStatus::Pending);
        assert!(pending.balance_applied);
        assert_eq!(pending.recipient_address.as_deref(), Some("0xDEF"));
        assert_eq!(pending.privacy, Privacy::Private);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(orch.ledger().get(pending.id).unwrap().status, TxStatus::Pending);

        let outcome = transfer.confirmation.await.unwrap();
        assert!(matches!(outcome, ConfirmationOutcome::Confirmed(_)));
        assert_eq!(orch.ledger().get(pending.id).unwrap().status, TxStatus::Confirmed);
        assert_eq!(balance(&orch, "0xABC"), "0.700");

        let history = orch.ledger().list("0xABC", 10, 0).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, TxKind::Transfer);
        assert_eq!(history[1].kind, TxKind::Shield);
        assert!(orch.projector().get("0xDEF").is_err());
    }

    #[tokio::test]
    async fn insufficient_balance_changes_nothing() {
        let orch = orchestrator();
        orch.projector().get_or_create("0xABC", "pk").unwrap();
        orch.shield("0xABC", amount("1"), "ETH").await.unwrap();

        let err = orch
            .transfer("0xABC", "0xDEF", amount("1.001"), "ETH")
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Validation(_)));
        assert!(matches!(
            orch.unshield("0xABC", amount("2"), "ETH").await,
            Err(WalletError::Validation(_))
        ));

        assert_eq!(balance(&orch, "0xABC"), "1.000");
        assert_eq!(orch.ledger().list("0xABC", 0, 0).unwrap().len(), 1);
        assert_eq!(orch.confirmations().stats().scheduled, 0);
    }

    #[tokio::test]
    async fn repeated_shield_is_applied_twice() {
        let orch = orchestrator();
        orch.projector().get_or_create("0xABC", "pk").unwrap();

        orch.shield("0xABC", amount("1"), "ETH").await.unwrap();
        orch.shield("0xABC", amount("1"), "ETH").await.unwrap();

        assert_eq!(balance(&orch, "0xABC"), "2.000");
        assert_eq!(orch.ledger().list("0xABC", 10, 0).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn operations_validate_input() {
        let orch = orchestrator();
        orch.projector().get_or_create("0xABC", "pk").unwrap();

        assert!(matches!(
            orch.shield("0xABC", Amount::ZERO, "ETH").await,
            Err(WalletError::Validation(_))
        ));
        assert!(matches!(
            orch.shield("0xABC", amount("1"), "").await,
            Err(WalletError::Validation(_))
        ));
        assert!(matches!(
            orch.transfer("0xABC", " ", amount("1"), "ETH").await,
            Err(WalletError::Validation(_))
        ));
        assert!(matches!(
            orch.shield("0xNOBODY", amount("1"), "ETH").await,
            Err(WalletError::NotFound(_))
        ));
        assert!(orch.ledger().list("0xNOBODY", 0, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn unshield_reveals_without_proof() {
        let orch = orchestrator();
        orch.projector().get_or_create("0xABC", "pk").unwrap();
        orch.shield("0xABC", amount("1"), "ETH").await.unwrap();

        let receipt = orch.unshield("0xABC", amount("0.25"), "ETH").await.unwrap();
        assert_eq!(receipt.account.shielded_balance.to_string(), "0.750");
        assert_eq!(receipt.transaction.status, TxStatus::Confirmed);
        assert_eq!(receipt.transaction.privacy, Privacy::Revealed);
        assert!(receipt.transaction.zk_proof.is_none());
        assert!(receipt.transaction.tx_hash.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_reverses_pending_transfer() {
        let orch = orchestrator();
        orch.projector().get_or_create("0xABC", "pk").unwrap();
        orch.shield("0xABC", amount("1"), "ETH").await.unwrap();
        let transfer = orch
            .transfer("0xABC", "0xDEF", amount("0.3"), "ETH")
            .await
            .unwrap();
        let id = transfer.receipt.transaction.id;

        let cancelled = orch.cancel(id, "user request").await.unwrap();
        assert_eq!(cancelled.transaction.status, TxStatus::Failed);
        assert_eq!(cancelled.transaction.failure_reason.as_deref(), Some("user request"));
        assert_eq!(cancelled.account.shielded_balance.to_string(), "1.000");

        assert_eq!(transfer.confirmation.await.unwrap(), ConfirmationOutcome::Dropped);
        assert_eq!(orch.ledger().get(id).unwrap().status, TxStatus::Failed);
        assert_eq!(
            orch.projector().ledger_balance("0xABC").unwrap().to_string(),
            "1.000"
        );

        assert!(matches!(
            orch.cancel(id, "again").await,
            Err(WalletError::InvalidTransition { from: TxStatus::Failed, .. })
        ));
        assert!(matches!(
            orch.cancel(Uuid::new_v4(), "nope").await,
            Err(WalletError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn cancel_of_raw_record_leaves_balance_alone() {
        let orch = orchestrator();
        orch.projector().get_or_create("0xABC", "pk").unwrap();
        let raw = orch
            .ledger()
            .append(
                NewTransaction::new("0xABC", TxKind::Transfer, amount("1000"), "ETH", Privacy::Private)
                    .with_recipient("0xDEF")
                    .with_proof("zkp_test"),
            )
            .unwrap();
        assert!(!raw.balance_applied);

        let cancelled = orch.cancel(raw.id, "never sent").await.unwrap();
        assert_eq!(cancelled.transaction.status, TxStatus::Failed);
        assert_eq!(cancelled.account.shielded_balance, Amount::ZERO);
        assert_eq!(balance(&orch, "0xABC"), "0.000");
        assert_eq!(orch.projector().ledger_balance("0xABC").unwrap(), Amount::ZERO);

        assert!(matches!(
            orch.transfer("0xABC", "0xDEF", amount("999"), "ETH").await,
            Err(WalletError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_transfers_cannot_overdraw() {
        let orch = orchestrator();
        orch.projector().get_or_create("0xABC", "pk").unwrap();
        orch.shield("0xABC", amount("1"), "ETH").await.unwrap();

        let (a, b) = tokio::join!(
            orch.transfer("0xABC", "0xDEF", amount("0.6"), "ETH"),
            orch.transfer("0xABC", "0xDEF", amount("0.6"), "ETH"),
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert_eq!(balance(&orch, "0xABC"), "0.400");
        assert_eq!(orch.ledger().list("0xABC", 0, 0).unwrap().len(), 2);
    }

    struct BrokenProver;

    impl ProvingBackend for BrokenProver {
        fn prove(&self, _statement: &ProofStatement<'_>) -> WalletResult<String> {
            Err(WalletError::Proving("circuit unavailable".into()))
        }

        fn transaction_hash(&self) -> String {
            "0x00".into()
        }
    }

    #[tokio::test]
    async fn proving_failure_leaves_no_record() {
        let orch = orchestrator_with(Arc::new(BrokenProver));
        orch.projector().get_or_create("0xABC", "pk").unwrap();

        assert!(matches!(
            orch.shield("0xABC", amount("1"), "ETH").await,
            Err(WalletError::Proving(_))
        ));
        assert!(orch.ledger().list("0xABC", 0, 0).unwrap().is_empty());
        assert_eq!(balance(&orch, "0xABC"), "0.000");
    }
}
