//! Cached per-wallet shielded balances.
//!
//! The cached `shieldedBalance` on each account is only written from inside a
//! wallet's serialized section, together with the ledger write that justifies
//! it. [`BalanceProjector::reconcile`] recomputes the balance from the ledger
//! and repairs the cache when the two disagree.

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{Arc, Mutex},
};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::{
    amount::Amount,
    error::{WalletError, WalletResult},
    ledger::LedgerStore,
    model::{AccountPatch, NewAccount, Preferences, WalletAccount},
    store::Database,
};

/// How balance read-modify-write cycles are protected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AdjustMode {
    /// One writer per wallet at a time.
    #[default]
    Serialized,
    /// No locking. Concurrent adjustments of one wallet can lose updates.
    Unserialized,
}

impl AdjustMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustMode::Serialized => "serialized",
            AdjustMode::Unserialized => "unserialized",
        }
    }
}

impl fmt::Display for AdjustMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdjustMode {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serialized" => Ok(AdjustMode::Serialized),
            "unserialized" => Ok(AdjustMode::Unserialized),
            other => Err(WalletError::validation(format!(
                "unknown adjust mode '{other}', expected serialized or unserialized"
            ))),
        }
    }
}

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Proof that the caller holds a wallet's serialized section.
///
/// Empty in [`AdjustMode::Unserialized`]. Dropping the last guard of a wallet
/// removes its entry from the lock table.
pub struct WalletGuard {
    held: Option<HeldLock>,
}

struct HeldLock {
    guard: OwnedMutexGuard<()>,
    wallet_address: String,
    table: LockTable,
}

impl Drop for WalletGuard {
    fn drop(&mut self) {
        let Some(HeldLock {
            guard,
            wallet_address,
            table,
        }) = self.held.take()
        else {
            return;
        };
        drop(guard);
        // waiters hold a clone of the mutex, so a count of one means only the table does
        let mut locks = table.lock().expect("wallet lock table poisoned");
        if locks
            .get(&wallet_address)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&wallet_address);
        }
    }
}

/// Result of comparing the cached balance with the ledger.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub wallet_address: String,
    pub cached_balance: Amount,
    pub ledger_balance: Amount,
    /// `cached - ledger` before any correction.
    pub drift: Amount,
    pub corrected: bool,
}

#[derive(Clone)]
pub struct BalanceProjector {
    db: Database,
    ledger: LedgerStore,
    mode: AdjustMode,
    default_preferences: Preferences,
    locks: LockTable,
}

impl BalanceProjector {
    pub fn new(db: Database, ledger: LedgerStore) -> Self {
        Self {
            db,
            ledger,
            mode: AdjustMode::default(),
            default_preferences: Preferences::default(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_mode(mut self, mode: AdjustMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_default_preferences(mut self, preferences: Preferences) -> Self {
        self.default_preferences = preferences;
        self
    }

    pub fn mode(&self) -> AdjustMode {
        self.mode
    }

    /// Enters the serialized section for `wallet_address`. Unknown wallets
    /// are rejected before a lock entry is created for them.
    pub async fn lock_wallet(&self, wallet_address: &str) -> WalletResult<WalletGuard> {
        self.get(wallet_address)?;
        if self.mode == AdjustMode::Unserialized {
            return Ok(WalletGuard { held: None });
        }
        let lock = {
            let mut locks = self.locks.lock().expect("wallet lock table poisoned");
            locks
                .entry(wallet_address.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        Ok(WalletGuard {
            held: Some(HeldLock {
                guard: lock.lock_owned().await,
                wallet_address: wallet_address.to_string(),
                table: Arc::clone(&self.locks),
            }),
        })
    }

    pub fn get(&self, wallet_address: &str) -> WalletResult<WalletAccount> {
        require_address(wallet_address)?;
        self.db
            .get_account(wallet_address)?
            .ok_or_else(|| WalletError::wallet_not_found(wallet_address))
    }

    /// Returns the account, creating it with a zero balance if needed.
    pub fn get_or_create(&self, wallet_address: &str, public_key: &str) -> WalletResult<WalletAccount> {
        require_address(wallet_address)?;
        if let Some(existing) = self.db.get_account(wallet_address)? {
            return Ok(existing);
        }
        let account = self.fresh_account(NewAccount::new(wallet_address, public_key));
        match self.db.insert_account_if_absent(&account)? {
            // another caller created it first
            Some(existing) => Ok(existing),
            None => {
                info!(wallet = %wallet_address, "wallet account created");
                Ok(account)
            }
        }
    }

    /// Creates a new account. Fails with a conflict if the address exists.
    pub fn register(&self, new: NewAccount) -> WalletResult<WalletAccount> {
        require_address(&new.wallet_address)?;
        if new.public_key.trim().is_empty() {
            return Err(WalletError::validation("Public key is required"));
        }
        let account = self.fresh_account(new);
        if self.db.insert_account_if_absent(&account)?.is_some() {
            return Err(WalletError::conflict(format!(
                "wallet {} is already registered",
                account.wallet_address
            )));
        }
        info!(wallet = %account.wallet_address, "wallet account registered");
        Ok(account)
    }

    /// Adds `delta` to the cached balance inside the wallet's serialized
    /// section.
    pub async fn adjust(&self, wallet_address: &str, delta: Amount) -> WalletResult<WalletAccount> {
        let guard = self.lock_wallet(wallet_address).await?;
        self.apply_delta(&guard, wallet_address, delta).await
    }

    /// Read-modify-write of the cached balance. The caller holds `_guard`.
    pub(crate) async fn apply_delta(
        &self,
        _guard: &WalletGuard,
        wallet_address: &str,
        delta: Amount,
    ) -> WalletResult<WalletAccount> {
        let mut account = self.get(wallet_address)?;
        let current = account.shielded_balance;

        // other tasks run here; without the guard they can interleave
        tokio::task::yield_now().await;

        let next = current.checked_add(delta).ok_or_else(|| {
            WalletError::validation(format!("balance of {wallet_address} overflows"))
        })?;
        if next.is_negative() {
            return Err(WalletError::validation(format!(
                "Insufficient balance: {current} available, {} requested",
                -delta
            )));
        }

        account.shielded_balance = next;
        account.updated_at = Utc::now();
        self.db.put_account(&account)?;
        debug!(
            wallet = %wallet_address,
            delta = %delta,
            balance = %next,
            "shielded balance adjusted"
        );
        Ok(account)
    }

    /// Merges `patch` into the account. A balance override bypasses the
    /// ledger and is logged.
    pub async fn update(&self, wallet_address: &str, patch: AccountPatch) -> WalletResult<WalletAccount> {
        let _guard = self.lock_wallet(wallet_address).await?;
        let mut account = self.get(wallet_address)?;

        if let Some(balance) = patch.shielded_balance {
            if balance.is_negative() {
                return Err(WalletError::validation(
                    "shieldedBalance must not be negative",
                ));
            }
            warn!(
                wallet = %wallet_address,
                from = %account.shielded_balance,
                to = %balance,
                "shielded balance overridden outside the ledger"
            );
        }

        patch.apply_to(&mut account);
        account.updated_at = Utc::now();
        self.db.put_account(&account)?;
        Ok(account)
    }

    /// Balance implied by the wallet's non-failed ledger records.
    pub fn ledger_balance(&self, wallet_address: &str) -> WalletResult<Amount> {
        require_address(wallet_address)?;
        self.ledger.net_balance(wallet_address)
    }

    /// Compares the cache with the ledger and overwrites the cache on drift.
    pub async fn reconcile(&self, wallet_address: &str) -> WalletResult<ReconcileReport> {
        let _guard = self.lock_wallet(wallet_address).await?;
        let mut account = self.get(wallet_address)?;
        let ledger_balance = self.ledger.net_balance(wallet_address)?;
        let cached_balance = account.shielded_balance;
        let drift = cached_balance.checked_sub(ledger_balance).ok_or_else(|| {
            WalletError::validation(format!("balance drift of {wallet_address} overflows"))
        })?;

        let mut corrected = false;
        if !drift.is_zero() {
            if ledger_balance.is_negative() {
                warn!(
                    wallet = %wallet_address,
                    ledger = %ledger_balance,
                    "ledger balance is negative, cache left unchanged"
                );
            } else {
                account.shielded_balance = ledger_balance;
                account.updated_at = Utc::now();
                self.db.put_account(&account)?;
                corrected = true;
                warn!(
                    wallet = %wallet_address,
                    cached = %cached_balance,
                    ledger = %ledger_balance,
                    "shielded balance drift corrected"
                );
            }
        }

        Ok(ReconcileReport {
            wallet_address: wallet_address.to_string(),
            cached_balance,
            ledger_balance,
            drift,
            corrected,
        })
    }

    fn fresh_account(&self, new: NewAccount) -> WalletAccount {
        let now = Utc::now();
        WalletAccount {
            wallet_address: new.wallet_address,
            public_key: new.public_key,
            private_key: new.private_key,
            shielded_balance: Amount::ZERO,
            preferences: new
                .preferences
                .unwrap_or_else(|| self.default_preferences.clone()),
            created_at: now,
            updated_at: now,
        }
    }
}

fn require_address(wallet_address: &str) -> WalletResult<()> {
    if wallet_address.trim().is_empty() {
        return Err(WalletError::validation("Wallet address is required"));
    }
    Ok(())
}
