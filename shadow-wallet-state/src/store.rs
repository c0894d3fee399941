//! Storage handle shared by the ledger and the balance projector.
//!
//! A [`Database`] is constructed once and injected into every component that
//! needs it. Two backends exist:
//!
//! - in-memory maps guarded by `RwLock`, used by tests and ephemeral deployments;
//! - a sled database opened lazily on first use and reused afterwards.
//!
//! Values are stored as JSON. Wallet addresses and transaction hashes are
//! claimed with compare-and-swap inserts so uniqueness holds under concurrent
//! writers.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use once_cell::sync::OnceCell;
use sled::{
    transaction::{ConflictableTransactionError, TransactionError},
    Db, Transactional, Tree,
};
use uuid::Uuid;

use crate::{
    error::StoreError,
    model::{TransactionRecord, WalletAccount},
};

const ACCOUNTS_TREE: &str = "accounts";
const TRANSACTIONS_TREE: &str = "transactions";
const TX_BY_WALLET_TREE: &str = "tx_by_wallet";
const TX_HASHES_TREE: &str = "tx_hashes";

/// Location string that selects the in-memory backend.
pub const IN_MEMORY_LOCATION: &str = "memory";

/// Result of a conditional update.
#[derive(Clone, Debug, PartialEq)]
pub enum Modified<T> {
    Missing,
    Unchanged(T),
    Updated(T),
}

/// Result of inserting a transaction record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxInsert {
    Inserted,
    /// Another record already owns the transaction hash.
    DuplicateHash(Uuid),
}

#[derive(Clone)]
pub struct Database {
    backend: Arc<Backend>,
}

enum Backend {
    InMemory(MemoryTables),
    Persistent { path: PathBuf, db: OnceCell<Db> },
}

#[derive(Default)]
struct MemoryTables {
    accounts: RwLock<HashMap<String, WalletAccount>>,
    ledger: RwLock<MemoryLedger>,
    next_sequence: AtomicU64,
}

#[derive(Default)]
struct MemoryLedger {
    records: HashMap<Uuid, TransactionRecord>,
    by_wallet: HashMap<String, Vec<Uuid>>,
    hashes: HashMap<String, Uuid>,
}

impl Database {
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(Backend::InMemory(MemoryTables::default())),
        }
    }

    /// A sled-backed database at `path`. Nothing touches the disk until the
    /// first read or write.
    pub fn persistent(path: impl AsRef<Path>) -> Self {
        Self {
            backend: Arc::new(Backend::Persistent {
                path: path.as_ref().to_path_buf(),
                db: OnceCell::new(),
            }),
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(&*self.backend, Backend::Persistent { .. })
    }

    /// Opens the sled database if it has not been opened yet. A no-op for the
    /// in-memory backend.
    pub fn open(&self) -> Result<(), StoreError> {
        match &*self.backend {
            Backend::InMemory(_) => Ok(()),
            Backend::Persistent { path, db } => open_once(path, db).map(|_| ()),
        }
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        match &*self.backend {
            Backend::InMemory(_) => Ok(()),
            Backend::Persistent { db, .. } => {
                if let Some(db) = db.get() {
                    db.flush()?;
                }
                Ok(())
            }
        }
    }

    fn sled(&self) -> Result<Option<&Db>, StoreError> {
        match &*self.backend {
            Backend::InMemory(_) => Ok(None),
            Backend::Persistent { path, db } => open_once(path, db).map(Some),
        }
    }

    fn tree(&self, db: &Db, name: &str) -> Result<Tree, StoreError> {
        Ok(db.open_tree(name)?)
    }

    // ---------------------------------------------------------------------
    // Accounts
    // ---------------------------------------------------------------------

    pub fn get_account(&self, address: &str) -> Result<Option<WalletAccount>, StoreError> {
        if let Some(db) = self.sled()? {
            let tree = self.tree(db, ACCOUNTS_TREE)?;
            return tree
                .get(address.as_bytes())?
                .map(|bytes| decode(&bytes))
                .transpose();
        }
        let tables = self.memory();
        Ok(tables
            .accounts
            .read()
            .expect("account table poisoned")
            .get(address)
            .cloned())
    }

    /// Inserts `account` unless its address is taken. Returns the existing
    /// account when it is.
    pub fn insert_account_if_absent(
        &self,
        account: &WalletAccount,
    ) -> Result<Option<WalletAccount>, StoreError> {
        if let Some(db) = self.sled()? {
            let tree = self.tree(db, ACCOUNTS_TREE)?;
            let bytes = serde_json::to_vec(account)?;
            return match tree.compare_and_swap(
                account.wallet_address.as_bytes(),
                None as Option<&[u8]>,
                Some(bytes),
            )? {
                Ok(()) => Ok(None),
                Err(cas) => cas
                    .current
                    .map(|current| decode(&current))
                    .transpose(),
            };
        }
        let tables = self.memory();
        let mut accounts = tables.accounts.write().expect("account table poisoned");
        if let Some(existing) = accounts.get(&account.wallet_address) {
            return Ok(Some(existing.clone()));
        }
        accounts.insert(account.wallet_address.clone(), account.clone());
        Ok(None)
    }

    pub fn put_account(&self, account: &WalletAccount) -> Result<(), StoreError> {
        if let Some(db) = self.sled()? {
            let tree = self.tree(db, ACCOUNTS_TREE)?;
            tree.insert(account.wallet_address.as_bytes(), serde_json::to_vec(account)?)?;
            return Ok(());
        }
        let tables = self.memory();
        tables
            .accounts
            .write()
            .expect("account table poisoned")
            .insert(account.wallet_address.clone(), account.clone());
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------------

    /// Monotonic insertion counter, persistent across restarts for sled.
    pub fn next_sequence(&self) -> Result<u64, StoreError> {
        if let Some(db) = self.sled()? {
            return Ok(db.generate_id()?);
        }
        Ok(self.memory().next_sequence.fetch_add(1, Ordering::SeqCst))
    }

    /// Stores the record, its wallet index entry and its hash claim. On sled
    /// the three writes commit together or not at all.
    pub fn insert_transaction(&self, record: &TransactionRecord) -> Result<TxInsert, StoreError> {
        if let Some(db) = self.sled()? {
            let hashes = self.tree(db, TX_HASHES_TREE)?;
            let records = self.tree(db, TRANSACTIONS_TREE)?;
            let index = self.tree(db, TX_BY_WALLET_TREE)?;
            let encoded = serde_json::to_vec(record)?;
            let index_key = wallet_index_key(&record.wallet_address, record.sequence);
            let id = &record.id.as_bytes()[..];

            let outcome: Result<TxInsert, TransactionError<StoreError>> = (&hashes, &records, &index)
                .transaction(|(hashes, records, index)| {
                    if let Some(hash) = &record.tx_hash {
                        if let Some(owner) = hashes.get(hash.as_bytes())? {
                            let owner =
                                decode_uuid(&owner).map_err(ConflictableTransactionError::Abort)?;
                            return Ok(TxInsert::DuplicateHash(owner));
                        }
                        hashes.insert(hash.as_bytes(), id)?;
                    }
                    records.insert(id, encoded.as_slice())?;
                    index.insert(index_key.as_slice(), id)?;
                    Ok(TxInsert::Inserted)
                });
            return match outcome {
                Ok(inserted) => Ok(inserted),
                Err(TransactionError::Abort(err)) => Err(err),
                Err(TransactionError::Storage(err)) => Err(err.into()),
            };
        }

        let tables = self.memory();
        let mut ledger = tables.ledger.write().expect("ledger table poisoned");
        if let Some(hash) = &record.tx_hash {
            if let Some(owner) = ledger.hashes.get(hash) {
                return Ok(TxInsert::DuplicateHash(*owner));
            }
            ledger.hashes.insert(hash.clone(), record.id);
        }
        ledger
            .by_wallet
            .entry(record.wallet_address.clone())
            .or_default()
            .push(record.id);
        ledger.records.insert(record.id, record.clone());
        Ok(TxInsert::Inserted)
    }

    pub fn get_transaction(&self, id: Uuid) -> Result<Option<TransactionRecord>, StoreError> {
        if let Some(db) = self.sled()? {
            let records = self.tree(db, TRANSACTIONS_TREE)?;
            return records
                .get(id.as_bytes())?
                .map(|bytes| decode(&bytes))
                .transpose();
        }
        Ok(self
            .memory()
            .ledger
            .read()
            .expect("ledger table poisoned")
            .records
            .get(&id)
            .cloned())
    }

    /// Every record owned by `address`, in insertion order.
    pub fn transactions_for_wallet(
        &self,
        address: &str,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        if let Some(db) = self.sled()? {
            let index = self.tree(db, TX_BY_WALLET_TREE)?;
            let records = self.tree(db, TRANSACTIONS_TREE)?;
            let mut out = Vec::new();
            for entry in index.scan_prefix(wallet_index_prefix(address)) {
                let (_, id_bytes) = entry?;
                match records.get(&id_bytes)? {
                    Some(bytes) => out.push(decode(&bytes)?),
                    None => {
                        return Err(StoreError::Corrupt(format!(
                            "wallet index for {address} points at a missing record"
                        )))
                    }
                }
            }
            return Ok(out);
        }

        let ledger = self.memory().ledger.read().expect("ledger table poisoned");
        Ok(ledger
            .by_wallet
            .get(address)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| ledger.records.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Read-modify-write of a single record. `apply` returns `false` to leave
    /// the record untouched.
    pub fn modify_transaction<F>(
        &self,
        id: Uuid,
        mut apply: F,
    ) -> Result<Modified<TransactionRecord>, StoreError>
    where
        F: FnMut(&mut TransactionRecord) -> bool,
    {
        if let Some(db) = self.sled()? {
            let records = self.tree(db, TRANSACTIONS_TREE)?;
            loop {
                let Some(current) = records.get(id.as_bytes())? else {
                    return Ok(Modified::Missing);
                };
                let mut record: TransactionRecord = decode(&current)?;
                if !apply(&mut record) {
                    return Ok(Modified::Unchanged(record));
                }
                let next = serde_json::to_vec(&record)?;
                match records.compare_and_swap(id.as_bytes(), Some(&current), Some(next))? {
                    Ok(()) => return Ok(Modified::Updated(record)),
                    // lost a race with another writer, re-read and retry
                    Err(_) => continue,
                }
            }
        }

        let mut ledger = self.memory().ledger.write().expect("ledger table poisoned");
        let Some(record) = ledger.records.get_mut(&id) else {
            return Ok(Modified::Missing);
        };
        let mut candidate = record.clone();
        if !apply(&mut candidate) {
            return Ok(Modified::Unchanged(candidate));
        }
        *record = candidate.clone();
        Ok(Modified::Updated(candidate))
    }

    fn memory(&self) -> &MemoryTables {
        match &*self.backend {
            Backend::InMemory(tables) => tables,
            Backend::Persistent { .. } => unreachable!("memory tables requested on sled backend"),
        }
    }
}

fn open_once<'a>(path: &Path, cell: &'a OnceCell<Db>) -> Result<&'a Db, StoreError> {
    cell.get_or_try_init(|| {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }
        tracing::info!(path = %path.display(), "opening wallet database");
        sled::open(path).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })
    })
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn decode_uuid(bytes: &[u8]) -> Result<Uuid, StoreError> {
    Uuid::from_slice(bytes).map_err(|err| StoreError::Corrupt(format!("bad record id: {err}")))
}

fn wallet_index_prefix(address: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(address.len() + 1);
    key.extend_from_slice(address.as_bytes());
    key.push(0);
    key
}

fn wallet_index_key(address: &str, sequence: u64) -> Vec<u8> {
    let mut key = wallet_index_prefix(address);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}
