//! Wallet accounts and transaction records.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{amount::Amount, error::WalletError};

/// Default token symbol for new accounts.
pub const DEFAULT_TOKEN: &str = "ETH";

/// Metadata value stored for gas fields until a record is patched.
pub const DEFAULT_GAS_VALUE: &str = "0";

/// Kind of balance-changing operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Shield,
    Transfer,
    Unshield,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Shield => "shield",
            TxKind::Transfer => "transfer",
            TxKind::Unshield => "unshield",
        }
    }

    /// Signed effect of a record of this kind on the owner's shielded balance.
    pub fn balance_effect(&self, amount: Amount) -> Amount {
        match self {
            TxKind::Shield => amount,
            TxKind::Transfer | TxKind::Unshield => -amount,
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxKind {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shield" => Ok(TxKind::Shield),
            "transfer" => Ok(TxKind::Transfer),
            "unshield" => Ok(TxKind::Unshield),
            other => Err(WalletError::validation(format!(
                "unsupported transaction type '{other}' (expected shield, transfer or unshield)"
            ))),
        }
    }
}

/// Privacy classification of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    Shielded,
    Private,
    Revealed,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Shielded => "shielded",
            Privacy::Private => "private",
            Privacy::Revealed => "revealed",
        }
    }

    /// Shielded and private records carry a proof reference; revealed ones do not.
    pub fn requires_proof(&self) -> bool {
        matches!(self, Privacy::Shielded | Privacy::Private)
    }
}

impl fmt::Display for Privacy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Privacy {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shielded" => Ok(Privacy::Shielded),
            "private" => Ok(Privacy::Private),
            "revealed" => Ok(Privacy::Revealed),
            other => Err(WalletError::validation(format!(
                "unsupported privacy '{other}' (expected shielded, private or revealed)"
            ))),
        }
    }
}

/// Lifecycle status of a transaction record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
        }
    }

    /// Transitions the orchestrator allows. The ledger's raw patch path does
    /// not consult this.
    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        matches!(
            (self, next),
            (TxStatus::Pending, TxStatus::Confirmed) | (TxStatus::Pending, TxStatus::Failed)
        )
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TxStatus::Pending),
            "confirmed" => Ok(TxStatus::Confirmed),
            "failed" => Ok(TxStatus::Failed),
            other => Err(WalletError::validation(format!(
                "unsupported status '{other}' (expected pending, confirmed or failed)"
            ))),
        }
    }
}

/// A stored ledger entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: Uuid,
    pub wallet_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(rename = "type")]
    pub kind: TxKind,
    pub amount: Amount,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_address: Option<String>,
    pub status: TxStatus,
    pub privacy: Privacy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zk_proof: Option<String>,
    pub gas_used: String,
    pub gas_price: String,
    pub block_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Set when the record's effect was written to the cached balance.
    /// Records appended through the raw ledger path leave it unset.
    #[serde(default)]
    pub balance_applied: bool,
    /// Insertion order, breaks ties between records created in the same instant.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Signed effect on the owner's balance, zero once the record has failed.
    pub fn balance_effect(&self) -> Amount {
        match self.status {
            TxStatus::Failed => Amount::ZERO,
            TxStatus::Pending | TxStatus::Confirmed => self.kind.balance_effect(self.amount),
        }
    }
}

/// Input to [`crate::LedgerStore::append`].
///
/// The four core fields are optional here so that the ledger, not the
/// caller, decides what counts as missing.
#[derive(Clone, Debug, Default)]
pub struct NewTransaction {
    pub wallet_address: String,
    pub kind: Option<TxKind>,
    pub amount: Option<Amount>,
    pub token: Option<String>,
    pub recipient_address: Option<String>,
    pub privacy: Option<Privacy>,
    pub zk_proof: Option<String>,
    pub tx_hash: Option<String>,
    pub balance_applied: bool,
}

impl NewTransaction {
    pub fn new(
        wallet_address: impl Into<String>,
        kind: TxKind,
        amount: Amount,
        token: impl Into<String>,
        privacy: Privacy,
    ) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            kind: Some(kind),
            amount: Some(amount),
            token: Some(token.into()),
            privacy: Some(privacy),
            ..Self::default()
        }
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient_address = Some(recipient.into());
        self
    }

    pub fn with_proof(mut self, proof: impl Into<String>) -> Self {
        self.zk_proof = Some(proof.into());
        self
    }

    pub fn with_tx_hash(mut self, tx_hash: impl Into<String>) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self
    }

    /// Marks the record as one whose effect the caller applies to the cached
    /// balance. A record that fails to settle is failed, so a `pending` record
    /// carrying the mark always has its effect in the cache.
    pub fn with_balance_applied(mut self) -> Self {
        self.balance_applied = true;
        self
    }
}

/// Partial update merged into a stored record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPatch {
    #[serde(default)]
    pub status: Option<TxStatus>,
    #[serde(default)]
    pub gas_used: Option<String>,
    #[serde(default)]
    pub gas_price: Option<String>,
    #[serde(default)]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl TransactionPatch {
    pub fn status(status: TxStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub(crate) fn apply_to(self, record: &mut TransactionRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(gas_used) = self.gas_used {
            record.gas_used = gas_used;
        }
        if let Some(gas_price) = self.gas_price {
            record.gas_price = gas_price;
        }
        if let Some(block_number) = self.block_number {
            record.block_number = block_number;
        }
        if let Some(reason) = self.failure_reason {
            record.failure_reason = Some(reason);
        }
    }
}

/// Secret key material a client may park with its account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateKeyMaterial {
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub viewing_key: String,
}

impl fmt::Debug for PrivateKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeyMaterial")
            .field("secret", &"<redacted>")
            .field("viewing_key", &"<redacted>")
            .finish()
    }
}

/// Per-wallet user preferences.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub enable_testnets: bool,
    pub default_token: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            enable_testnets: true,
            default_token: DEFAULT_TOKEN.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesPatch {
    #[serde(default)]
    pub enable_testnets: Option<bool>,
    #[serde(default)]
    pub default_token: Option<String>,
}

/// A wallet's account with its cached shielded balance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAccount {
    pub wallet_address: String,
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PrivateKeyMaterial>,
    pub shielded_balance: Amount,
    pub preferences: Preferences,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to [`crate::BalanceProjector::register`].
#[derive(Clone, Debug)]
pub struct NewAccount {
    pub wallet_address: String,
    pub public_key: String,
    pub private_key: Option<PrivateKeyMaterial>,
    pub preferences: Option<Preferences>,
}

impl NewAccount {
    pub fn new(wallet_address: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            public_key: public_key.into(),
            private_key: None,
            preferences: None,
        }
    }
}

/// Partial update merged into a stored account.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPatch {
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub private_key: Option<PrivateKeyMaterial>,
    #[serde(default)]
    pub shielded_balance: Option<Amount>,
    #[serde(default)]
    pub preferences: Option<PreferencesPatch>,
}

impl AccountPatch {
    pub(crate) fn apply_to(self, account: &mut WalletAccount) {
        if let Some(public_key) = self.public_key {
            account.public_key = public_key;
        }
        if let Some(private_key) = self.private_key {
            account.private_key = Some(private_key);
        }
        if let Some(balance) = self.shielded_balance {
            account.shielded_balance = balance;
        }
        if let Some(prefs) = self.preferences {
            if let Some(enable_testnets) = prefs.enable_testnets {
                account.preferences.enable_testnets = enable_testnets;
            }
            if let Some(default_token) = prefs.default_token {
                account.preferences.default_token = default_token;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_records_may_move() {
        assert!(TxStatus::Pending.can_transition_to(TxStatus::Confirmed));
        assert!(TxStatus::Pending.can_transition_to(TxStatus::Failed));
        assert!(!TxStatus::Confirmed.can_transition_to(TxStatus::Pending));
        assert!(!TxStatus::Confirmed.can_transition_to(TxStatus::Failed));
        assert!(!TxStatus::Failed.can_transition_to(TxStatus::Confirmed));
    }

    #[test]
    fn proof_requirement_follows_privacy() {
        assert!(Privacy::Shielded.requires_proof());
        assert!(Privacy::Private.requires_proof());
        assert!(!Privacy::Revealed.requires_proof());
    }

    #[test]
    fn parses_wire_names() {
        assert_eq!("transfer".parse::<TxKind>().unwrap(), TxKind::Transfer);
        assert_eq!("revealed".parse::<Privacy>().unwrap(), Privacy::Revealed);
        assert!("deposit".parse::<TxKind>().is_err());
        assert!("public".parse::<Privacy>().is_err());
    }

    #[test]
    fn record_uses_camel_case_and_type_field() {
        let now = Utc::now();
        let record = TransactionRecord {
            id: Uuid::new_v4(),
            wallet_address: "0xABC".into(),
            tx_hash: None,
            kind: TxKind::Transfer,
            amount: "0.2".parse().unwrap(),
            token: "ETH".into(),
            recipient_address: Some("0xDEF".into()),
            status: TxStatus::Pending,
            privacy: Privacy::Private,
            zk_proof: Some("zkp_1_abc".into()),
            gas_used: DEFAULT_GAS_VALUE.into(),
            gas_price: DEFAULT_GAS_VALUE.into(),
            block_number: 0,
            failure_reason: None,
            balance_applied: false,
            sequence: 1,
            created_at: now,
            updated_at: now,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "transfer");
        assert_eq!(value["walletAddress"], "0xABC");
        assert_eq!(value["recipientAddress"], "0xDEF");
        assert_eq!(value["amount"], "0.200");
        assert!(value.get("txHash").is_none());
    }

    #[test]
    fn failed_records_have_no_balance_effect() {
        let now = Utc::now();
        let mut record = TransactionRecord {
            id: Uuid::new_v4(),
            wallet_address: "0xABC".into(),
            tx_hash: None,
            kind: TxKind::Shield,
            amount: "1".parse().unwrap(),
            token: "ETH".into(),
            recipient_address: None,
            status: TxStatus::Confirmed,
            privacy: Privacy::Shielded,
            zk_proof: Some("p".into()),
            gas_used: DEFAULT_GAS_VALUE.into(),
            gas_price: DEFAULT_GAS_VALUE.into(),
            block_number: 0,
            failure_reason: None,
            balance_applied: false,
            sequence: 1,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(record.balance_effect(), Amount::from_milli(1000));

        record.status = TxStatus::Failed;
        assert_eq!(record.balance_effect(), Amount::ZERO);
    }

    #[test]
    fn private_key_debug_is_redacted() {
        let key = PrivateKeyMaterial {
            secret: "hunter2".into(),
            viewing_key: "view".into(),
        };
        let rendered = format!("{key:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn account_patch_merges_nested_preferences() {
        let now = Utc::now();
        let mut account = WalletAccount {
            wallet_address: "0xABC".into(),
            public_key: "pk".into(),
            private_key: None,
            shielded_balance: Amount::ZERO,
            preferences: Preferences::default(),
            created_at: now,
            updated_at: now,
        };
        let patch: AccountPatch =
            serde_json::from_str(r#"{"preferences":{"defaultToken":"DAI"}}"#).unwrap();
        patch.apply_to(&mut account);

        assert_eq!(account.preferences.default_token, "DAI");
        assert!(account.preferences.enable_testnets);
        assert_eq!(account.public_key, "pk");
    }
}
