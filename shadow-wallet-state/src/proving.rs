//! Proof and transaction-hash generation.
//!
//! Proof references are opaque strings; nothing in the system verifies them.
//! The backend is a trait object so a real prover can replace the mock
//! without touching the orchestrator.

use chrono::Utc;
use rand::{distributions::Uniform, Rng, RngCore};

use crate::{amount::Amount, error::WalletResult, model::TxKind};

/// What a proof is asked to attest to.
#[derive(Clone, Copy, Debug)]
pub struct ProofStatement<'a> {
    pub kind: TxKind,
    pub wallet_address: &'a str,
    pub recipient_address: Option<&'a str>,
    pub amount: Amount,
    pub token: &'a str,
}

pub trait ProvingBackend: Send + Sync {
    /// Produces a proof reference for `statement`.
    fn prove(&self, statement: &ProofStatement<'_>) -> WalletResult<String>;

    /// Produces a fresh transaction hash.
    fn transaction_hash(&self) -> String;
}

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const PROOF_SUFFIX_LEN: usize = 9;

/// Random hashes and `zkp_<millis>_<suffix>` proof references.
#[derive(Clone, Copy, Debug, Default)]
pub struct MockProvingBackend;

impl ProvingBackend for MockProvingBackend {
    fn prove(&self, _statement: &ProofStatement<'_>) -> WalletResult<String> {
        let suffix: String = rand::thread_rng()
            .sample_iter(Uniform::from(0..BASE36.len()))
            .take(PROOF_SUFFIX_LEN)
            .map(|i| BASE36[i] as char)
            .collect();
        Ok(format!("zkp_{}_{suffix}", Utc::now().timestamp_millis()))
    }

    fn transaction_hash(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        format!("0x{}", hex::encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement() -> ProofStatement<'static> {
        ProofStatement {
            kind: TxKind::Shield,
            wallet_address: "0xABC",
            recipient_address: None,
            amount: Amount::from_milli(1000),
            token: "ETH",
        }
    }

    #[test]
    fn hashes_are_prefixed_hex() {
        let hash = MockProvingBackend.transaction_hash();
        assert_eq!(hash.len(), 66);
        assert!(hash.starts_with("0x"));
        assert!(hash[2..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(hash, MockProvingBackend.transaction_hash());
    }

    #[test]
    fn proofs_follow_reference_format() {
        let proof = MockProvingBackend.prove(&statement()).unwrap();
        let parts: Vec<&str> = proof.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "zkp");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), PROOF_SUFFIX_LEN);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }
}
