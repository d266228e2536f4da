//! Submit-transaction boundary, consumed by the query layer. The core
//! validates the request shape, clock skew, key/address binding, and
//! signature before inserting into the mempool; duplicate ids are
//! idempotent no-ops.

use rnr_core::constants::intake::MAX_TIMESTAMP_SKEW_SECS;
use rnr_core::{Address, Amount, Hash, Mempool, Transaction};
use rnr_crypto::{PUBLIC_KEY_LEN, SIGNATURE_LEN};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Timestamp {got} outside +-{skew}s of node clock {now}")]
    ClockSkew { got: u64, now: u64, skew: u64 },

    #[error("Public key does not derive the sender address")]
    AddressMismatch,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Mempool rejected: {0}")]
    MempoolRejected(String),
}

/// Submit-transaction request as received from the query API
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SubmitTransaction {
    pub from: String,
    pub to: String,
    /// Decimal string
    pub amount: String,
    /// Decimal string
    pub fee: String,
    pub nonce: u64,
    /// Unix seconds; must be within +-5 min of the node clock
    pub timestamp: u64,
    /// Hex, exactly 64 bytes (32-byte r || 32-byte s)
    pub signature: String,
    /// Hex, exactly 64 bytes (uncompressed P-256, no tag)
    pub public_key: String,
    #[serde(default)]
    pub data: Option<String>,
}

/// Outcome of a successful submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub tx_id: Hash,
    /// False when the id was already pooled (idempotent duplicate)
    pub inserted: bool,
}

fn field_err(field: &'static str, reason: impl Into<String>) -> IntakeError {
    IntakeError::InvalidField { field, reason: reason.into() }
}

fn decode_fixed_hex(field: &'static str, value: &str, expected: usize) -> Result<Vec<u8>, IntakeError> {
    let bytes = hex::decode(value).map_err(|e| field_err(field, e.to_string()))?;
    if bytes.len() != expected {
        return Err(field_err(field, format!("expected {expected} bytes, got {}", bytes.len())));
    }
    Ok(bytes)
}

/// Validate a submission and insert it into the mempool
pub fn submit_transaction(
    mempool: &Mempool,
    request: SubmitTransaction,
    now: u64,
) -> Result<SubmitReceipt, IntakeError> {
    let from: Address =
        request.from.parse().map_err(|e| field_err("from", format!("{e}")))?;
    let to: Address = request.to.parse().map_err(|e| field_err("to", format!("{e}")))?;
    let amount =
        Amount::parse_decimal(&request.amount).map_err(|e| field_err("amount", format!("{e}")))?;
    let fee = Amount::parse_decimal(&request.fee).map_err(|e| field_err("fee", format!("{e}")))?;

    if request.timestamp.abs_diff(now) > MAX_TIMESTAMP_SKEW_SECS {
        return Err(IntakeError::ClockSkew {
            got: request.timestamp,
            now,
            skew: MAX_TIMESTAMP_SKEW_SECS,
        });
    }

    let signature = decode_fixed_hex("signature", &request.signature, SIGNATURE_LEN)?;
    let public_key = decode_fixed_hex("public_key", &request.public_key, PUBLIC_KEY_LEN)?;

    if Address::from_public_key(&public_key) != from {
        return Err(IntakeError::AddressMismatch);
    }

    let data = match &request.data {
        Some(data_hex) => hex::decode(data_hex).map_err(|e| field_err("data", e.to_string()))?,
        None => Vec::new(),
    };

    let mut tx = Transaction::new(
        from,
        to,
        amount,
        fee,
        request.nonce,
        request.timestamp,
        public_key,
        data,
    );
    tx.signature = signature;
    tx.verify_signature().map_err(|_| IntakeError::InvalidSignature)?;

    let tx_id = tx.id();
    let inserted =
        mempool.insert(tx).map_err(|e| IntakeError::MempoolRejected(e.to_string()))?;
    debug!(tx = %hex::encode(tx_id), inserted, "transaction submitted");
    Ok(SubmitReceipt { tx_id, inserted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rnr_crypto::KeyPair;

    const NOW: u64 = 1_700_000_000;

    fn valid_request(keypair: &KeyPair, nonce: u64) -> SubmitTransaction {
        let from = Address::new(keypair.address());
        let to = Address::new([9u8; 20]);
        let mut tx = Transaction::new(
            from,
            to,
            Amount::from_u64(1000),
            Amount::from_u64(10),
            nonce,
            NOW,
            keypair.public_key_bytes().to_vec(),
            vec![],
        );
        tx.sign(keypair);

        SubmitTransaction {
            from: from.to_string(),
            to: to.to_string(),
            amount: "1000".to_string(),
            fee: "10".to_string(),
            nonce,
            timestamp: NOW,
            signature: hex::encode(&tx.signature),
            public_key: hex::encode(keypair.public_key_bytes()),
            data: None,
        }
    }

    #[test]
    fn test_valid_submission_inserts() {
        let mempool = Mempool::new(100);
        let keypair = KeyPair::generate();
        let receipt = submit_transaction(&mempool, valid_request(&keypair, 0), NOW).unwrap();
        assert!(receipt.inserted);
        assert!(mempool.contains(&receipt.tx_id));
    }

    #[test]
    fn test_duplicate_is_idempotent() {
        let mempool = Mempool::new(100);
        let keypair = KeyPair::generate();
        let request = valid_request(&keypair, 0);
        let first = submit_transaction(&mempool, request.clone(), NOW).unwrap();
        let second = submit_transaction(&mempool, request, NOW).unwrap();
        assert!(first.inserted);
        assert!(!second.inserted);
        assert_eq!(first.tx_id, second.tx_id);
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn test_clock_skew_rejected() {
        let mempool = Mempool::new(100);
        let keypair = KeyPair::generate();
        let mut request = valid_request(&keypair, 0);
        request.timestamp = NOW - 301;
        assert!(matches!(
            submit_transaction(&mempool, request, NOW),
            Err(IntakeError::ClockSkew { .. })
        ));
    }

    #[test]
    fn test_skew_boundary_accepted() {
        let mempool = Mempool::new(100);
        let keypair = KeyPair::generate();
        let from = Address::new(keypair.address());
        let to = Address::new([9u8; 20]);
        let mut tx = Transaction::new(
            from,
            to,
            Amount::from_u64(1000),
            Amount::from_u64(10),
            0,
            NOW + 300,
            keypair.public_key_bytes().to_vec(),
            vec![],
        );
        tx.sign(&keypair);
        let request = SubmitTransaction {
            from: from.to_string(),
            to: to.to_string(),
            amount: "1000".to_string(),
            fee: "10".to_string(),
            nonce: 0,
            timestamp: NOW + 300,
            signature: hex::encode(&tx.signature),
            public_key: hex::encode(keypair.public_key_bytes()),
            data: None,
        };
        assert!(submit_transaction(&mempool, request, NOW).is_ok());
    }

    #[test]
    fn test_short_signature_rejected() {
        let mempool = Mempool::new(100);
        let keypair = KeyPair::generate();
        let mut request = valid_request(&keypair, 0);
        request.signature = "abcd".to_string();
        assert!(matches!(
            submit_transaction(&mempool, request, NOW),
            Err(IntakeError::InvalidField { field: "signature", .. })
        ));
    }

    #[test]
    fn test_foreign_public_key_rejected() {
        let mempool = Mempool::new(100);
        let keypair = KeyPair::generate();
        let other = KeyPair::generate();
        let mut request = valid_request(&keypair, 0);
        request.public_key = hex::encode(other.public_key_bytes());
        assert!(matches!(
            submit_transaction(&mempool, request, NOW),
            Err(IntakeError::AddressMismatch)
        ));
    }

    #[test]
    fn test_tampered_amount_fails_signature() {
        let mempool = Mempool::new(100);
        let keypair = KeyPair::generate();
        let mut request = valid_request(&keypair, 0);
        request.amount = "99999".to_string();
        assert!(matches!(
            submit_transaction(&mempool, request, NOW),
            Err(IntakeError::InvalidSignature)
        ));
    }

    #[test]
    fn test_non_decimal_amount_rejected() {
        let mempool = Mempool::new(100);
        let keypair = KeyPair::generate();
        let mut request = valid_request(&keypair, 0);
        request.amount = "12.5".to_string();
        assert!(matches!(
            submit_transaction(&mempool, request, NOW),
            Err(IntakeError::InvalidField { field: "amount", .. })
        ));
    }
}
