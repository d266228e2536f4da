use crate::{sha256, CryptoError, Result};
use p256::ecdsa::signature::{RandomizedSigner, Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;

/// Signature length in bytes: 32-byte r followed by 32-byte s
pub const SIGNATURE_LEN: usize = 64;

/// Public key length in bytes: uncompressed x || y, without the SEC1 tag byte
pub const PUBLIC_KEY_LEN: usize = 64;

/// ECDSA P-256 key pair for signing blocks, transactions, and votes
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        Self { signing_key: SigningKey::random(&mut OsRng) }
    }

    /// Create from raw 32-byte secret scalar
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self> {
        let signing_key =
            SigningKey::from_slice(secret).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self { signing_key })
    }

    /// Sign a message (deterministic, RFC 6979)
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        let sig: Signature = self.signing_key.sign(message);
        let mut out = [0u8; SIGNATURE_LEN];
        out.copy_from_slice(&sig.to_bytes());
        out
    }

    /// Sign with fresh randomness. Produces a different, equally valid
    /// signature on every call for the same message.
    pub fn sign_randomized(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        let sig: Signature = self.signing_key.sign_with_rng(&mut OsRng, message);
        let mut out = [0u8; SIGNATURE_LEN];
        out.copy_from_slice(&sig.to_bytes());
        out
    }

    /// Uncompressed public key without the SEC1 tag byte (x || y)
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        let point = self.signing_key.verifying_key().to_encoded_point(false);
        let mut out = [0u8; PUBLIC_KEY_LEN];
        out.copy_from_slice(&point.as_bytes()[1..]);
        out
    }

    /// Raw secret scalar bytes
    pub fn secret_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.signing_key.to_bytes());
        out
    }

    /// 20-byte address derived from this keypair's public key
    pub fn address(&self) -> [u8; 20] {
        address_from_public_key(&self.public_key_bytes())
    }
}

fn verifying_key_from_bytes(public_key: &[u8]) -> Result<VerifyingKey> {
    if public_key.len() != PUBLIC_KEY_LEN {
        return Err(CryptoError::InvalidPublicKey);
    }
    let mut sec1 = [0u8; PUBLIC_KEY_LEN + 1];
    sec1[0] = 0x04;
    sec1[1..].copy_from_slice(public_key);
    VerifyingKey::from_sec1_bytes(&sec1).map_err(|_| CryptoError::InvalidPublicKey)
}

/// Verify an ECDSA P-256 signature over `message` under `public_key`
pub fn verify_signature(message: &[u8], signature: &[u8], public_key: &[u8]) -> Result<bool> {
    if signature.len() != SIGNATURE_LEN {
        return Err(CryptoError::InvalidSignatureLength {
            expected: SIGNATURE_LEN,
            got: signature.len(),
        });
    }
    let vk = verifying_key_from_bytes(public_key)?;
    let sig = Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
    Ok(vk.verify(message, &sig).is_ok())
}

/// Derive a 20-byte address from a 64-byte public key: the last 20 bytes of
/// SHA-256 over the raw key material.
pub fn address_from_public_key(public_key: &[u8]) -> [u8; 20] {
    let hash = sha256(public_key);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..32]);
    address
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::generate();
        let message = sha256(b"route-n-root");

        let signature = keypair.sign(&message);
        let valid =
            verify_signature(&message, &signature, &keypair.public_key_bytes()).unwrap();
        assert!(valid);
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let keypair = KeyPair::generate();
        let other = KeyPair::generate();
        let message = sha256(b"payload");

        let signature = keypair.sign(&message);
        let valid = verify_signature(&message, &signature, &other.public_key_bytes()).unwrap();
        assert!(!valid);
    }

    #[test]
    fn test_verify_rejects_tampered_message() {
        let keypair = KeyPair::generate();
        let signature = keypair.sign(&sha256(b"original"));
        let valid =
            verify_signature(&sha256(b"tampered"), &signature, &keypair.public_key_bytes())
                .unwrap();
        assert!(!valid);
    }

    #[test]
    fn test_randomized_signatures_differ_but_verify() {
        let keypair = KeyPair::generate();
        let message = sha256(b"same message");

        let sig1 = keypair.sign_randomized(&message);
        let sig2 = keypair.sign_randomized(&message);
        assert_ne!(sig1, sig2);

        let pk = keypair.public_key_bytes();
        assert!(verify_signature(&message, &sig1, &pk).unwrap());
        assert!(verify_signature(&message, &sig2, &pk).unwrap());
    }

    #[test]
    fn test_from_secret_bytes_roundtrip() {
        let keypair = KeyPair::generate();
        let restored = KeyPair::from_secret_bytes(&keypair.secret_bytes()).unwrap();
        assert_eq!(keypair.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn test_address_derivation_is_stable() {
        let keypair = KeyPair::generate();
        assert_eq!(keypair.address(), address_from_public_key(&keypair.public_key_bytes()));
    }

    #[test]
    fn test_bad_signature_length_rejected() {
        let keypair = KeyPair::generate();
        let result = verify_signature(&[0u8; 32], &[0u8; 63], &keypair.public_key_bytes());
        assert!(matches!(result, Err(CryptoError::InvalidSignatureLength { .. })));
    }
}
