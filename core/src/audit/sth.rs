//! Ed25519-signed tree heads

use super::merkle::MerkleRoot;
use crate::{Error, Result};
use ed25519_dalek::{Signer, Verifier};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

const STH_DOMAIN: &[u8] = b"georeplica-sth-v1";

/// Published `{size, root}` commitment over an append-only log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTreeHead {
    pub size: u64,
    pub root: MerkleRoot,
    /// Hex-encoded Ed25519 signature over size and root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl SignedTreeHead {
    /// Unsigned tree head
    pub fn new(size: u64, root: MerkleRoot) -> Self {
        Self {
            size,
            root,
            signature: None,
        }
    }

    /// Bytes covered by the signature
    pub fn signed_bytes(&self) -> Vec<u8> {
        let mut message = Vec::with_capacity(STH_DOMAIN.len() + 8 + 32);
        message.extend_from_slice(STH_DOMAIN);
        message.extend_from_slice(&self.size.to_be_bytes());
        message.extend_from_slice(self.root.as_bytes());
        message
    }
}

/// Signing side, held by the log publisher
#[derive(Clone)]
pub struct TreeHeadSigner {
    inner: ed25519_dalek::SigningKey,
}

impl TreeHeadSigner {
    /// Generate a new random signing key
    pub fn generate() -> Self {
        let mut rng = OsRng;
        Self {
            inner: ed25519_dalek::SigningKey::generate(&mut rng),
        }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(bytes),
        }
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    pub fn verifier(&self) -> TreeHeadVerifier {
        TreeHeadVerifier {
            inner: self.inner.verifying_key(),
        }
    }

    pub fn sign(&self, size: u64, root: MerkleRoot) -> SignedTreeHead {
        let mut sth = SignedTreeHead::new(size, root);
        let signature = self.inner.sign(&sth.signed_bytes());
        sth.signature = Some(hex::encode(signature.to_bytes()));
        sth
    }
}

/// Publisher public key, held by auditors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeHeadVerifier {
    inner: ed25519_dalek::VerifyingKey,
}

impl TreeHeadVerifier {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let inner = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|e| Error::Crypto(format!("Invalid public key: {}", e)))?;
        Ok(Self { inner })
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::Crypto(format!("Invalid hex key: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Crypto(format!("Public key must be 32 bytes, got {}", bytes.len())))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Verify the tree head signature; a missing signature fails
    pub fn verify(&self, sth: &SignedTreeHead) -> Result<()> {
        let encoded = sth
            .signature
            .as_deref()
            .ok_or_else(|| Error::Crypto("Tree head is unsigned".to_string()))?;
        let bytes = hex::decode(encoded)
            .map_err(|e| Error::Crypto(format!("Invalid signature encoding: {}", e)))?;
        let bytes: [u8; 64] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Crypto(format!("Signature must be 64 bytes, got {}", bytes.len())))?;

        let signature = ed25519_dalek::Signature::from_bytes(&bytes);
        self.inner
            .verify(&sth.signed_bytes(), &signature)
            .map_err(|_| Error::Crypto("Invalid tree head signature".to_string()))
    }
}
