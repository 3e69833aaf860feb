//! RFC 6962 Merkle tree hashing
//!
//! Leaves hash as `SHA-256(0x00 || entry)`, interior nodes as
//! `SHA-256(0x01 || left || right)`. The split point of a range of `n` leaves
//! is the largest power of two strictly below `n`.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// 32-byte Merkle tree hash, hex-encoded in JSON
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MerkleRoot(pub [u8; 32]);

impl MerkleRoot {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::Crypto(format!("Invalid hex root: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Crypto(format!("Root must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for MerkleRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MerkleRoot({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for MerkleRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for MerkleRoot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for MerkleRoot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

pub fn leaf_hash(entry: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(entry);
    hasher.finalize().into()
}

fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Largest power of two strictly less than `n` (n >= 2)
fn split_point(n: usize) -> usize {
    let mut k = 1;
    while k << 1 < n {
        k <<= 1;
    }
    k
}

fn subtree_hash(leaves: &[[u8; 32]]) -> [u8; 32] {
    match leaves {
        [] => Sha256::digest(b"").into(),
        [leaf] => *leaf,
        _ => {
            let k = split_point(leaves.len());
            node_hash(&subtree_hash(&leaves[..k]), &subtree_hash(&leaves[k..]))
        }
    }
}

fn leaf_hashes<T: AsRef<[u8]>>(entries: &[T]) -> Vec<[u8; 32]> {
    entries.iter().map(|e| leaf_hash(e.as_ref())).collect()
}

/// Merkle tree hash over the entries, in order
pub fn root<T: AsRef<[u8]>>(entries: &[T]) -> MerkleRoot {
    MerkleRoot(subtree_hash(&leaf_hashes(entries)))
}

fn path(index: usize, leaves: &[[u8; 32]], proof: &mut Vec<[u8; 32]>) {
    if leaves.len() <= 1 {
        return;
    }
    let k = split_point(leaves.len());
    if index < k {
        path(index, &leaves[..k], proof);
        proof.push(subtree_hash(&leaves[k..]));
    } else {
        path(index - k, &leaves[k..], proof);
        proof.push(subtree_hash(&leaves[..k]));
    }
}

/// Audit path for the entry at `index`, leaf to root
pub fn inclusion_proof<T: AsRef<[u8]>>(entries: &[T], index: usize) -> Option<Vec<[u8; 32]>> {
    if index >= entries.len() {
        return None;
    }
    let mut proof = Vec::new();
    path(index, &leaf_hashes(entries), &mut proof);
    Some(proof)
}

/// Check that `entry` sits at `index` in a tree of `size` leaves with the given root
pub fn verify_inclusion(
    entry: &[u8],
    index: u64,
    size: u64,
    proof: &[[u8; 32]],
    root: &MerkleRoot,
) -> bool {
    if index >= size {
        return false;
    }

    let mut fnode = index;
    let mut snode = size - 1;
    let mut hash = leaf_hash(entry);

    for sibling in proof {
        if snode == 0 {
            return false;
        }
        if fnode & 1 == 1 || fnode == snode {
            hash = node_hash(sibling, &hash);
            while fnode & 1 == 0 && fnode != 0 {
                fnode >>= 1;
                snode >>= 1;
            }
        } else {
            hash = node_hash(&hash, sibling);
        }
        fnode >>= 1;
        snode >>= 1;
    }

    snode == 0 && hash == root.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("entry-{i}")).collect()
    }

    #[test]
    fn test_empty_root_is_hash_of_nothing() {
        let empty: [&[u8]; 0] = [];
        assert_eq!(
            root(&empty).to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_tree_shape() {
        let e = entries(3);
        let expected = node_hash(
            &node_hash(&leaf_hash(b"entry-0"), &leaf_hash(b"entry-1")),
            &leaf_hash(b"entry-2"),
        );
        assert_eq!(root(&e).0, expected);
        assert_eq!(root(&e[..1]).0, leaf_hash(b"entry-0"));
    }

    #[test]
    fn test_root_detects_any_change() {
        let original = entries(7);
        let base = root(&original);

        let mut modified = original.clone();
        modified[4] = "tampered".to_string();
        assert_ne!(root(&modified), base);

        let mut reordered = original.clone();
        reordered.swap(0, 1);
        assert_ne!(root(&reordered), base);

        assert_ne!(root(&original[..6]), base);
    }

    #[test]
    fn test_inclusion_proofs_verify() {
        for n in 1..=17 {
            let e = entries(n);
            let r = root(&e);
            for (i, entry) in e.iter().enumerate() {
                let proof = inclusion_proof(&e, i).unwrap();
                assert!(
                    verify_inclusion(entry.as_bytes(), i as u64, n as u64, &proof, &r),
                    "size {n} index {i}"
                );
                assert!(!verify_inclusion(b"forged", i as u64, n as u64, &proof, &r));
            }
        }
    }

    #[test]
    fn test_inclusion_rejects_wrong_position() {
        let e = entries(8);
        let r = root(&e);
        let proof = inclusion_proof(&e, 2).unwrap();

        assert!(!verify_inclusion(b"entry-2", 3, 8, &proof, &r));
        assert!(!verify_inclusion(b"entry-2", 2, 9, &proof, &r));
        assert!(!verify_inclusion(b"entry-2", 8, 8, &proof, &r));
        assert!(inclusion_proof(&e, 8).is_none());
    }

    #[test]
    fn test_root_hex_serde() {
        let r = root(&entries(2));
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, format!("\"{}\"", r.to_hex()));
        assert_eq!(serde_json::from_str::<MerkleRoot>(&json).unwrap(), r);
        assert!(serde_json::from_str::<MerkleRoot>("\"abcd\"").is_err());
    }
}
