//! Structural hashes of query shapes.
//!
//! A shape is hashed through its JSON serialization. Plan nodes only hold
//! `Vec`s and `BTreeMap`s, so equal trees serialize identically. Bound
//! parameter values never appear in a tree, which is what lets executions
//! that differ only in values share one cached plan.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Keeps shape hashes apart from any other blake3 use of the same bytes.
const SHAPE_CONTEXT: &str = "qshape 2024 shaped query structure";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// First eight hex digits, enough to tell shapes apart in logs.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

pub fn hash_serde<T: Serialize>(value: &T) -> Result<Hash256> {
    let mut hasher = blake3::Hasher::new_derive_key(SHAPE_CONTEXT);
    serde_json::to_writer(&mut hasher, value).map_err(|e| Error::Hash(e.to_string()))?;
    Ok(Hash256(*hasher.finalize().as_bytes()))
}
