//! Node identities as presented by relay clients and reported by agents.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AdmissionError;

const NODE_KEY_PREFIX: &str = "nodekey:";
const NODE_KEY_LEN: usize = 32;

/// A node's public key. Text form is `nodekey:` followed by 64 hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdentity([u8; NODE_KEY_LEN]);

impl NodeIdentity {
    pub const fn from_bytes(bytes: [u8; NODE_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NODE_KEY_LEN] {
        &self.0
    }
}

impl FromStr for NodeIdentity {
    type Err = AdmissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix(NODE_KEY_PREFIX)
            .ok_or_else(|| AdmissionError::InvalidNodeKey(format!("missing '{}' prefix", NODE_KEY_PREFIX)))?;

        let mut bytes = [0u8; NODE_KEY_LEN];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|e| AdmissionError::InvalidNodeKey(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", NODE_KEY_PREFIX, hex::encode(self.0))
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeIdentity({})", self)
    }
}

impl Serialize for NodeIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
