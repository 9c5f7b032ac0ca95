//! Identity and attribute types shared by every storage engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::GraphStoreError;

/// Attribute map attached to a node or an edge.
///
/// An empty map is a legal stored value and is distinct from "entity absent":
/// point lookups signal [`GraphStoreError::NotFound`] for the latter.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Caller-supplied node identity: an integer or a string scalar.
///
/// Ordering is total (`Int` sorts before `Str`), which gives undirected edge
/// canonicalization a deterministic pair order across engines.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeId {
    Int(i64),
    Str(String),
}

impl NodeId {
    /// Lossless text encoding used as the storage key in the relational and
    /// key-value engines: the JSON text of the id. Strings keep their quotes,
    /// so `Int(1)` (`1`) and `Str("1")` (`"1"`) never collide.
    pub fn storage_key(&self) -> String {
        match self {
            NodeId::Int(n) => n.to_string(),
            NodeId::Str(s) => serde_json::Value::String(s.clone()).to_string(),
        }
    }

    /// Inverse of [`NodeId::storage_key`].
    pub fn from_storage_key(key: &str) -> Result<Self, GraphStoreError> {
        serde_json::from_str(key).map_err(|e| {
            GraphStoreError::serialization(format!("bad node key {key:?}: {e}"))
        })
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Int(n) => write!(f, "{n}"),
            NodeId::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for NodeId {
    fn from(value: i64) -> Self {
        NodeId::Int(value)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        NodeId::Str(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        NodeId::Str(value)
    }
}

/// Edge identity derived from the endpoint pair.
///
/// For undirected graphs the pair is order-normalized at construction, so
/// `(u, v)` and `(v, u)` resolve to the same stored edge in every engine.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source: NodeId,
    pub target: NodeId,
}

impl EdgeKey {
    pub fn canonical(u: NodeId, v: NodeId, directed: bool) -> Self {
        if directed || u <= v {
            EdgeKey { source: u, target: v }
        } else {
            EdgeKey { source: v, target: u }
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_round_trips_and_distinguishes_types() {
        let int_id = NodeId::Int(1);
        let str_id = NodeId::Str("1".into());
        assert_ne!(int_id.storage_key(), str_id.storage_key());
        assert_eq!(NodeId::from_storage_key(&int_id.storage_key()).unwrap(), int_id);
        assert_eq!(NodeId::from_storage_key(&str_id.storage_key()).unwrap(), str_id);
    }

    #[test]
    fn undirected_edge_key_is_order_normalized() {
        let a = NodeId::from("a");
        let b = NodeId::from("b");
        assert_eq!(
            EdgeKey::canonical(b.clone(), a.clone(), false),
            EdgeKey::canonical(a.clone(), b.clone(), false)
        );
        assert_ne!(
            EdgeKey::canonical(b.clone(), a.clone(), true),
            EdgeKey::canonical(a, b, true)
        );
    }
}
