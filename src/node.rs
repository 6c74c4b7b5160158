//! Definitions for the core types [`Node`] and [`WrappedNode`].
//!
//! A trie is just a [`Node`], where [`Node::Empty`] stands for the empty
//! trie. Tries are persistent: mutation builds fresh nodes along the touched
//! path and shares every untouched subtree with the previous version through
//! [`WrappedNode`] reference counting, so a cheap [`Clone`] of a root is a
//! valid, independently hashable snapshot.

use std::sync::Arc;

use bytes::Bytes;
use ethereum_types::H256;
use serde::{Deserialize, Serialize};

use crate::{
    nibbles::Nibbles,
    trie_hashing::{encode_node, get_root_hash},
    trie_ops::{self, TrieOpResult},
};

/// Alias for a node that is reference counted.
pub type WrappedNode = Arc<Node>;

/// A node in a Merkle Patricia trie.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub enum Node {
    /// An empty trie.
    #[default]
    Empty,

    /// A branch node fanning out on one nibble.
    Branch {
        /// The children of this branch, one slot per nibble.
        children: [WrappedNode; 16],

        /// A precomputed canonical encoding of this branch, if one is known.
        ///
        /// Set by the storage codec and by limb surgery; consulted during
        /// hashing and proof generation to skip recomputation. Never affects
        /// the logical value of the node, only how fast it hashes.
        cache: Option<Bytes>,
    },

    /// An extension node representing a shared path prefix above a branch.
    /// The path is never empty and the child is always a branch.
    Extension {
        /// The path of this extension.
        nibbles: Nibbles,

        /// The child of this extension node.
        child: WrappedNode,
    },

    /// A leaf node holding the remaining key suffix and a value.
    Leaf {
        /// The path of this leaf node.
        nibbles: Nibbles,

        /// The value associated with this leaf. Always a trimmed big-endian
        /// integer (no leading zero bytes).
        value: Vec<u8>,
    },
}

/// Structural equality. Branch caches are intentionally ignored, since a
/// cache never changes the logical value of a node.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Empty, Node::Empty) => true,
            (
                Node::Branch { children: c1, .. },
                Node::Branch { children: c2, .. },
            ) => c1.iter().zip(c2.iter()).all(|(a, b)| a == b),
            (
                Node::Extension {
                    nibbles: n1,
                    child: ch1,
                },
                Node::Extension {
                    nibbles: n2,
                    child: ch2,
                },
            ) => n1 == n2 && ch1 == ch2,
            (
                Node::Leaf {
                    nibbles: n1,
                    value: v1,
                },
                Node::Leaf {
                    nibbles: n2,
                    value: v2,
                },
            ) => n1 == n2 && v1 == v2,
            _ => false,
        }
    }
}

impl Eq for Node {}

impl Node {
    /// Returns `true` if this is the empty trie.
    pub const fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }

    /// Returns `true` if this is a leaf with both an empty path and an empty
    /// value. Empty leaves get a dedicated 2-byte reference in the canonical
    /// encoding and a dedicated tag in the storage codec.
    pub fn is_empty_leaf(&self) -> bool {
        match self {
            Node::Leaf { nibbles, value } => nibbles.is_empty() && value.is_empty(),
            _ => false,
        }
    }

    /// Inserts a node with the given key and value.
    ///
    /// If the key already exists, then the value is overwritten. Passing a
    /// value with a leading zero byte is an error, as values are always
    /// trimmed big-endian integers.
    pub fn insert<K, V>(&mut self, k: K, v: V) -> TrieOpResult<()>
    where
        K: Into<Nibbles>,
        V: Into<Vec<u8>>,
    {
        trie_ops::insert_into_trie(self, k.into(), v.into())
    }

    /// Gets the value stored at the given exact key, if it exists.
    pub fn get<K>(&self, k: K) -> Option<&[u8]>
    where
        K: Into<Nibbles>,
    {
        match self.find_leaf(k)? {
            Node::Leaf { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Descends the given key and returns the leaf terminating it, or `None`
    /// if the key is absent or terminates inside a different-shaped node.
    pub fn find_leaf<K>(&self, k: K) -> Option<&Node>
    where
        K: Into<Nibbles>,
    {
        trie_ops::find_leaf_in_trie(self, k.into())
    }

    /// Deletes the subtree anchored at or below the given key, if one
    /// exists, and re-applies the branch collapse rules at every ancestor.
    ///
    /// Returns whether anything was removed. Deleting a nonexistent key is a
    /// no-op, not an error.
    pub fn delete<K>(&mut self, k: K) -> bool
    where
        K: Into<Nibbles>,
    {
        trie_ops::delete_from_trie(self, k.into())
    }

    /// Returns the subtree rooted exactly at the given path without
    /// modifying the source, or `None` if no node is anchored exactly there
    /// (a path ending mid-extension or mid-leaf yields no extraction).
    pub fn extract<K>(&self, k: K) -> Option<Node>
    where
        K: Into<Nibbles>,
    {
        trie_ops::extract_from_trie(self, k.into())
    }

    /// Returns the Merkle proof for the given key: the canonical encodings
    /// of the nodes visited from the root down the key, root-first. Nodes
    /// short enough to be inlined into their parent's encoding are not
    /// repeated as separate proof elements.
    pub fn get_proof<K>(&self, k: K) -> Vec<Bytes>
    where
        K: Into<Nibbles>,
    {
        trie_ops::get_proof_for_key(self, k.into())
    }

    /// The canonical keccak256 root hash of this trie.
    pub fn hash(&self) -> H256 {
        get_root_hash(self)
    }

    /// The canonical encoding of this node. Consults branch caches where
    /// present.
    pub fn encode(&self) -> Bytes {
        encode_node(self)
    }

    /// A structural clone that duplicates every `path`/`value`/`cache`
    /// buffer and allocates fresh node wrappers throughout, sharing nothing
    /// with `self`. Required before surgery if the original tree must remain
    /// valid. A plain [`Clone`] is the cheap shallow alternative.
    pub fn deep_copy(&self) -> Node {
        match self {
            Node::Empty => Node::Empty,
            Node::Branch { children, cache } => Node::Branch {
                children: std::array::from_fn(|i| Arc::new(children[i].deep_copy())),
                cache: cache
                    .as_ref()
                    .map(|c| Bytes::copy_from_slice(c)),
            },
            Node::Extension { nibbles, child } => Node::Extension {
                nibbles: *nibbles,
                child: Arc::new(child.deep_copy()),
            },
            Node::Leaf { nibbles, value } => Node::Leaf {
                nibbles: *nibbles,
                value: value.clone(),
            },
        }
    }
}

pub(crate) fn branch_from_children(children: [WrappedNode; 16]) -> Node {
    Node::Branch {
        children,
        cache: None,
    }
}

pub(crate) fn empty_branch_children() -> [WrappedNode; 16] {
    std::array::from_fn(|_| Arc::new(Node::Empty))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Arc;

    use crate::nibbles::Nibbles;

    use super::Node;

    #[test]
    fn empty_leaf_detection_works() {
        let empty_leaf = Node::Leaf {
            nibbles: Nibbles::default(),
            value: Vec::new(),
        };
        let normal_leaf = Node::Leaf {
            nibbles: Nibbles::from_str("0x12").unwrap(),
            value: vec![0x01],
        };

        assert!(empty_leaf.is_empty_leaf());
        assert!(!normal_leaf.is_empty_leaf());
        assert!(!Node::Empty.is_empty_leaf());
    }

    #[test]
    fn eq_ignores_branch_cache() {
        let mut a = Node::default();
        a.insert(Nibbles::from_str("0x12").unwrap(), vec![0x01])
            .unwrap();
        a.insert(Nibbles::from_str("0x34").unwrap(), vec![0x02])
            .unwrap();

        let mut b = a.clone();
        if let Node::Branch { cache, .. } = &mut b {
            *cache = Some(a.encode());
        }

        assert_eq!(a, b);
    }

    #[test]
    fn deep_copy_shares_nothing() {
        let mut a = Node::default();
        a.insert(Nibbles::from_str("0x12").unwrap(), vec![0x01])
            .unwrap();
        a.insert(Nibbles::from_str("0x13").unwrap(), vec![0x02])
            .unwrap();

        let b = a.deep_copy();
        assert_eq!(a, b);

        if let (Node::Extension { child: c1, .. }, Node::Extension { child: c2, .. }) = (&a, &b) {
            assert!(!Arc::ptr_eq(c1, c2));
        } else {
            panic!("expected extensions");
        }
    }

    #[test]
    fn serde_round_trip_preserves_structure_and_hash() {
        let mut t = Node::default();
        t.insert(Nibbles::from_str("0x1234").unwrap(), vec![0x01])
            .unwrap();
        t.insert(Nibbles::from_str("0x1256").unwrap(), vec![0x02, 0x03])
            .unwrap();

        let json = serde_json::to_string(&t).unwrap();
        let back: Node = serde_json::from_str(&json).unwrap();

        assert_eq!(back, t);
        assert_eq!(back.hash(), t.hash());
    }
}
