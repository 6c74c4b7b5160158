//! Various types and logic that don't fit well into any other module.

use std::{fmt::Display, ops::BitAnd};

use num_traits::PrimInt;

use crate::node::{Node, WrappedNode};

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
/// Simplified trie node type to make logging cleaner.
pub enum TrieNodeType {
    /// Empty node.
    Empty,

    /// Branch node.
    Branch,

    /// Extension node.
    Extension,

    /// Leaf node.
    Leaf,
}

impl From<&WrappedNode> for TrieNodeType {
    fn from(value: &WrappedNode) -> Self {
        (&**value).into()
    }
}

impl From<&Node> for TrieNodeType {
    fn from(node: &Node) -> Self {
        match node {
            Node::Empty => Self::Empty,
            Node::Branch { .. } => Self::Branch,
            Node::Extension { .. } => Self::Extension,
            Node::Leaf { .. } => Self::Leaf,
        }
    }
}

impl Display for TrieNodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrieNodeType::Empty => "Empty",
            TrieNodeType::Branch => "Branch",
            TrieNodeType::Extension => "Extension",
            TrieNodeType::Leaf => "Leaf",
        };

        write!(f, "{}", s)
    }
}

pub(crate) fn is_even<T: PrimInt + BitAnd<Output = T>>(num: T) -> bool {
    (num & T::one()) == T::zero()
}

pub(crate) fn create_mask_of_1s(amt: usize) -> crate::nibbles::NibblesIntern {
    (crate::nibbles::NibblesIntern::one() << amt) - 1
}

/// Strips leading zero bytes from a slice. An all-zero slice trims to the
/// empty slice.
pub fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first_non_zero = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first_non_zero..]
}

/// The minimal big-endian byte representation of an integer. Zero maps to the
/// empty sequence.
pub fn be_bytes_minimal(v: u64) -> Vec<u8> {
    trim_leading_zeros(&v.to_be_bytes()).to_vec()
}
