//! Size and shape statistics for tries. Useful when eyeballing how a trie
//! grew or what a codec payload will roughly cost.

use crate::node::Node;

impl Node {
    /// The number of nodes in this trie, the empty trie having zero.
    pub fn node_count(&self) -> usize {
        match self {
            Node::Empty => 0,
            Node::Branch { children, .. } => {
                1 + children.iter().map(|c| c.node_count()).sum::<usize>()
            }
            Node::Extension { child, .. } => 1 + child.node_count(),
            Node::Leaf { .. } => 1,
        }
    }

    /// The number of leaves in this trie.
    pub fn leaf_count(&self) -> usize {
        match self {
            Node::Empty => 0,
            Node::Branch { children, .. } => children.iter().map(|c| c.leaf_count()).sum(),
            Node::Extension { child, .. } => child.leaf_count(),
            Node::Leaf { .. } => 1,
        }
    }

    /// A rough in-memory payload size of this trie: the byte lengths of all
    /// paths, values, caches, and child slots.
    pub fn byte_count(&self) -> usize {
        match self {
            Node::Empty => 0,
            Node::Branch { children, cache } => {
                children.len()
                    + cache.as_ref().map(|c| c.len()).unwrap_or(0)
                    + children.iter().map(|c| c.byte_count()).sum::<usize>()
            }
            Node::Extension { nibbles, child } => nibbles.min_bytes() + child.byte_count(),
            Node::Leaf { nibbles, value } => nibbles.min_bytes() + value.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::{nibbles::Nibbles, node::Node, trie_ops::TrieOpResult};

    #[test]
    fn counts_track_trie_shape() -> TrieOpResult<()> {
        let mut t = Node::default();
        assert_eq!(t.node_count(), 0);
        assert_eq!(t.byte_count(), 0);

        t.insert(Nibbles::from_str("0x1234").unwrap(), vec![0x01])?;
        t.insert(Nibbles::from_str("0x1256").unwrap(), vec![0x02, 0x03])?;

        // An extension over a branch over two leaves.
        assert_eq!(t.node_count(), 4);
        assert_eq!(t.leaf_count(), 2);
        assert!(t.byte_count() > 0);

        Ok(())
    }
}
