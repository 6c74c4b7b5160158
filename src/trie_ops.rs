//! All of the mutation and query logic for the trie: insert, delete, point
//! lookup, subtree extraction and Merkle proofs.
//!
//! Insert and delete are path-copying: they build new nodes bottom-up along
//! the mutated path and share every untouched subtree with the previous
//! version of the trie. Any node rebuilt here loses its branch `cache`,
//! since its canonical encoding has changed.

use std::sync::Arc;

use bytes::Bytes;
use log::trace;
use thiserror::Error;

use crate::{
    nibbles::Nibbles,
    node::{branch_from_children, empty_branch_children, Node, WrappedNode},
    trie_hashing::encode_node,
    utils::TrieNodeType,
};

/// Errors that can occur when mutating a trie.
///
/// These are all contract violations on the caller's part. Lookups and
/// deletes of absent keys are normal results, never errors.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum TrieOpError {
    /// Attempted to insert a value that was not a trimmed big-endian
    /// integer.
    #[error("Attempted to insert a value with a leading zero byte: 0x{0}")]
    UntrimmedValue(String),

    /// The key ran out while existing structure continued below it. Keys of
    /// a storage trie all have the same length, so this can never happen
    /// with well-formed input.
    #[error("The key 0x{0:x} terminates inside existing trie structure")]
    KeyTerminatesInsideStructure(Nibbles),
}

/// Alias for trie mutation operation results.
pub type TrieOpResult<T> = Result<T, TrieOpError>;

pub(crate) fn insert_into_trie(trie: &mut Node, k: Nibbles, v: Vec<u8>) -> TrieOpResult<()> {
    trace!(
        "Inserting a value at {:x} (root: {})...",
        k,
        TrieNodeType::from(&*trie)
    );

    if v.first() == Some(&0) {
        return Err(TrieOpError::UntrimmedValue(hex::encode(&v)));
    }

    *trie = insert_rec(trie, k, v)?;
    Ok(())
}

fn insert_rec(node: &Node, mut k: Nibbles, v: Vec<u8>) -> TrieOpResult<Node> {
    match node {
        Node::Empty => Ok(Node::Leaf { nibbles: k, value: v }),
        Node::Branch { children, .. } => {
            if k.is_empty() {
                return Err(TrieOpError::KeyTerminatesInsideStructure(k));
            }

            let nib = k.pop_next_nibble_front() as usize;
            let mut children = children.clone();
            children[nib] = Arc::new(insert_rec(&children[nib], k, v)?);

            Ok(branch_from_children(children))
        }
        Node::Extension { nibbles, child } => {
            let i = Nibbles::find_nibble_idx_that_differs_between_nibbles_different_lengths(
                nibbles, &k,
            );

            if i == nibbles.count {
                let child = Arc::new(insert_rec(child, k.truncate_n_nibbles_front(i), v)?);
                return Ok(Node::Extension {
                    nibbles: *nibbles,
                    child,
                });
            }

            if i == k.count {
                // The key dies partway down this extension's path.
                return Err(TrieOpError::KeyTerminatesInsideStructure(k));
            }

            // Split: a fresh branch joins the extension's remaining suffix
            // with a new leaf, under the shared prefix if one exists.
            let (common, mut ext_rest) = nibbles.split_at_idx(i);
            let ext_nib = ext_rest.pop_next_nibble_front() as usize;

            let mut k_rest = k.split_at_idx_postfix(i);
            let k_nib = k_rest.pop_next_nibble_front() as usize;

            let mut children = empty_branch_children();
            children[ext_nib] = match ext_rest.is_empty() {
                true => child.clone(),
                false => Arc::new(Node::Extension {
                    nibbles: ext_rest,
                    child: child.clone(),
                }),
            };
            children[k_nib] = Arc::new(Node::Leaf {
                nibbles: k_rest,
                value: v,
            });

            Ok(wrap_in_extension_if_needed(
                common,
                branch_from_children(children),
            ))
        }
        Node::Leaf { nibbles, value } => {
            let i = Nibbles::find_nibble_idx_that_differs_between_nibbles_different_lengths(
                nibbles, &k,
            );

            if i == nibbles.count && i == k.count {
                // Exact match, replace the value.
                return Ok(Node::Leaf { nibbles: k, value: v });
            }

            if i == nibbles.count || i == k.count {
                // One path is a strict prefix of the other; a value cannot
                // anchor inside a leaf's path.
                return Err(TrieOpError::KeyTerminatesInsideStructure(k));
            }

            let (common, mut leaf_rest) = nibbles.split_at_idx(i);
            let leaf_nib = leaf_rest.pop_next_nibble_front() as usize;

            let mut k_rest = k.split_at_idx_postfix(i);
            let k_nib = k_rest.pop_next_nibble_front() as usize;

            let mut children = empty_branch_children();
            children[leaf_nib] = Arc::new(Node::Leaf {
                nibbles: leaf_rest,
                value: value.clone(),
            });
            children[k_nib] = Arc::new(Node::Leaf {
                nibbles: k_rest,
                value: v,
            });

            Ok(wrap_in_extension_if_needed(
                common,
                branch_from_children(children),
            ))
        }
    }
}

fn wrap_in_extension_if_needed(prefix: Nibbles, branch: Node) -> Node {
    match prefix.is_empty() {
        true => branch,
        false => Node::Extension {
            nibbles: prefix,
            child: Arc::new(branch),
        },
    }
}

pub(crate) fn find_leaf_in_trie(trie: &Node, mut k: Nibbles) -> Option<&Node> {
    let mut node = trie;

    loop {
        match node {
            Node::Empty => return None,
            Node::Branch { children, .. } => {
                if k.is_empty() {
                    return None;
                }

                let nib = k.pop_next_nibble_front() as usize;
                node = &children[nib];
            }
            Node::Extension { nibbles, child } => {
                if !path_consumes(&mut k, nibbles) {
                    return None;
                }

                node = child;
            }
            Node::Leaf { nibbles, .. } => {
                return (k == *nibbles).then_some(node);
            }
        }
    }
}

/// If `prefix` is a leading prefix of `k`, consumes it from `k` and returns
/// `true`.
fn path_consumes(k: &mut Nibbles, prefix: &Nibbles) -> bool {
    if k.count < prefix.count || k.get_nibble_range(0..prefix.count) != *prefix {
        return false;
    }

    k.truncate_n_nibbles_front_mut(prefix.count);
    true
}

/// Deletes the subtree anchored at or below `k` and re-applies the collapse
/// rules at every ancestor. Returns whether anything was removed.
pub(crate) fn delete_from_trie(trie: &mut Node, k: Nibbles) -> bool {
    trace!("Deleting the subtree at {:x}...", k);

    match delete_rec(trie, k) {
        Some(new_node) => {
            *trie = new_node;
            true
        }
        None => false,
    }
}

/// Returns the replacement node if anything below `node` was deleted, and
/// `None` when the key leads nowhere (a no-op delete).
fn delete_rec(node: &Node, mut k: Nibbles) -> Option<Node> {
    match node {
        Node::Empty => None,
        _ if k.is_empty() => Some(Node::Empty),
        Node::Branch { children, .. } => {
            let nib = k.pop_next_nibble_front() as usize;
            let new_child = delete_rec(&children[nib], k)?;

            let mut children = children.clone();
            children[nib] = Arc::new(new_child);

            Some(collapse_branch(children))
        }
        Node::Extension { nibbles, child } => {
            if k.count <= nibbles.count {
                // The extension's whole subtree dies only when the key
                // matches its stored path exactly; a key that dies partway
                // through it matches nothing.
                return (k.count == nibbles.count
                    && nibbles.nibbles_are_identical_up_to_smallest_count(&k))
                .then_some(Node::Empty);
            }

            if !path_consumes(&mut k, nibbles) {
                return None;
            }

            let new_child = delete_rec(child, k)?;
            Some(merge_into_extension(*nibbles, new_child))
        }
        Node::Leaf { nibbles, .. } => {
            // `k` is non-empty here; the leaf dies iff it lives at or below
            // the deleted prefix.
            (k.count <= nibbles.count && nibbles.nibbles_are_identical_up_to_smallest_count(&k))
                .then_some(Node::Empty)
        }
    }
}

/// Rebuilds a branch from `children`, collapsing it if fewer than two
/// non-empty children survive.
fn collapse_branch(children: [WrappedNode; 16]) -> Node {
    let mut non_empty = children.iter().enumerate().filter(|(_, c)| !c.is_empty());

    let first = non_empty.next();
    let second = non_empty.next();

    match (first, second) {
        (None, _) => Node::Empty,
        (Some((nib, only_child)), None) => {
            merge_into_extension(Nibbles::from_nibble(nib as u8), (**only_child).clone())
        }
        _ => branch_from_children(children),
    }
}

/// Places `child` under the path `prefix`, merging paths so that no chained
/// extensions or extension-over-leaf shapes are ever produced.
pub(crate) fn merge_into_extension(prefix: Nibbles, child: Node) -> Node {
    match child {
        Node::Empty => Node::Empty,
        Node::Branch { .. } => Node::Extension {
            nibbles: prefix,
            child: Arc::new(child),
        },
        Node::Extension { nibbles, child } => Node::Extension {
            nibbles: prefix.merge_nibbles(&nibbles),
            child,
        },
        Node::Leaf { nibbles, value } => Node::Leaf {
            nibbles: prefix.merge_nibbles(&nibbles),
            value,
        },
    }
}

/// Returns a clone of the subtree rooted exactly at `k`, or `None` if no
/// node is anchored there.
pub(crate) fn extract_from_trie(trie: &Node, mut k: Nibbles) -> Option<Node> {
    let mut node = trie;

    loop {
        if k.is_empty() {
            return Some(node.clone());
        }

        match node {
            Node::Empty | Node::Leaf { .. } => return None,
            Node::Branch { children, .. } => {
                let nib = k.pop_next_nibble_front() as usize;
                node = &children[nib];
            }
            Node::Extension { nibbles, child } => {
                if !path_consumes(&mut k, nibbles) {
                    return None;
                }

                node = child;
            }
        }
    }
}

/// Collects the Merkle proof for `k`: the canonical encodings of the nodes
/// visited root-first. Nodes whose encoding is shorter than 32 bytes are
/// already inlined in their parent's encoding and are not repeated, except
/// for the root which is always present.
pub(crate) fn get_proof_for_key(trie: &Node, mut k: Nibbles) -> Vec<Bytes> {
    let mut proof = Vec::new();
    let mut node = trie;

    loop {
        if node.is_empty() {
            break;
        }

        let enc = encode_node(node);
        if proof.is_empty() || enc.len() >= 32 {
            proof.push(enc);
        }

        match node {
            Node::Branch { children, .. } => {
                if k.is_empty() {
                    break;
                }

                let nib = k.pop_next_nibble_front() as usize;
                node = &children[nib];
            }
            Node::Extension { nibbles, child } => {
                if !path_consumes(&mut k, nibbles) {
                    break;
                }

                node = child;
            }
            _ => break,
        }
    }

    proof
}
