//! The canonical RLP encoding and keccak hashing of trie nodes.
//!
//! This is the byte-exact protocol encoding: hashes computed here match the
//! `storageHash` values obtainable from a chain node's proof endpoint. It is
//! pure and deterministic; the only shortcut taken is consulting a branch's
//! precomputed `cache` (set by the storage codec or by limb surgery) in place
//! of re-encoding its subtree.

use bytes::Bytes;
use ethereum_types::H256;
use keccak_hash::keccak;
use rlp::RlpStream;

use crate::node::Node;

/// The canonical reference to an absent child: the RLP encoding of an empty
/// byte string.
pub(crate) const RLP_NULL: [u8; 1] = [0x80];

/// The protocol-mandated reference to an empty leaf (path and value both
/// empty): an RLP list holding one empty list.
pub(crate) const RLP_EMPTY_LEAF: [u8; 2] = [0xc1, 0xc0];

/// The hash of the empty trie, `keccak256(rlp(""))`.
pub const EMPTY_TRIE_HASH: H256 = keccak_hash::KECCAK_NULL_RLP;

/// Computes the canonical root hash of a trie.
pub(crate) fn get_root_hash(node: &Node) -> H256 {
    match node {
        Node::Empty => EMPTY_TRIE_HASH,
        _ => keccak(encode_node(node)),
    }
}

/// Computes the canonical RLP encoding of a node.
///
/// Branch nodes with a populated `cache` return it directly without visiting
/// their subtree.
pub(crate) fn encode_node(node: &Node) -> Bytes {
    match node {
        Node::Empty => Bytes::from_static(&RLP_NULL),
        Node::Branch { children, cache } => {
            if let Some(cache) = cache {
                return cache.clone();
            }

            let mut stream = RlpStream::new_list(17);
            for c in children.iter() {
                append_node_ref(&mut stream, c);
            }

            // Branches in a storage trie never carry a value of their own.
            stream.append_empty_data();

            stream.out().freeze()
        }
        Node::Extension { nibbles, child } => {
            let mut stream = RlpStream::new_list(2);

            stream.append(&nibbles.to_hex_prefix_encoding(false));
            append_node_ref(&mut stream, child);

            stream.out().freeze()
        }
        Node::Leaf { nibbles, value } => {
            let mut stream = RlpStream::new_list(2);

            stream.append(&nibbles.to_hex_prefix_encoding(true));

            // Leaf payloads are themselves RLP encoded before becoming the
            // second list item.
            stream.append(&rlp::encode(value).to_vec());

            stream.out().freeze()
        }
    }
}

/// Appends the reference to a child node: empty data if absent, the fixed
/// 2-byte encoding for an empty leaf, the child's full encoding if shorter
/// than 32 bytes, or its keccak hash otherwise.
fn append_node_ref(stream: &mut RlpStream, child: &Node) {
    if child.is_empty() {
        stream.append_empty_data();
    } else if child.is_empty_leaf() {
        stream.append_raw(&RLP_EMPTY_LEAF, 1);
    } else {
        let enc = encode_node(child);
        match enc.len() < 32 {
            true => stream.append_raw(&enc, 1),
            false => stream.append(&keccak(&enc)),
        };
    }
}
