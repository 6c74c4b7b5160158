//! A merkle patricia trie for contract storage that supports being cut
//! apart and reassembled.
//!
//! While there are other Ethereum trie libraries (such as [eth_trie](https://docs.rs/eth_trie/0.1.0/eth_trie)),
//! these libraries are not a good fit if:
//! - You need to carve a trie into independent pieces at a fixed key depth
//!   and hand them out separately.
//! - You need the remaining trunk to keep producing the same root hash and
//!   proofs as the trie it was cut from.
//!
//! The core of this library is the [`Node`][node::Node] type, a by-value
//! trie with cheap structural sharing. [`surgery`] detaches and reattaches
//! subtrees ("limbs") at a chosen depth, [`codec`] gives tries a compact
//! serialized form, and [`slot_values`] lays arbitrary byte strings out
//! over storage slots.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]

pub mod codec;
pub mod nibbles;
pub mod node;
pub mod slot_values;
pub mod surgery;
mod trie_hashing;
pub mod trie_ops;
pub mod utils;

#[cfg(any(test, feature = "trie_debug"))]
pub mod stats;

#[cfg(test)]
pub(crate) mod testing_utils;

pub use trie_hashing::EMPTY_TRIE_HASH;
