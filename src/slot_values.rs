//! Storage-slot value layout.
//!
//! Maps a 32-byte key and an arbitrary byte string onto trie entries the
//! way contract storage lays out dynamic `bytes`: the primary slot is
//! `keccak(key)`. A value shorter than 32 bytes fits in the slot word
//! itself, right-padded with its doubled length in the final byte. Longer
//! values store `len * 2 + 1` in the primary slot and the payload in
//! 32-byte chunks keyed by `keccak(slot)`, `keccak(slot + 1)`, and so on.
//! Every inserted word is trimmed of leading zero bytes first.

use ethereum_types::H256;
use keccak_hash::keccak;

use crate::{
    nibbles::Nibbles,
    node::Node,
    trie_ops::TrieOpResult,
    utils::{be_bytes_minimal, trim_leading_zeros},
};

/// Inserts `value` under the storage slot derived from `key`, splitting it
/// into chunk entries when it does not fit in a single word.
pub fn insert_bytes(trie: &mut Node, key: H256, value: &[u8]) -> TrieOpResult<()> {
    let mut slot = keccak(key.as_bytes());

    if value.len() < 32 {
        let mut word = right_padded_word(value);
        word[31] = (value.len() << 1) as u8;

        return trie.insert(slot_path(slot), trim_leading_zeros(&word).to_vec());
    }

    let header = be_bytes_minimal(((value.len() as u64) << 1) | 1);
    trie.insert(slot_path(slot), header)?;

    for chunk in value.chunks(32) {
        let word = right_padded_word(chunk);

        trie.insert(
            slot_path(keccak(slot.as_bytes())),
            trim_leading_zeros(&word).to_vec(),
        )?;

        increment_slot(&mut slot);
    }

    Ok(())
}

fn slot_path(slot: H256) -> Nibbles {
    Nibbles::from_h256_be(slot)
}

fn right_padded_word(v: &[u8]) -> [u8; 32] {
    let mut word = [0; 32];
    word[..v.len()].copy_from_slice(v);

    word
}

/// Big-endian increment with carry, wrapping to zero on overflow.
fn increment_slot(slot: &mut H256) {
    for byte in slot.as_bytes_mut().iter_mut().rev() {
        if *byte == u8::MAX {
            *byte = 0;
        } else {
            *byte += 1;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use ethereum_types::H256;
    use keccak_hash::keccak;

    use super::{increment_slot, insert_bytes, slot_path};
    use crate::{node::Node, testing_utils::common_setup, trie_ops::TrieOpResult};

    fn key(b: u8) -> H256 {
        H256::repeat_byte(b)
    }

    #[test]
    fn short_value_packs_into_the_slot_word() -> TrieOpResult<()> {
        common_setup();

        let mut t = Node::default();
        insert_bytes(&mut t, key(0xab), &[0x12, 0x34])?;

        let mut expected = [0_u8; 32];
        expected[0] = 0x12;
        expected[1] = 0x34;
        expected[31] = 0x04;

        let slot = keccak(key(0xab).as_bytes());
        assert_eq!(t.get(slot_path(slot)), Some(expected.as_slice()));
        assert_eq!(t.leaf_count(), 1);

        Ok(())
    }

    #[test]
    fn short_value_word_is_trimmed() -> TrieOpResult<()> {
        common_setup();

        // A zero-prefixed value keeps its inner zeros but loses the lead.
        let mut t = Node::default();
        insert_bytes(&mut t, key(0x01), &[0x00, 0x7f])?;

        let slot = keccak(key(0x01).as_bytes());
        let got = t.get(slot_path(slot)).unwrap();

        // word = 00 7f 00..00 04, trimmed to 7f 00..00 04 (31 bytes).
        assert_eq!(got.len(), 31);
        assert_eq!(got[0], 0x7f);
        assert_eq!(got[30], 0x04);

        Ok(())
    }

    #[test]
    fn empty_value_becomes_an_empty_leaf() -> TrieOpResult<()> {
        common_setup();

        let mut t = Node::default();
        insert_bytes(&mut t, key(0x02), &[])?;

        let slot = keccak(key(0x02).as_bytes());
        assert_eq!(t.get(slot_path(slot)), Some([].as_slice()));

        Ok(())
    }

    #[test]
    fn long_value_stores_a_header_and_chunks() -> TrieOpResult<()> {
        common_setup();

        let value: Vec<u8> = (1..=70).collect();

        let mut t = Node::default();
        insert_bytes(&mut t, key(0x03), &value)?;

        // Header plus three chunk leaves (32 + 32 + 6 padded).
        assert_eq!(t.leaf_count(), 4);

        let slot = keccak(key(0x03).as_bytes());
        assert_eq!(t.get(slot_path(slot)), Some([141_u8].as_slice()));

        let first = t.get(slot_path(keccak(slot.as_bytes()))).unwrap();
        assert_eq!(first, &value[..32]);

        let mut next = slot;
        increment_slot(&mut next);
        increment_slot(&mut next);
        let last = t.get(slot_path(keccak(next.as_bytes()))).unwrap();

        // 65..=70 right-padded to a word; the lead byte is nonzero so only
        // the trailing zeros survive padding.
        assert_eq!(&last[..6], &value[64..]);
        assert_eq!(last.len(), 32);
        assert!(last[6..].iter().all(|b| *b == 0));

        Ok(())
    }

    #[test]
    fn exactly_32_bytes_uses_the_chunked_form() -> TrieOpResult<()> {
        common_setup();

        let value = [0xcd_u8; 32];

        let mut t = Node::default();
        insert_bytes(&mut t, key(0x04), &value)?;

        let slot = keccak(key(0x04).as_bytes());
        assert_eq!(t.get(slot_path(slot)), Some([65_u8].as_slice()));
        assert_eq!(
            t.get(slot_path(keccak(slot.as_bytes()))),
            Some(value.as_slice())
        );
        assert_eq!(t.leaf_count(), 2);

        Ok(())
    }

    #[test]
    fn slot_increment_carries_and_wraps() {
        let mut s = H256::zero();
        s.as_bytes_mut()[31] = 0xff;
        s.as_bytes_mut()[30] = 0x01;

        increment_slot(&mut s);
        assert_eq!(s.as_bytes()[31], 0x00);
        assert_eq!(s.as_bytes()[30], 0x02);

        let mut max = H256::repeat_byte(0xff);
        increment_slot(&mut max);
        assert_eq!(max, H256::zero());
    }
}
