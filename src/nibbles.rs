#![allow(clippy::assign_op_pattern)]

//! Define [`Nibbles`] and how to convert bytes, integers and strings into
//! nibble sequences.

use std::mem::size_of;
use std::{
    fmt::{self, Debug},
    fmt::{Display, LowerHex, UpperHex},
    ops::Range,
    str::FromStr,
};

use bytes::{Bytes, BytesMut};
use ethereum_types::{H256, U256};
use impl_codec::impl_uint_codec;
use impl_num_traits::impl_uint_num_traits;
use impl_rlp::impl_uint_rlp;
use impl_serde::impl_uint_serde;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uint::construct_uint;
use uint::FromHexError;

use crate::utils::{create_mask_of_1s, is_even};

// Use a whole byte for a Nibble just for convenience
/// A Nibble has 4 bits and is stored as `u8`.
pub type Nibble = u8;

construct_uint! {
    /// Used for the internal representation of a sequence of nibbles.
    ///
    /// Storage keys are at most 64 nibbles (256 bits); the fifth limb
    /// absorbs the intermediate overflow produced by the shifts in merges
    /// and splits.
    pub struct NibblesIntern(5);
}

impl_uint_num_traits!(NibblesIntern, 5);
impl_uint_serde!(NibblesIntern, 5);
impl_uint_codec!(NibblesIntern, 5);
impl_uint_rlp!(NibblesIntern, 5);

const SINGLE_NIBBLE_APPEND_ASSERT_ERR_MSG: &str =
    "Attempted to append a single nibble that was greater than 15!";

/// Because there are two different ways to convert to `Nibbles`, we don't want
/// to rely on `From`. Instead, we'll define a new trait that defines both
/// conversions.
pub trait ToNibbles {
    /// Convert the type to a sequence of nibbles.
    ///
    /// Note that this will create `Nibbles` with a `Nibble` count that is
    /// accurate down to the nibble. For example, passing in `0x123` has `3`
    /// `Nibble`s and is not padded to the nearest byte (in which case it
    /// would have `4` `Nibble`s).
    fn to_nibbles(self) -> Nibbles;

    /// Convert the type to a sequence of nibbles but pad to the nearest byte.
    fn to_nibbles_byte_padded(self) -> Nibbles
    where
        Self: Sized,
    {
        let mut nibbles = self.to_nibbles();
        nibbles.count = ((nibbles.count + 1) / 2) * 2;

        nibbles
    }
}

#[derive(Clone, Debug, Eq, Error, PartialEq, Hash)]
/// Errors encountered when converting from bytes to `Nibbles`.
pub enum BytesToNibblesError {
    #[error("Tried constructing `Nibbles` from a zero byte slice")]
    /// The size is zero.
    ZeroSizedKey,

    #[error("Tried constructing `Nibbles` from a byte slice with more than 32 bytes (len: {0})")]
    /// The slice is too large.
    TooManyBytes(usize),
}

#[derive(Debug, Error)]
#[error(transparent)]
/// An error encountered when converting a string to a sequence of nibbles.
pub struct StrToNibblesError(#[from] FromHexError);

trait AsU64s {
    fn as_u64s(&self) -> impl Iterator<Item = u64> + '_;
}

macro_rules! impl_as_u64s_for_primitive {
    ($type:ty) => {
        impl AsU64s for $type {
            fn as_u64s(&self) -> impl Iterator<Item = u64> + '_ {
                std::iter::once(*self as u64)
            }
        }
    };
}

impl_as_u64s_for_primitive!(usize);
impl_as_u64s_for_primitive!(u8);
impl_as_u64s_for_primitive!(u16);
impl_as_u64s_for_primitive!(u32);
impl_as_u64s_for_primitive!(u64);

impl AsU64s for U256 {
    fn as_u64s(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.iter().copied()
    }
}

/// The default conversion to nibbles will be to be precise down to the
/// `Nibble`.
impl<T> From<T> for Nibbles
where
    T: ToNibbles,
{
    fn from(v: T) -> Self {
        v.to_nibbles()
    }
}

macro_rules! impl_to_nibbles {
    ($type:ty) => {
        impl ToNibbles for $type {
            fn to_nibbles(self) -> Nibbles {
                // Ethereum types don't have `BITS` defined.
                #[allow(clippy::manual_bits)]
                let size_bits = size_of::<Self>() * 8;
                let count = (size_bits - self.leading_zeros() as usize + 3) / 4;
                let mut packed = NibblesIntern::zero();

                let parts = self.as_u64s();
                for (i, part) in parts.enumerate().take(packed.0.len()) {
                    packed.0[i] = part;
                }

                Nibbles { count, packed }
            }
        }
    };
}

impl_to_nibbles!(usize);
impl_to_nibbles!(u8);
impl_to_nibbles!(u16);
impl_to_nibbles!(u32);
impl_to_nibbles!(u64);
impl_to_nibbles!(U256);

#[derive(Copy, Clone, Deserialize, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
/// A sequence of nibbles: the key type of the trie and the `path` type of
/// its leaf and extension nodes.
///
/// Storage keys are produced by hashing a 32-byte slot
/// ([`from_h256_be`][Self::from_h256_be] of the keccak), giving exactly `64`
/// nibbles. Node paths are arbitrary suffixes of such keys (`0..=64`
/// nibbles), so leading zero nibbles are significant:
/// ```rust
/// # use limb_trie::nibbles::Nibbles;
/// # use std::str::FromStr;
/// let n1 = Nibbles::from_str("0x123").unwrap();
/// let n2 = Nibbles::from_str("0x0123").unwrap();
///
/// // These are different paths.
/// assert_ne!(n1, n2);
/// ```
pub struct Nibbles {
    /// The number of nibbles in this sequence.
    pub count: usize,
    /// A packed encoding of these nibbles. Only the first (least significant)
    /// `4 * count` bits are used. The rest are unused and should be zero.
    pub packed: NibblesIntern,
}

impl Display for Nibbles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // By default, just use lower hex.
        <Self as LowerHex>::fmt(self, f)
    }
}

// Manual impl in order to print `packed` nicely.
impl Debug for Nibbles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nibbles")
            .field("count", &self.count)
            .field("packed", &format!("{self:x}"))
            .finish()
    }
}

impl FromStr for Nibbles {
    type Err = StrToNibblesError;

    /// Parses a hex string with or without a preceding "0x".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped_str = s.strip_prefix("0x").unwrap_or(s);
        let leading_zeros = stripped_str
            .chars()
            .position(|c| c != '0')
            .unwrap_or(stripped_str.len());
        let packed = NibblesIntern::from_str(s)?;

        Ok(Self {
            count: leading_zeros + Self::get_num_nibbles_in_key(&packed),
            packed,
        })
    }
}

impl LowerHex for Nibbles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex_str(|bytes| hex::encode(bytes)))
    }
}

impl UpperHex for Nibbles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex_str(|bytes| hex::encode_upper(bytes)))
    }
}

impl Nibbles {
    /// Creates `Nibbles` from big endian bytes.
    ///
    /// Returns an error if the byte slice is empty or is longer than `32`
    /// bytes.
    pub fn from_bytes_be(bytes: &[u8]) -> Result<Self, BytesToNibblesError> {
        if bytes.is_empty() {
            return Err(BytesToNibblesError::ZeroSizedKey);
        }

        if bytes.len() > 32 {
            return Err(BytesToNibblesError::TooManyBytes(bytes.len()));
        }

        Ok(Self {
            count: bytes.len() * 2,
            packed: NibblesIntern::from_big_endian(bytes),
        })
    }

    /// Creates a new `Nibbles` from a single `Nibble`.
    ///
    /// # Panics
    /// Panics if the nibble is > `0xf`.
    pub fn from_nibble(n: Nibble) -> Self {
        assert!(n <= 0xf);

        Self {
            count: 1,
            packed: n.into(),
        }
    }

    /// Creates `Nibbles` from a big endian `H256` (a full 64 nibble key).
    pub fn from_h256_be(v: H256) -> Self {
        Self {
            count: 64,
            packed: NibblesIntern::from_big_endian(v.as_bytes()),
        }
    }

    /// Gets the nth proceeding nibble. The front `Nibble` is at idx `0`.
    ///
    /// # Panics
    /// Panics if `idx` is out of range.
    pub fn get_nibble(&self, idx: usize) -> Nibble {
        let nib_idx = self.count - idx - 1;
        let byte = self.packed.byte(nib_idx / 2);

        match is_even(nib_idx) {
            false => (byte & 0b11110000) >> 4,
            true => byte & 0b00001111,
        }
    }

    /// Pops the nibble at the front (the next nibble).
    ///
    /// # Panics
    /// Panics if the `Nibbles` is empty.
    pub fn pop_next_nibble_front(&mut self) -> Nibble {
        let n = self.get_nibble(0);
        self.truncate_n_nibbles_front_mut(1);

        n
    }

    /// Pops the next `n` nibbles from the front.
    ///
    /// # Panics
    /// Panics if `n` is larger than the number of nibbles contained.
    pub fn pop_nibbles_front(&mut self, n: usize) -> Nibbles {
        let r = self.get_nibble_range(0..n);
        self.truncate_n_nibbles_front_mut(n);

        r
    }

    /// Pushes a nibble to the back.
    ///
    /// # Panics
    /// Panics if appending the `Nibble` causes an overflow (total nibbles >
    /// 64).
    pub fn push_nibble_back(&mut self, n: Nibble) {
        self.nibble_append_safety_asserts(n);

        self.count += 1;
        self.packed = (self.packed << 4) | n.into();
    }

    /// Gets the nibbles at the range specified, where `0` is the next nibble.
    ///
    /// # Panics
    /// Panics if `range.end` is outside of the current `Nibbles`.
    pub fn get_nibble_range(&self, range: Range<usize>) -> Nibbles {
        let range_count = range.end - range.start;

        let shift_amt = (self.count - range.end) * 4;
        let mask = create_mask_of_1s(range_count * 4) << shift_amt;
        let range_packed = (self.packed & mask) >> shift_amt;

        Self {
            count: range_count,
            packed: range_packed,
        }
    }

    /// Drops the next `n` proceeding nibbles without mutation.
    ///
    /// If we truncate more nibbles than there are, we will just return the
    /// `empty` nibble.
    pub fn truncate_n_nibbles_front(&self, n: usize) -> Nibbles {
        let mut nib = *self;
        nib.truncate_n_nibbles_front_mut(n);

        nib
    }

    /// Drop the next `n` proceeding nibbles.
    ///
    /// If we truncate more nibbles than there are, we will just return the
    /// `empty` nibble.
    pub fn truncate_n_nibbles_front_mut(&mut self, n: usize) {
        let n = self.get_min_truncate_amount_to_prevent_over_truncating(n);

        let mask_shift = (self.count - n) * 4;
        let truncate_mask = !(create_mask_of_1s(n * 4) << mask_shift);

        self.count -= n;
        self.packed &= truncate_mask;
    }

    const fn get_min_truncate_amount_to_prevent_over_truncating(&self, n: usize) -> usize {
        match self.count >= n {
            false => self.count,
            true => n,
        }
    }

    /// Returns whether or not this `Nibbles` contains actual nibbles. (If
    /// `count` is set to `0`)
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Checks if two given `Nibbles` are identical up to the shorter of the
    /// two `Nibbles`.
    pub fn nibbles_are_identical_up_to_smallest_count(&self, other: &Nibbles) -> bool {
        let smaller_count = self.count.min(other.count);
        (0..smaller_count).all(|i| self.get_nibble(i) == other.get_nibble(i))
    }

    /// Splits the `Nibbles` at the given index, returning two `Nibbles`.
    /// Specifically, if `0x1234` is split at `1`, we get `0x1` and `0x234`.
    ///
    /// # Panics
    /// Panics if the `idx` is out of range.
    pub fn split_at_idx(&self, idx: usize) -> (Nibbles, Nibbles) {
        let post_count = self.count - idx;
        let post_mask = create_mask_of_1s(post_count * 4);

        let post = Nibbles {
            count: post_count,
            packed: self.packed & post_mask,
        };

        let pre_mask = !post_mask;
        let pre_shift_amt = post_count * 4;
        let pre = Nibbles {
            count: idx,
            packed: (self.packed & pre_mask) >> pre_shift_amt,
        };

        (pre, post)
    }

    /// Split the `Nibbles` at the given index but only return the postfix.
    ///
    /// # Panics
    /// Panics if the `idx` is out of range.
    pub fn split_at_idx_postfix(&self, idx: usize) -> Nibbles {
        let postfix_count = self.count - idx;
        let mask = create_mask_of_1s(postfix_count * 4);

        Nibbles {
            count: postfix_count,
            packed: self.packed & mask,
        }
    }

    /// Merge a single Nibble with a `Nibbles`. `self` will be the prefix.
    ///
    /// # Panics
    /// Panics if merging the `Nibble` causes an overflow (total nibbles > 64).
    pub fn merge_nibble(&self, post: Nibble) -> Nibbles {
        self.nibble_append_safety_asserts(post);

        Nibbles {
            count: self.count + 1,
            packed: (self.packed << 4) | post.into(),
        }
    }

    /// Merge two `Nibbles` together. `self` will be the prefix.
    ///
    /// # Panics
    /// Panics if merging the `Nibbles` causes an overflow (total nibbles > 64).
    pub fn merge_nibbles(&self, post: &Nibbles) -> Nibbles {
        let new_count = self.count + post.count;
        assert!(new_count <= 64);

        Nibbles {
            count: new_count,
            packed: (self.packed << (post.count * 4)) | post.packed,
        }
    }

    /// Finds the nibble idx that differs between two nibbles of different
    /// lengths. If there is no difference, returns 1 + the last index of the
    /// shorter one.
    pub fn find_nibble_idx_that_differs_between_nibbles_different_lengths(
        n1: &Nibbles,
        n2: &Nibbles,
    ) -> usize {
        let min_count = n1.count.min(n2.count);

        Self::find_nibble_idx_that_differs_between_nibbles_equal_lengths(
            &n1.get_nibble_range(0..min_count),
            &n2.get_nibble_range(0..min_count),
        )
    }

    /// Finds the nibble idx that differs between two `Nibbles` of equal
    /// length. If there is no difference, returns 1 + the last index.
    ///
    /// # Panics
    /// Panics if both `Nibbles` are not the same length.
    pub fn find_nibble_idx_that_differs_between_nibbles_equal_lengths(
        n1: &Nibbles,
        n2: &Nibbles,
    ) -> usize {
        assert_eq!(
            n1.count, n2.count,
            "Tried finding the differing nibble between two nibbles with different sizes! ({n1}, {n2})"
        );

        if n1.count == 0 {
            return n1.count;
        }

        let mut curr_mask: NibblesIntern = (NibblesIntern::from(0xf)) << ((n1.count - 1) * 4);
        for i in 0..n1.count {
            if n1.packed & curr_mask != n2.packed & curr_mask {
                return i;
            }

            curr_mask >>= 4;
        }

        n1.count
    }

    /// Returns a hex representation of the string.
    fn as_hex_str<F>(&self, hex_encode_f: F) -> String
    where
        F: Fn(&[u8]) -> String,
    {
        let mut byte_buf = [0; 40];
        self.packed.to_big_endian(&mut byte_buf);

        let count_bytes = self.min_bytes();
        let hex_string_raw = hex_encode_f(&byte_buf[(40 - count_bytes)..40]);
        let hex_char_iter_raw = hex_string_raw.chars();

        let mut hex_string = String::from("0x");
        match is_even(self.count) {
            false => hex_string.extend(hex_char_iter_raw.skip(1)),
            true => hex_string.extend(hex_char_iter_raw.skip(0)),
        };

        hex_string
    }

    /// Converts [`Nibbles`] to hex-prefix encoding (AKA "compact").
    /// This appends an extra flag nibble which encodes whether the sequence
    /// is of odd length and whether it terminates at a leaf.
    pub fn to_hex_prefix_encoding(&self, is_leaf: bool) -> Bytes {
        let num_nibbles = self.count + 1;
        let num_bytes = (num_nibbles + 1) / 2;
        let flag_byte_idx = 41 - num_bytes;

        // Needed because `to_big_endian` always writes `40` bytes.
        let mut bytes = BytesMut::zeroed(41);

        let is_even = is_even(self.count);
        let odd_bit = match is_even {
            false => 1,
            true => 0,
        };

        let term_bit = match is_leaf {
            false => 0,
            true => 1,
        };

        let flags: u8 = (odd_bit | (term_bit << 1)) << 4;
        self.packed.to_big_endian(&mut bytes[1..41]);

        bytes[flag_byte_idx] |= flags;
        Bytes::copy_from_slice(&bytes[flag_byte_idx..41])
    }

    /// Packs the nibbles two-per-byte, the last byte zero-padded on the
    /// right if the count is odd. This is the path layout of the compact
    /// storage codec, not the canonical hex-prefix encoding.
    pub fn to_packed_bytes(&self) -> Vec<u8> {
        let mut packed = Vec::with_capacity(self.min_bytes());

        for i in (0..self.count).step_by(2) {
            let hi = self.get_nibble(i) << 4;
            let lo = match i + 1 < self.count {
                true => self.get_nibble(i + 1),
                false => 0,
            };
            packed.push(hi | lo);
        }

        packed
    }

    /// Inverse of [`to_packed_bytes`][Self::to_packed_bytes], given the
    /// nibble count and the packed bytes.
    ///
    /// # Panics
    /// Panics if `count > 64` or the packed slice is too short.
    pub fn from_packed_bytes(count: usize, packed: &[u8]) -> Self {
        assert!(count <= 64);

        let mut nibbles = Nibbles::default();
        for i in 0..count {
            let byte = packed[i / 2];
            let nib = match is_even(i) {
                true => byte >> 4,
                false => byte & 0b00001111,
            };
            nibbles.push_nibble_back(nib);
        }

        nibbles
    }

    /// Returns the minimum number of bytes needed to represent these
    /// `Nibbles`.
    pub const fn min_bytes(&self) -> usize {
        (self.count + 1) / 2
    }

    /// Returns the minimum number of nibbles needed to represent a packed
    /// key.
    pub fn get_num_nibbles_in_key(k: &NibblesIntern) -> usize {
        (k.bits() + 3) / 4
    }

    /// Returns the nibbles bytes in big-endian format.
    pub fn bytes_be(&self) -> Vec<u8> {
        let mut byte_buf = [0; 40];
        self.packed.to_big_endian(&mut byte_buf);

        byte_buf[40 - self.min_bytes()..40].to_vec()
    }

    fn nibble_append_safety_asserts(&self, n: Nibble) {
        assert!(self.count < 64);
        assert!(n < 16, "{}", SINGLE_NIBBLE_APPEND_ASSERT_ERR_MSG);
    }
}
