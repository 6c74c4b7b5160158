//! A dense, reversible byte encoding of node trees, used for storage and
//! transport.
//!
//! This is not the canonical RLP encoding and shares nothing with the
//! hashing contract: a tag byte selects the node shape, sizes are 1-3 byte
//! little-endian varints and paths are packed two nibbles per byte. What it
//! adds over the canonical encoding is the ability to round-trip a branch's
//! precomputed `cache`, so a re-loaded tree can derive its root hash without
//! re-encoding every subtree.

use std::sync::Arc;

use bytes::Bytes;
use log::trace;
use thiserror::Error;

use crate::{
    nibbles::Nibbles,
    node::{empty_branch_children, Node, WrappedNode},
    trie_hashing::encode_node,
};

const TY_NULL: u8 = 0;
const TY_BRANCH: u8 = 1;
const TY_EXTENSION: u8 = 2;
const TY_EMPTY_LEAF: u8 = 3;
const TY_LEAF: u8 = 4;
const TY_BRANCH_WITH_CACHE: u8 = 5;

/// The largest value the codec's varint can carry, and therefore the largest
/// single field (value or cache) it can serialize.
pub const MAX_FIELD_SIZE: usize = (1 << 22) - 1;

/// Errors encountered while encoding or decoding the storage format.
///
/// Every variant indicates corrupted input or a broken caller contract;
/// none of these are retryable.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum CodecError {
    /// Hit a node type tag that does not exist.
    #[error("Unknown node type tag: {0}")]
    UnknownTag(u8),

    /// A field was too large for the varint size encoding.
    #[error("Field size {0} exceeds the maximum encodable size of {MAX_FIELD_SIZE}")]
    SizeOverflow(usize),

    /// The input ended in the middle of a node.
    #[error("Unexpected end of input (needed {needed} more byte(s) at offset {offset})")]
    UnexpectedEof {
        /// The read position at the time of the failure.
        offset: usize,
        /// How many bytes the read wanted.
        needed: usize,
    },

    /// Decoded an extension whose child is not a branch, which no valid
    /// encoder output contains.
    #[error("Decoded an extension node whose child is not a branch")]
    ExtensionChildNotBranch,

    /// A path claimed more nibbles than a full-width key holds.
    #[error("Decoded a path of {0} nibble(s), but keys hold at most 64")]
    InvalidPathLength(usize),
}

/// Alias for codec operation results.
pub type CodecResult<T> = Result<T, CodecError>;

/// Controls whether branch caches are embedded in the output.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CacheMode {
    /// Embed a cache exactly for the branches that carry one in memory.
    #[default]
    Follow,

    /// Embed a cache for every branch, computing any that are missing. A
    /// tree re-loaded from such output derives its root hash without
    /// visiting a single subtree.
    Force,

    /// Never embed caches, minimizing payload size.
    Omit,
}

/// Serializes node trees into the storage format.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Creates an encoder with an empty output buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the encoding of `node` (and its whole subtree) to the output.
    pub fn write_node(&mut self, node: &Node, mode: CacheMode) -> CodecResult<()> {
        match node {
            Node::Empty => self.buf.push(TY_NULL),
            Node::Branch { children, cache } => {
                let cache = match mode {
                    CacheMode::Follow => cache.clone(),
                    CacheMode::Force => Some(encode_node(node)),
                    CacheMode::Omit => None,
                };

                self.buf.push(match cache {
                    Some(_) => TY_BRANCH_WITH_CACHE,
                    None => TY_BRANCH,
                });

                for c in children.iter() {
                    self.write_node(c, mode)?;
                }

                if let Some(cache) = cache {
                    self.write_sized_bytes(&cache)?;
                }
            }
            Node::Extension { nibbles, child } => {
                self.buf.push(TY_EXTENSION);
                self.write_path(nibbles);
                self.write_node(child, mode)?;
            }
            Node::Leaf { .. } if node.is_empty_leaf() => self.buf.push(TY_EMPTY_LEAF),
            Node::Leaf { nibbles, value } => {
                self.buf.push(TY_LEAF);
                self.write_path(nibbles);
                self.write_sized_bytes(value)?;
            }
        }

        Ok(())
    }

    /// Consumes the encoder and returns the bytes written so far.
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }

    /// The bytes written so far.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    fn write_size(&mut self, size: usize) -> CodecResult<()> {
        if size > MAX_FIELD_SIZE {
            return Err(CodecError::SizeOverflow(size));
        }

        if size < 0x80 {
            self.buf.push(size as u8);
            return Ok(());
        }

        self.buf.push(size as u8 | 0x80);
        let size = size >> 7;

        if size < 0x80 {
            self.buf.push(size as u8);
            return Ok(());
        }

        self.buf.push(size as u8 | 0x80);

        // At most 8 bits remain below the size ceiling.
        self.buf.push((size >> 7) as u8);
        Ok(())
    }

    fn write_sized_bytes(&mut self, v: &[u8]) -> CodecResult<()> {
        self.write_size(v.len())?;
        self.buf.extend_from_slice(v);
        Ok(())
    }

    fn write_path(&mut self, path: &Nibbles) {
        // Paths never exceed 64 nibbles, so the count always fits one byte.
        self.buf.push(path.count as u8);
        self.buf.extend_from_slice(&path.to_packed_bytes());
    }
}

/// Deserializes node trees from the storage format.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over the given input.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// The current read offset into the input.
    pub const fn pos(&self) -> usize {
        self.pos
    }

    /// Reads one node (and its whole subtree) from the input.
    pub fn read_node(&mut self) -> CodecResult<Node> {
        let ty = self.read_byte()?;

        match ty {
            TY_NULL => Ok(Node::Empty),
            TY_BRANCH => Ok(Node::Branch {
                children: self.read_children()?,
                cache: None,
            }),
            TY_BRANCH_WITH_CACHE => {
                let children = self.read_children()?;
                let cache = Bytes::copy_from_slice(self.read_sized_bytes()?);

                Ok(Node::Branch {
                    children,
                    cache: Some(cache),
                })
            }
            TY_EXTENSION => {
                let nibbles = self.read_path()?;
                let child = self.read_node()?;

                if !matches!(child, Node::Branch { .. }) {
                    return Err(CodecError::ExtensionChildNotBranch);
                }

                Ok(Node::Extension {
                    nibbles,
                    child: Arc::new(child),
                })
            }
            TY_EMPTY_LEAF => Ok(Node::Leaf {
                nibbles: Nibbles::default(),
                value: Vec::new(),
            }),
            TY_LEAF => {
                let nibbles = self.read_path()?;
                let value = self.read_sized_bytes()?.to_vec();

                Ok(Node::Leaf { nibbles, value })
            }
            _ => Err(CodecError::UnknownTag(ty)),
        }
    }

    fn read_children(&mut self) -> CodecResult<[WrappedNode; 16]> {
        let mut children = empty_branch_children();
        for c in children.iter_mut() {
            *c = Arc::new(self.read_node()?);
        }

        Ok(children)
    }

    fn read_byte(&mut self) -> CodecResult<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(CodecError::UnexpectedEof {
                offset: self.pos,
                needed: 1,
            })?;

        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(CodecError::UnexpectedEof {
                offset: self.pos,
                needed: self.pos + n - self.buf.len(),
            });
        }

        let v = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(v)
    }

    fn read_size(&mut self) -> CodecResult<usize> {
        let b0 = self.read_byte()? as usize;
        if b0 & 0x80 == 0 {
            return Ok(b0);
        }

        let b1 = self.read_byte()? as usize;
        let mut size = (b0 & 0x7f) | ((b1 & 0x7f) << 7);

        if b1 & 0x80 != 0 {
            size |= (self.read_byte()? as usize) << 14;
        }

        Ok(size)
    }

    fn read_sized_bytes(&mut self) -> CodecResult<&'a [u8]> {
        let n = self.read_size()?;
        self.read_bytes(n)
    }

    fn read_path(&mut self) -> CodecResult<Nibbles> {
        let count = self.read_byte()? as usize;
        if count > 64 {
            return Err(CodecError::InvalidPathLength(count));
        }
        let packed = self.read_bytes((count + 1) / 2)?;

        Ok(Nibbles::from_packed_bytes(count, packed))
    }
}

/// Serializes a whole tree with the given cache policy.
pub fn encode_trie(node: &Node, mode: CacheMode) -> CodecResult<Bytes> {
    let mut enc = Encoder::new();
    enc.write_node(node, mode)?;

    trace!("Serialized a trie into {} byte(s)", enc.bytes().len());

    Ok(enc.into_bytes())
}

/// Deserializes a tree previously produced by [`encode_trie`].
pub fn decode_trie(bytes: &[u8]) -> CodecResult<Node> {
    Decoder::new(bytes).read_node()
}
