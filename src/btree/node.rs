//! # Node and Value Codec
//!
//! A NODE slot holds one B+tree node: a 6-byte slot header, `kfactor` keys
//! and `bfactor` tagged values, packed at fixed offsets within the slot.
//!
//! ## Node Slot Layout
//!
//! ```text
//! Offset                     Content
//! ------                     -------
//! 0                          SlotHeader (tag=NODE, cont, parent)
//! 6                          key[0] .. key[kfactor-1]      (4 bytes each)
//! 6 + 4*kfactor              value[0] .. value[bfactor-1]  (5 bytes each)
//! ```
//!
//! Keys are stored in strictly ascending order. A node with `cont` keys has
//! `cont + 1` live values interleaved around them:
//!
//! ```text
//! value[0] | key[0] | value[1] | key[1] | ... | key[cont-1] | value[cont]
//! ```
//!
//! `value[0]` covers keys below `key[0]`; `value[i]` covers keys in
//! `[key[i-1], key[i])`; `value[cont]` covers keys at or above the last key.
//! The value bound to an exact key `key[i]` is therefore `value[i+1]`.
//!
//! ## Tagged Values
//!
//! A value is 5 packed bytes: a tag byte and a little-endian 4-byte payload.
//! Only the payload meaning changes with the tag:
//!
//! ```text
//! Tag   Name      Payload
//! ----  -------   --------------------------------------------
//! 0x00  NULL      none (payload zero)
//! 0x01  NODE      slot index of a child node in the same block
//! 0x02  BLOCK     ordinal position of another block
//! 0x04  CONTENT   byte offset into the payload store
//! ```
//!
//! In memory the tag dispatch is a Rust enum; a value can never be read
//! under the wrong tag. A NODE value is only meaningful inside the block
//! that owns it; block splits rewrite them as nodes relocate.
//!
//! The byte layout is produced by explicit offset arithmetic rather than
//! struct transmutation: the key and value arrays have no natural Rust
//! struct shape, and the 5-byte value stride would defeat alignment anyway.

use eyre::{Result, bail, ensure};

use crate::layout::{KEY_SIZE, Layout, SLOT_HEADER_SIZE, VALUE_SIZE};
use crate::storage::{BlockMut, BlockRef, SLOT_TAG_NODE};

pub const VALUE_TAG_NULL: u8 = 0x00;
pub const VALUE_TAG_NODE: u8 = 0x01;
pub const VALUE_TAG_BLOCK: u8 = 0x02;
pub const VALUE_TAG_CONTENT: u8 = 0x04;

/// A tagged value: absent, intra-block child, inter-block child, or payload
/// offset. Exactly one meaning is active per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Null,
    /// Slot index of a child node within the same block.
    Node(u32),
    /// Ordinal position of another block in the index file.
    Block(u32),
    /// Byte offset of a record in the payload store.
    Content(u32),
}

impl Value {
    pub fn read_from(buf: &[u8]) -> Result<Self> {
        ensure!(
            buf.len() >= VALUE_SIZE,
            "buffer too small for value: {} < {}",
            buf.len(),
            VALUE_SIZE
        );
        let payload = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
        match buf[0] {
            VALUE_TAG_NULL => Ok(Value::Null),
            VALUE_TAG_NODE => Ok(Value::Node(payload)),
            VALUE_TAG_BLOCK => Ok(Value::Block(payload)),
            VALUE_TAG_CONTENT => Ok(Value::Content(payload)),
            tag => bail!("unknown value tag {:#04x}", tag),
        }
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        let (tag, payload) = match *self {
            Value::Null => (VALUE_TAG_NULL, 0),
            Value::Node(slot) => (VALUE_TAG_NODE, slot),
            Value::Block(position) => (VALUE_TAG_BLOCK, position),
            Value::Content(offset) => (VALUE_TAG_CONTENT, offset),
        };
        buf[0] = tag;
        buf[1..VALUE_SIZE].copy_from_slice(&payload.to_le_bytes());
    }
}

fn key_offset(index: usize) -> usize {
    SLOT_HEADER_SIZE + index * KEY_SIZE
}

fn value_offset(layout: &Layout, index: usize) -> usize {
    SLOT_HEADER_SIZE + layout.kfactor * KEY_SIZE + index * VALUE_SIZE
}

/// Read-only view of one node slot.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    data: &'a [u8],
    layout: &'a Layout,
}

impl<'a> NodeRef<'a> {
    pub fn cont(&self) -> usize {
        self.data[1] as usize
    }

    pub fn parent(&self) -> u32 {
        u32::from_le_bytes([self.data[2], self.data[3], self.data[4], self.data[5]])
    }

    pub fn key_at(&self, index: usize) -> Result<u32> {
        ensure!(
            index < self.layout.kfactor,
            "key index {} out of bounds (kfactor={})",
            index,
            self.layout.kfactor
        );
        let off = key_offset(index);
        Ok(u32::from_le_bytes([
            self.data[off],
            self.data[off + 1],
            self.data[off + 2],
            self.data[off + 3],
        ]))
    }

    pub fn value_at(&self, index: usize) -> Result<Value> {
        ensure!(
            index < self.layout.bfactor,
            "value index {} out of bounds (bfactor={})",
            index,
            self.layout.bfactor
        );
        Value::read_from(&self.data[value_offset(self.layout, index)..])
    }
}

/// Mutable view of one node slot.
#[derive(Debug)]
pub struct NodeMut<'a> {
    data: &'a mut [u8],
    layout: &'a Layout,
}

impl<'a> NodeMut<'a> {
    pub fn as_ref(&self) -> NodeRef<'_> {
        NodeRef {
            data: self.data,
            layout: self.layout,
        }
    }

    pub fn cont(&self) -> usize {
        self.data[1] as usize
    }

    pub fn set_cont(&mut self, cont: u8) {
        self.data[1] = cont;
    }

    pub fn set_parent(&mut self, parent: u32) {
        self.data[2..6].copy_from_slice(&parent.to_le_bytes());
    }

    pub fn set_key(&mut self, index: usize, key: u32) -> Result<()> {
        ensure!(
            index < self.layout.kfactor,
            "key index {} out of bounds (kfactor={})",
            index,
            self.layout.kfactor
        );
        let off = key_offset(index);
        self.data[off..off + KEY_SIZE].copy_from_slice(&key.to_le_bytes());
        Ok(())
    }

    pub fn set_value(&mut self, index: usize, value: Value) -> Result<()> {
        ensure!(
            index < self.layout.bfactor,
            "value index {} out of bounds (bfactor={})",
            index,
            self.layout.bfactor
        );
        let off = value_offset(self.layout, index);
        value.write_to(&mut self.data[off..off + VALUE_SIZE]);
        Ok(())
    }

    /// Inserts a key and its right-hand value at the sorted position,
    /// shifting the tail of both arrays one place right. The caller checks
    /// for an exact match beforehand; duplicates are an invariant breach.
    pub fn insert_pair(&mut self, key: u32, value: Value) -> Result<()> {
        let cont = self.cont();
        ensure!(
            cont < self.layout.kfactor,
            "node is full ({} keys), split was missed",
            cont
        );

        let mut position = cont;
        for i in 0..cont {
            let existing = self.as_ref().key_at(i)?;
            ensure!(existing != key, "duplicate key {} in node insert", key);
            if existing > key {
                position = i;
                break;
            }
        }

        if position < cont {
            let keys_from = key_offset(position);
            let keys_to = key_offset(cont);
            self.data.copy_within(keys_from..keys_to, keys_from + KEY_SIZE);

            let vals_from = value_offset(self.layout, position + 1);
            let vals_to = value_offset(self.layout, cont + 1);
            self.data
                .copy_within(vals_from..vals_to, vals_from + VALUE_SIZE);
        }

        self.set_key(position, key)?;
        self.set_value(position + 1, value)?;
        self.set_cont((cont + 1) as u8);
        Ok(())
    }

    /// Overwrites the value bound to an existing key in place.
    pub fn replace_value_for(&mut self, key: u32, value: Value) -> Result<()> {
        let cont = self.cont();
        for i in 0..cont {
            if self.as_ref().key_at(i)? == key {
                return self.set_value(i + 1, value);
            }
        }
        bail!("key {} not present in node", key);
    }
}

impl<'a> BlockRef<'a> {
    /// Typed view of a NODE slot.
    pub fn node(&self, slot: u32) -> Result<NodeRef<'a>> {
        ensure!(
            self.slot_tag(slot)? == SLOT_TAG_NODE,
            "slot {} is not a node",
            slot
        );
        Ok(NodeRef {
            data: self.slot_bytes(slot)?,
            layout: self.layout(),
        })
    }
}

impl<'a> BlockMut<'a> {
    pub fn node(&self, slot: u32) -> Result<NodeRef<'_>> {
        self.as_ref().node(slot)
    }

    pub fn node_mut(&mut self, slot: u32) -> Result<NodeMut<'_>> {
        ensure!(
            self.slot_header(slot)?.tag() == SLOT_TAG_NODE,
            "slot {} is not a node",
            slot
        );
        let layout = self.layout();
        Ok(NodeMut {
            data: self.slot_bytes_mut(slot)?,
            layout,
        })
    }

    /// Claims a slot for a fresh node: tag NODE, no keys, every value NULL.
    /// Evicts any cached tuples the slot held and bumps the block's
    /// populated-slot counter.
    pub fn init_node(&mut self, slot: u32) -> Result<()> {
        ensure!(
            self.slot_header(slot)?.tag() != SLOT_TAG_NODE,
            "slot {} already holds a node",
            slot
        );
        let layout = *self.layout();
        {
            let bytes = self.slot_bytes_mut(slot)?;
            bytes[0] = SLOT_TAG_NODE;
            bytes[1] = 0;
            bytes[2..6].copy_from_slice(&0u32.to_le_bytes());
            for i in 0..layout.kfactor {
                let off = key_offset(i);
                bytes[off..off + KEY_SIZE].copy_from_slice(&0u32.to_le_bytes());
            }
            for i in 0..layout.bfactor {
                let off = value_offset(&layout, i);
                Value::Null.write_to(&mut bytes[off..off + VALUE_SIZE]);
            }
        }
        let cont = self.header().cont();
        self.header_mut().set_cont(cont + 1);
        Ok(())
    }

    /// Finds a free slot in the embedded-tree region and initializes it as a
    /// node. The layout planner guarantees one exists whenever a split is
    /// legal; running dry is a broken invariant, not a recoverable state.
    pub fn alloc_node_slot(&mut self) -> Result<u32> {
        for slot in 0..self.layout().block_nodes as u32 {
            if self.slot_header(slot)?.tag() != SLOT_TAG_NODE {
                self.init_node(slot)?;
                return Ok(slot);
            }
        }
        bail!(
            "no free node slot in block ({} usable slots, invariant violation)",
            self.layout().block_nodes
        );
    }
}
