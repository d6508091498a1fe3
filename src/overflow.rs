//! The extents overflow B-tree, holding the extents of forks that do not fit
//! in the three stored with the file. Described in Inside Macintosh: Files >
//! Extents Overflow File.

use crate::btree::{self, BTree};
use crate::error::{Error, Result};
use crate::fork::ExtentLookup;
use deku::DekuContainerRead;
use hfs_types::{CatalogNodeId, ExtentDescriptor, ExtentRecord, fork_type};
use std::ops::ControlFlow;

/// Extents keys have a fixed length.
const KEY_LENGTH: u8 = 7;

/// Size of the key including its length byte.
const KEY_SIZE: usize = KEY_LENGTH as usize + 1;

/// Which of a file's two forks. Data sorts before resource, as on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ForkKind {
    Data,
    Resource,
}

impl ForkKind {
    pub const fn to_raw(self) -> u8 {
        match self {
            Self::Data => fork_type::DATA,
            Self::Resource => fork_type::RESOURCE,
        }
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            fork_type::DATA => Some(Self::Data),
            fork_type::RESOURCE => Some(Self::Resource),
            _ => None,
        }
    }
}

/// Extents key: the fork, its file, and the fork-relative allocation block the
/// record's extents continue from. Ordered field by field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OverflowKey {
    pub fork: ForkKind,
    pub file_id: CatalogNodeId,
    pub start_block: u16,
}

impl OverflowKey {
    pub fn new(fork: ForkKind, file_id: CatalogNodeId, start_block: u16) -> Self {
        Self {
            fork,
            file_id,
            start_block,
        }
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let &[key_length, fork, a, b, c, d, s0, s1, ..] = bytes else {
            return Err(Error::KeyDecode(format!(
                "{}-byte record is shorter than an extents key",
                bytes.len()
            )));
        };
        if key_length != KEY_LENGTH {
            return Err(Error::KeyDecode(format!(
                "extents key length is {key_length}"
            )));
        }
        let fork = ForkKind::from_raw(fork)
            .ok_or_else(|| Error::KeyDecode(format!("unknown fork type {fork:#04x}")))?;

        Ok(Self {
            fork,
            file_id: u32::from_be_bytes([a, b, c, d]),
            start_block: u16::from_be_bytes([s0, s1]),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OverflowIndexRecord {
    pub key: OverflowKey,
    pub child: u32,
}

impl OverflowIndexRecord {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let key = OverflowKey::decode(bytes)?;
        let child = btree::read_u32(bytes, KEY_SIZE).ok_or_else(|| {
            Error::KeyDecode(format!("index record {key:?} has no child pointer"))
        })?;
        Ok(Self { key, child })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OverflowLeafRecord {
    pub key: OverflowKey,
    pub extents: ExtentRecord,
}

impl OverflowLeafRecord {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let key = OverflowKey::decode(bytes)?;

        let mut extents = ExtentRecord::default();
        let mut rest = (bytes.get(KEY_SIZE..).unwrap_or_default(), 0);
        for extent in &mut extents {
            let (next, descriptor) = ExtentDescriptor::from_bytes(rest)?;
            *extent = descriptor;
            rest = next;
        }

        Ok(Self { key, extents })
    }
}

pub struct OverflowTree {
    tree: BTree,
}

impl OverflowTree {
    pub fn new(tree: BTree) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> &BTree {
        &self.tree
    }

    /// The extents continuing a fork from `key.start_block`.
    pub fn find_extents(&self, key: &OverflowKey) -> Result<Option<ExtentRecord>> {
        let leaf = self.tree.descend(|node| {
            btree::greatest_lower_bound(
                node.decoded(OverflowIndexRecord::decode),
                |record| record.key.cmp(key),
                |record| record.child,
                |_| false,
            )
        })?;
        let Some(leaf) = leaf else {
            return Ok(None);
        };

        let mut found = None;
        btree::scan_ascending(
            leaf.decoded(OverflowLeafRecord::decode),
            |record| record.key.cmp(key),
            |record| {
                found = Some(record.extents);
                ControlFlow::Break(())
            },
        );
        Ok(found)
    }
}

impl ExtentLookup for OverflowTree {
    fn find_extents(&self, key: &OverflowKey) -> Result<Option<ExtentRecord>> {
        OverflowTree::find_extents(self, key)
    }
}
