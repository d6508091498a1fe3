//! Reassembling a fork's bytes from its extents.

use crate::error::{Error, Result};
use crate::overflow::{ForkKind, OverflowKey};
use crate::store::BlockStore;
use hfs_types::{
    CatalogNodeId, ExtentDescriptor, ExtentRecord, LOGICAL_BLOCK_SIZE, MasterDirectoryBlock, cnid,
};
use std::ops::Range;

/// Source of extents beyond the three stored inline with a fork.
pub trait ExtentLookup {
    /// The extent record continuing a fork from `key.start_block`, if any.
    fn find_extents(&self, key: &OverflowKey) -> Result<Option<ExtentRecord>>;
}

impl<T: ExtentLookup + ?Sized> ExtentLookup for &T {
    fn find_extents(&self, key: &OverflowKey) -> Result<Option<ExtentRecord>> {
        (**self).find_extents(key)
    }
}

/// Where allocation blocks live on the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub allocation_block_size: u32,
    /// Logical block at which allocation block 0 begins.
    pub allocation_block_start: u16,
    pub allocation_block_count: u16,
}

impl Geometry {
    pub fn from_mdb(mdb: &MasterDirectoryBlock) -> Result<Self> {
        let size = mdb.allocation_block_size;
        if size == 0 || size % LOGICAL_BLOCK_SIZE as u32 != 0 {
            return Err(Error::InvalidVolume(format!(
                "allocation block size {size} is not a multiple of {LOGICAL_BLOCK_SIZE}"
            )));
        }

        Ok(Self {
            allocation_block_size: size,
            allocation_block_start: mdb.allocation_block_start,
            allocation_block_count: mdb.allocation_block_count,
        })
    }

    /// Byte range of an extent from the start of the volume.
    pub fn extent_range(&self, extent: &ExtentDescriptor) -> Range<u64> {
        let block_size = self.allocation_block_size as u64;
        let start = self.allocation_block_start as u64 * LOGICAL_BLOCK_SIZE as u64
            + extent.start_block as u64 * block_size;
        start..start + extent.block_count as u64 * block_size
    }

    /// Whether an extent lies within the volume's allocation blocks.
    pub fn contains(&self, extent: &ExtentDescriptor) -> bool {
        extent.block_count == 0
            || extent.start_block as u32 + extent.block_count as u32
                <= self.allocation_block_count as u32
    }

    /// Allocation blocks needed to hold `length` bytes.
    pub fn blocks_for(&self, length: u32) -> u32 {
        length.div_ceil(self.allocation_block_size)
    }
}

fn block_total(extents: &[ExtentDescriptor]) -> u32 {
    extents.iter().map(|extent| extent.block_count as u32).sum()
}

/// Reads forks through a store, consulting `overflow` for extents past the
/// inline ones.
pub struct ForkReader<'a, S: ?Sized, L: ?Sized> {
    store: &'a S,
    geometry: Geometry,
    overflow: &'a L,
}

impl<'a, S, L> ForkReader<'a, S, L>
where
    S: BlockStore + ?Sized,
    L: ExtentLookup + ?Sized,
{
    pub fn new(store: &'a S, geometry: Geometry, overflow: &'a L) -> Self {
        Self {
            store,
            geometry,
            overflow,
        }
    }

    /// Every extent of a fork, enough to cover `logical_length` bytes.
    ///
    /// The extents file is never looked up in itself: its inline extents must
    /// describe it completely.
    pub fn extents(
        &self,
        file_id: CatalogNodeId,
        fork: ForkKind,
        inline: &ExtentRecord,
        logical_length: u32,
    ) -> Result<Vec<ExtentDescriptor>> {
        let needed = self.geometry.blocks_for(logical_length);
        let mut extents = inline.to_vec();
        let mut found = block_total(inline);

        while found < needed && file_id != cnid::EXTENTS_FILE {
            let incomplete = move || Error::IncompleteExtents {
                file_id,
                fork,
                found,
                needed,
            };

            let start_block = u16::try_from(found).map_err(|_| incomplete())?;
            let key = OverflowKey::new(fork, file_id, start_block);
            log::trace!("Looking up {key:?}, need {needed} blocks");

            let Some(more) = self.overflow.find_extents(&key)? else {
                return Err(incomplete());
            };
            let added = block_total(&more);
            if added == 0 {
                return Err(incomplete());
            }

            extents.extend(more);
            found += added;
        }

        Ok(extents)
    }

    /// The first `logical_length` bytes of a fork. Either all of them are
    /// returned or an error is.
    pub fn read(
        &self,
        file_id: CatalogNodeId,
        fork: ForkKind,
        inline: &ExtentRecord,
        logical_length: u32,
    ) -> Result<Vec<u8>> {
        let length = logical_length as usize;
        let extents = self.extents(file_id, fork, inline, logical_length)?;
        if let Some(extent) = extents.iter().find(|extent| !self.geometry.contains(extent)) {
            return Err(Error::InvalidVolume(format!(
                "extent {extent:?} of file {file_id} lies past allocation block {}",
                self.geometry.allocation_block_count
            )));
        }

        let mut data = Vec::new();
        for extent in extents {
            if data.len() >= length {
                break;
            }
            if extent.block_count == 0 {
                continue;
            }

            let range = self.geometry.extent_range(&extent);
            let expected = range.end - range.start;
            let bytes = self.store.read(range)?;
            let short = (bytes.len() as u64) < expected;
            data.extend_from_slice(&bytes);
            if short {
                log::debug!("Image ends inside extent {extent:?} of file {file_id}");
                break;
            }
        }

        if data.len() < length {
            return Err(Error::TruncatedRead {
                read: data.len() as u64,
                expected: length as u64,
            });
        }

        data.truncate(length);
        Ok(data)
    }
}
