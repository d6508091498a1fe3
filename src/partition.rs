//! Finding HFS volumes on a disk image, either in Apple partition map entries
//! or filling the whole image.

use crate::error::{Error, Result};
use crate::store::{BlockStore, Window};
use crate::text;
use crate::volume::Volume;
use deku::DekuContainerRead;
use hfs_types::{
    DRIVER_DESCRIPTOR_SIGNATURE, DriverDescriptor, HFS_PARTITION_TYPE, LOGICAL_BLOCK_SIZE,
    PARTITION_MAP_SIGNATURE, PartitionMapEntry,
};
use std::sync::Arc;

/// The partition map is only looked for in the first 32 KiB.
const PARTITION_MAP_LIMIT: u64 = 32 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub partition_type: String,
    /// First 512-byte block of the partition.
    pub start_block: u32,
    pub block_count: u32,
}

impl Partition {
    /// Byte offset of the partition from the start of the disk.
    pub fn offset(&self) -> u64 {
        self.start_block as u64 * LOGICAL_BLOCK_SIZE as u64
    }

    pub fn is_hfs(&self) -> bool {
        self.partition_type == HFS_PARTITION_TYPE
    }
}

/// Driver descriptor record from block 0, if the disk has one.
pub fn driver_descriptor<S: BlockStore + ?Sized>(store: &S) -> Result<Option<DriverDescriptor>> {
    let block = store.read(0..LOGICAL_BLOCK_SIZE as u64)?;
    if block.len() < LOGICAL_BLOCK_SIZE {
        return Ok(None);
    }

    let (_rest, descriptor) = DriverDescriptor::from_bytes((block.as_slice(), 0))?;
    Ok((descriptor.signature == DRIVER_DESCRIPTOR_SIGNATURE).then_some(descriptor))
}

/// Entries of the Apple partition map, which fills consecutive blocks from
/// block 1 until one lacks the map signature.
pub fn partition_map<S: BlockStore + ?Sized>(store: &S) -> Result<Vec<Partition>> {
    let blocks = store.read(0..PARTITION_MAP_LIMIT)?;
    let mut partitions = Vec::new();

    for block in blocks.chunks_exact(LOGICAL_BLOCK_SIZE).skip(1) {
        let (_rest, entry) = PartitionMapEntry::from_bytes((block, 0))?;
        if entry.signature != PARTITION_MAP_SIGNATURE {
            break;
        }

        let partition = Partition {
            name: text::c_string(&entry.name),
            partition_type: text::c_string(&entry.partition_type),
            start_block: entry.start_block,
            block_count: entry.block_count,
        };
        log::debug!(
            "Partition {:?} of type {:?} at block {} for {} blocks",
            partition.name,
            partition.partition_type,
            partition.start_block,
            partition.block_count
        );
        partitions.push(partition);

        if entry.map_entries != 0 && partitions.len() >= entry.map_entries as usize {
            break;
        }
    }

    Ok(partitions)
}

/// A disk image and the HFS volumes found on it.
pub struct Disk<S> {
    partitions: Vec<Partition>,
    volumes: Vec<Volume<Window<Arc<S>>>>,
}

impl<S: BlockStore> Disk<S> {
    /// Open every HFS partition, or the whole image when there are none.
    pub fn open(store: S) -> Result<Self> {
        let store = Arc::new(store);

        if let Some(descriptor) = driver_descriptor(&*store)? {
            log::debug!(
                "Driver descriptor: {} blocks of {} bytes, {} drivers",
                descriptor.block_count,
                descriptor.block_size,
                descriptor.driver_count
            );
        }

        let partitions = partition_map(&*store)?;
        let mut volumes = Vec::new();
        for partition in partitions.iter().filter(|partition| partition.is_hfs()) {
            match Volume::open(Window::new(Arc::clone(&store), partition.offset())) {
                Ok(volume) => {
                    log::info!("Found volume {:?} in partition {:?}", volume.name(), partition.name);
                    volumes.push(volume);
                }
                Err(err) => log::warn!("Skipping partition {:?}: {err}", partition.name),
            }
        }

        if volumes.is_empty() {
            log::debug!("No HFS partitions, reading the image as one volume");
            let volume = Volume::open(Window::new(store, 0)).map_err(|err| match err {
                Error::InvalidVolume(reason) if !partitions.is_empty() => Error::InvalidVolume(
                    format!("none of {} partitions hold a volume, and {reason}", partitions.len()),
                ),
                other => other,
            })?;
            volumes.push(volume);
        }

        Ok(Self {
            partitions,
            volumes,
        })
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn volumes(&self) -> &[Volume<Window<Arc<S>>>] {
        &self.volumes
    }

    pub fn into_volumes(self) -> Vec<Volume<Window<Arc<S>>>> {
        self.volumes
    }
}
