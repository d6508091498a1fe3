//! Read-only access to classic HFS (Mac OS Standard) volumes in disk images.
//!
//! A [`Disk`] finds volumes in an image, a [`Volume`] reads the catalog and
//! extents overflow B-trees, and [`File`] handles reassemble data and resource
//! forks.
//!
//! ```no_run
//! use classic_hfs::{Disk, ImageReader};
//!
//! let image = std::fs::File::open("system.img")?;
//! let disk = Disk::open(ImageReader::new(image))?;
//! for volume in disk.volumes() {
//!     if let Some(file) = volume.file("System Folder:Finder")? {
//!         println!("{} bytes of resources", file.resource_fork()?.len());
//!     }
//! }
//! # Ok::<(), classic_hfs::Error>(())
//! ```

#![forbid(unsafe_code)]

pub mod btree;
pub mod catalog;
pub mod error;
pub mod fork;
pub mod overflow;
pub mod partition;
pub mod store;
pub mod text;
pub mod volume;

#[cfg(test)]
mod testing;

pub use catalog::{
    CatalogKey, CatalogLeafRecord, CatalogTree, DirectoryRecord, FileRecord, ForkDescriptor,
    ThreadRecord,
};
pub use error::{Error, Result};
pub use fork::{ExtentLookup, ForkReader, Geometry};
pub use hfs_types as types;
pub use hfs_types::{CatalogNodeId, ExtentDescriptor, ExtentRecord, cnid};
pub use overflow::{ForkKind, OverflowKey, OverflowTree};
pub use partition::{Disk, Partition};
pub use store::{BlockStore, ImageReader, Window};
pub use volume::{Directory, DirectoryEntry, File, Volume};
