//! An opened HFS volume and handles to its directories and files.

use crate::btree::BTree;
use crate::catalog::{CatalogLeafRecord, CatalogTree, DirectoryRecord, FileRecord};
use crate::error::{Error, Result};
use crate::fork::{ExtentLookup, ForkReader, Geometry};
use crate::overflow::{ForkKind, OverflowKey, OverflowTree};
use crate::store::BlockStore;
use crate::text;
use deku::DekuContainerRead;
use hfs_types::{
    CatalogNodeId, EMBEDDED_HFS_PLUS_SIGNATURE, ExtentRecord, MDB_OFFSET, MDB_SIGNATURE,
    MasterDirectoryBlock, cnid,
};
use std::fmt;

/// Lookup used while the extents file itself is read, before its tree exists.
struct NoOverflow;

impl ExtentLookup for NoOverflow {
    fn find_extents(&self, _key: &OverflowKey) -> Result<Option<ExtentRecord>> {
        Ok(None)
    }
}

/// An HFS volume whose two B-trees have been read into memory.
///
/// Shares freely between threads when the store does; all lookups take `&self`.
pub struct Volume<S> {
    store: S,
    mdb: MasterDirectoryBlock,
    name: String,
    geometry: Geometry,
    overflow: OverflowTree,
    catalog: CatalogTree,
}

impl<S: BlockStore> Volume<S> {
    /// Read the Master Directory Block, then the extents overflow and catalog
    /// trees. `store` must start at the first byte of the volume.
    pub fn open(store: S) -> Result<Self> {
        let buf = store.read(MDB_OFFSET..MDB_OFFSET + MasterDirectoryBlock::SIZE as u64)?;
        if buf.len() < MasterDirectoryBlock::SIZE {
            return Err(Error::InvalidVolume(format!(
                "image ends {} bytes into the Master Directory Block",
                buf.len()
            )));
        }

        let (_rest, mdb) = MasterDirectoryBlock::from_bytes((buf.as_slice(), 0))?;
        if mdb.signature != MDB_SIGNATURE {
            return Err(Error::InvalidVolume(format!(
                "signature {:#06x} is not an HFS Master Directory Block",
                mdb.signature
            )));
        }
        if mdb.embedded_signature == EMBEDDED_HFS_PLUS_SIGNATURE {
            return Err(Error::Unsupported(
                "HFS wrapper around an HFS Plus volume".into(),
            ));
        }

        let geometry = Geometry::from_mdb(&mdb)?;
        let name = text::mac_roman_to_string(mdb.name_bytes());
        log::info!(
            "Opening volume {name:?}: {} allocation blocks of {} bytes, {} files, {} directories",
            mdb.allocation_block_count,
            geometry.allocation_block_size,
            mdb.file_count,
            mdb.directory_count
        );

        let overflow = {
            let data = ForkReader::new(&store, geometry, &NoOverflow).read(
                cnid::EXTENTS_FILE,
                ForkKind::Data,
                &mdb.extents_file_extents,
                mdb.extents_file_size,
            )?;
            OverflowTree::new(BTree::open(data)?)
        };

        let catalog = {
            let data = ForkReader::new(&store, geometry, &overflow).read(
                cnid::CATALOG_FILE,
                ForkKind::Data,
                &mdb.catalog_file_extents,
                mdb.catalog_file_size,
            )?;
            CatalogTree::new(BTree::open(data)?)
        };

        Ok(Self {
            store,
            mdb,
            name,
            geometry,
            overflow,
            catalog,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn master_directory_block(&self) -> &MasterDirectoryBlock {
        &self.mdb
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &CatalogTree {
        &self.catalog
    }

    pub fn overflow(&self) -> &OverflowTree {
        &self.overflow
    }

    /// The directory whose parent is the root parent, normally CNID 2.
    pub fn root_directory(&self) -> Result<Option<Directory<'_, S>>> {
        Ok(self
            .catalog
            .list_children(cnid::ROOT_PARENT)?
            .into_iter()
            .find_map(|record| match record {
                CatalogLeafRecord::Directory(record) => Some(Directory {
                    volume: self,
                    record,
                }),
                _ => None,
            }))
    }

    /// Catalog records in a directory, threads included.
    pub fn list_children(&self, directory_id: CatalogNodeId) -> Result<Vec<CatalogLeafRecord>> {
        self.catalog.list_children(directory_id)
    }

    pub fn resolve_path(&self, path: &str) -> Result<Option<CatalogLeafRecord>> {
        self.catalog.resolve_path(path)
    }

    /// Files and directories in a directory, by name.
    pub fn contents(&self, directory_id: CatalogNodeId) -> Result<Vec<DirectoryEntry<'_, S>>> {
        Ok(self
            .list_children(directory_id)?
            .into_iter()
            .filter_map(|record| self.entry_for(record))
            .collect())
    }

    pub fn entry(&self, path: &str) -> Result<Option<DirectoryEntry<'_, S>>> {
        Ok(self
            .resolve_path(path)?
            .and_then(|record| self.entry_for(record)))
    }

    pub fn file(&self, path: &str) -> Result<Option<File<'_, S>>> {
        Ok(match self.entry(path)? {
            Some(DirectoryEntry::File(file)) => Some(file),
            _ => None,
        })
    }

    pub fn directory(&self, path: &str) -> Result<Option<Directory<'_, S>>> {
        Ok(match self.entry(path)? {
            Some(DirectoryEntry::Directory(directory)) => Some(directory),
            _ => None,
        })
    }

    /// The complete contents of one fork of a file.
    pub fn reconstruct_fork(&self, file: &FileRecord, fork: ForkKind) -> Result<Vec<u8>> {
        let descriptor = file.fork(fork);
        ForkReader::new(&self.store, self.geometry, &self.overflow).read(
            file.id,
            fork,
            &descriptor.extents,
            descriptor.logical_length,
        )
    }

    fn entry_for(&self, record: CatalogLeafRecord) -> Option<DirectoryEntry<'_, S>> {
        match record {
            CatalogLeafRecord::Directory(record) => Some(DirectoryEntry::Directory(Directory {
                volume: self,
                record,
            })),
            CatalogLeafRecord::File(record) => Some(DirectoryEntry::File(File {
                volume: self,
                record,
            })),
            CatalogLeafRecord::DirectoryThread(_) | CatalogLeafRecord::FileThread(_) => None,
        }
    }
}

impl<S> fmt::Debug for Volume<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volume")
            .field("name", &self.name)
            .field("geometry", &self.geometry)
            .finish_non_exhaustive()
    }
}

/// A file on a volume. Valid for as long as the volume is borrowed.
pub struct File<'v, S> {
    volume: &'v Volume<S>,
    record: FileRecord,
}

impl<'v, S: BlockStore> File<'v, S> {
    pub fn id(&self) -> CatalogNodeId {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.key.name
    }

    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    pub fn volume(&self) -> &'v Volume<S> {
        self.volume
    }

    pub fn fork(&self, kind: ForkKind) -> Result<Vec<u8>> {
        self.volume.reconstruct_fork(&self.record, kind)
    }

    pub fn data_fork(&self) -> Result<Vec<u8>> {
        self.fork(ForkKind::Data)
    }

    pub fn resource_fork(&self) -> Result<Vec<u8>> {
        self.fork(ForkKind::Resource)
    }
}

impl<S> fmt::Debug for File<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("id", &self.record.id)
            .field("name", &self.record.key.name)
            .finish()
    }
}

/// A directory on a volume. Valid for as long as the volume is borrowed.
pub struct Directory<'v, S> {
    volume: &'v Volume<S>,
    record: DirectoryRecord,
}

impl<'v, S: BlockStore> Directory<'v, S> {
    pub fn id(&self) -> CatalogNodeId {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.key.name
    }

    pub fn record(&self) -> &DirectoryRecord {
        &self.record
    }

    pub fn volume(&self) -> &'v Volume<S> {
        self.volume
    }

    pub fn contents(&self) -> Result<Vec<DirectoryEntry<'v, S>>> {
        self.volume.contents(self.record.id)
    }
}

impl<S> fmt::Debug for Directory<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("id", &self.record.id)
            .field("name", &self.record.key.name)
            .finish()
    }
}

pub enum DirectoryEntry<'v, S> {
    File(File<'v, S>),
    Directory(Directory<'v, S>),
}

impl<S: BlockStore> DirectoryEntry<'_, S> {
    pub fn id(&self) -> CatalogNodeId {
        match self {
            Self::File(file) => file.id(),
            Self::Directory(directory) => directory.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::File(file) => file.name(),
            Self::Directory(directory) => directory.name(),
        }
    }
}

impl<S> fmt::Debug for DirectoryEntry<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(file) => file.fmt(f),
            Self::Directory(directory) => directory.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, DATA_AREA};
    use hfs_types::{fork_type, node_kind};

    fn sample() -> Volume<Vec<u8>> {
        Volume::open(testing::sample_image()).unwrap()
    }

    fn names<S: BlockStore>(entries: &[DirectoryEntry<'_, S>]) -> Vec<String> {
        entries.iter().map(|entry| entry.name().to_string()).collect()
    }

    #[test]
    fn opens_sample_volume() {
        let volume = sample();

        assert_eq!(volume.name(), "Sample");
        assert_eq!(volume.geometry().allocation_block_size, 512);
        assert_eq!(volume.geometry().allocation_block_start, testing::ALLOCATION_START);
        assert_eq!(volume.master_directory_block().allocation_block_count, 1024);
        assert_eq!(volume.catalog().tree().header().depth, 2);
        assert_eq!(volume.overflow().tree().header().depth, 0);
    }

    #[test]
    fn root_directory_and_contents() {
        let volume = sample();

        let root = volume.root_directory().unwrap().expect("Volume has a root");
        assert_eq!(root.id(), cnid::ROOT_DIRECTORY);
        assert_eq!(root.name(), "Sample");
        assert_eq!(root.record().valence, 2);

        let contents = root.contents().unwrap();
        assert_eq!(names(&contents), vec!["Alpha", "Beta"]);
        assert!(matches!(&contents[0], DirectoryEntry::Directory(d) if d.id() == 20));
        assert!(matches!(&contents[1], DirectoryEntry::File(f) if f.id() == 21));

        let alpha = volume.contents(20).unwrap();
        assert_eq!(names(&alpha), vec!["Delta", "Gamma"]);
    }

    #[test]
    fn paths_give_typed_handles() {
        let volume = sample();

        assert_eq!(volume.directory("Alpha").unwrap().map(|d| d.id()), Some(20));
        assert_eq!(volume.file("alpha:gamma").unwrap().map(|f| f.id()), Some(22));
        assert!(volume.file("Alpha").unwrap().is_none());
        assert!(volume.directory("Beta").unwrap().is_none());
        assert!(volume.entry("Nope").unwrap().is_none());
    }

    #[test]
    fn forks_are_reconstructed() {
        let volume = sample();
        let gamma = volume.file("Alpha:Gamma").unwrap().expect("Gamma exists");

        assert_eq!(gamma.data_fork().unwrap(), testing::gamma_data());
        assert_eq!(gamma.resource_fork().unwrap(), b"Hello");
        assert_eq!(
            volume.reconstruct_fork(gamma.record(), ForkKind::Data).unwrap().len(),
            700
        );

        let beta = volume.file("Beta").unwrap().expect("Beta exists");
        assert!(beta.data_fork().unwrap().is_empty());
        assert!(beta.resource_fork().unwrap().is_empty());
    }

    #[test]
    fn forks_read_concurrently() {
        let volume = sample();
        let expected = testing::gamma_data();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let gamma = volume.file("Alpha:Gamma").unwrap().unwrap();
                    for _ in 0..20 {
                        assert_eq!(gamma.data_fork().unwrap(), expected);
                    }
                });
            }
        });
    }

    #[test]
    fn fragmented_fork_uses_overflow_tree() {
        // Three inline blocks, two more in the overflow tree.
        let inline = [(DATA_AREA, 1), (DATA_AREA + 2, 1), (DATA_AREA + 4, 1)];
        let overflow = testing::tree(
            1,
            1,
            1,
            1,
            vec![testing::node(
                node_kind::LEAF,
                1,
                0,
                &[testing::overflow_leaf(fork_type::DATA, 40, 3, [(DATA_AREA + 6, 2), (0, 0), (0, 0)])],
            )],
        );
        let catalog = testing::tree(
            1,
            1,
            1,
            1,
            vec![testing::node(
                node_kind::LEAF,
                1,
                0,
                &[
                    testing::directory(1, "Frag", 2, 1),
                    testing::file(2, "Pieces", 40, (5 * 512 - 12, inline), (0, testing::NO_EXTENTS)),
                ],
            )],
        );

        let blocks: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; 512]).collect();
        let contents: Vec<(u16, &[u8])> = blocks
            .iter()
            .enumerate()
            .map(|(i, block)| (DATA_AREA + i as u16, block.as_slice()))
            .collect();
        let image = testing::volume_image("Frag", &overflow, &catalog, &contents);

        let volume = Volume::open(image).unwrap();
        let data = volume.file("Pieces").unwrap().unwrap().data_fork().unwrap();
        let order: Vec<u8> = data.chunks(512).map(|chunk| chunk[0]).collect();
        assert_eq!(order, vec![0, 2, 4, 6, 7]);
        assert_eq!(data.len(), 5 * 512 - 12);
    }

    #[test]
    fn missing_overflow_extents_fail() {
        let catalog = testing::tree(
            1,
            1,
            1,
            1,
            vec![testing::node(
                node_kind::LEAF,
                1,
                0,
                &[
                    testing::directory(1, "Frag", 2, 1),
                    testing::file(2, "Short", 41, (4 * 512, [(DATA_AREA, 1), (0, 0), (0, 0)]), (0, testing::NO_EXTENTS)),
                ],
            )],
        );
        let image = testing::volume_image("Frag", &testing::empty_tree(), &catalog, &[]);

        let volume = Volume::open(image).unwrap();
        let short = volume.file("Short").unwrap().unwrap();
        assert!(matches!(
            short.data_fork(),
            Err(Error::IncompleteExtents {
                file_id: 41,
                found: 1,
                needed: 4,
                ..
            })
        ));
    }

    #[test]
    fn bad_signature_is_invalid() {
        let mut image = testing::sample_image();
        image[1024] = b'X';
        assert!(matches!(Volume::open(image), Err(Error::InvalidVolume(_))));

        assert!(matches!(Volume::open(vec![0u8; 1100]), Err(Error::InvalidVolume(_))));
    }

    #[test]
    fn oversized_geometry_is_an_error() {
        use crate::store::ImageReader;
        use std::io::Cursor;

        let mut image = testing::sample_image();
        image[1024 + 20..1024 + 24].copy_from_slice(&0xFFFF_FE00u32.to_be_bytes());
        image[1024 + 136..1024 + 138].copy_from_slice(&0xFFFFu16.to_be_bytes());
        assert!(matches!(
            Volume::open(ImageReader::new(Cursor::new(image.clone()))),
            Err(Error::InvalidVolume(_))
        ));

        // In range, but each block reaches far past the end of the image.
        image[1024 + 136..1024 + 138].copy_from_slice(&1u16.to_be_bytes());
        assert!(Volume::open(ImageReader::new(Cursor::new(image))).is_err());
    }

    #[test]
    fn embedded_hfs_plus_is_unsupported() {
        let mut image = testing::sample_image();
        image[1024 + 124..1024 + 126].copy_from_slice(b"H+");
        assert!(matches!(Volume::open(image), Err(Error::Unsupported(_))));
    }

    #[test]
    fn broken_catalog_header_fails_open() {
        let mut catalog = testing::sample_catalog();
        // Header node claims two records.
        catalog[10..12].copy_from_slice(&2u16.to_be_bytes());
        let image = testing::volume_image("Broken", &testing::empty_tree(), &catalog, &[]);

        assert!(matches!(Volume::open(image), Err(Error::MalformedNode(_))));
    }
}
