//! The catalog B-tree, which maps (parent directory, name) to directory and
//! file records. Described in Inside Macintosh: Files > Catalog File.

use crate::btree::{self, BTree, Node, ScanEnd};
use crate::error::{Error, Result};
use crate::overflow::ForkKind;
use crate::text;
use deku::DekuContainerRead;
use hfs_types::{
    CatalogDirectory, CatalogFile, CatalogNodeId, CatalogThread, Date, ExtendedFileInfo,
    ExtendedFolderInfo, ExtentRecord, FileInfo, FolderInfo, catalog_record_type, cnid, file_flags,
};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::ops::ControlFlow;

/// Catalog key: the parent directory's CNID and the entry's name.
///
/// Thread records use the CNID of the entry they describe as `parent_id` and
/// an empty name.
#[derive(Debug, Clone)]
pub struct CatalogKey {
    pub parent_id: CatalogNodeId,
    pub name: String,
}

impl CatalogKey {
    pub fn new(parent_id: CatalogNodeId, name: impl Into<String>) -> Self {
        Self {
            parent_id,
            name: name.into(),
        }
    }

    /// Order this key against a target, by parent and then by name ignoring case.
    pub fn compare(&self, parent_id: CatalogNodeId, name: &str) -> Ordering {
        self.parent_id
            .cmp(&parent_id)
            .then_with(|| text::compare_names(&self.name, name))
    }

    /// Decode the key at the start of a record. Returns the key and the offset
    /// of the data after it, which is padded to an even position.
    fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        let key_length = match bytes.first() {
            None | Some(0) => return Err(Error::KeyDecode("deleted record".into())),
            Some(&length) => length as usize,
        };
        if key_length < 6 || bytes.len() <= key_length {
            return Err(Error::KeyDecode(format!(
                "key of {key_length} bytes in a {}-byte record",
                bytes.len()
            )));
        }

        let parent_id = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let name_length = bytes[6] as usize;
        if 6 + name_length > key_length {
            return Err(Error::KeyDecode(format!(
                "name of {name_length} bytes in a key of {key_length}"
            )));
        }
        let name = text::mac_roman_to_string(&bytes[7..7 + name_length]);

        Ok((Self { parent_id, name }, (key_length + 2) & !1))
    }
}

impl PartialEq for CatalogKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CatalogKey {}

impl PartialOrd for CatalogKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CatalogKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other.parent_id, &other.name)
    }
}

impl fmt::Display for CatalogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {:?})", self.parent_id, self.name)
    }
}

/// Index node record pointing at the child node whose keys start at `key`.
#[derive(Debug, Clone)]
pub struct CatalogIndexRecord {
    pub key: CatalogKey,
    pub child: u32,
}

impl CatalogIndexRecord {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (key, offset) = CatalogKey::decode(bytes)?;
        let child = btree::read_u32(bytes, offset).ok_or_else(|| {
            Error::KeyDecode(format!("index record {key} has no child pointer"))
        })?;
        Ok(Self { key, child })
    }
}

/// Where one fork of a file lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkDescriptor {
    pub first_allocation_block: u16,
    pub logical_length: u32,
    pub physical_length: u32,
    /// The first three extents. The rest, if any, are in the extents overflow file.
    pub extents: ExtentRecord,
}

#[derive(Debug, Clone)]
pub struct DirectoryRecord {
    pub key: CatalogKey,
    pub id: CatalogNodeId,
    pub flags: u16,
    /// Number of entries in the directory.
    pub valence: u16,
    pub create_date: Date,
    pub modify_date: Date,
    pub backup_date: Date,
    pub user_info: FolderInfo,
    pub finder_info: ExtendedFolderInfo,
}

impl DirectoryRecord {
    fn new(key: CatalogKey, raw: CatalogDirectory) -> Self {
        Self {
            key,
            id: raw.directory_id,
            flags: raw.flags,
            valence: raw.valence,
            create_date: raw.create_date,
            modify_date: raw.modify_date,
            backup_date: raw.backup_date,
            user_info: raw.user_info,
            finder_info: raw.finder_info,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub key: CatalogKey,
    pub id: CatalogNodeId,
    /// See [`hfs_types::file_flags`].
    pub flags: u8,
    pub user_info: FileInfo,
    pub finder_info: ExtendedFileInfo,
    pub create_date: Date,
    pub modify_date: Date,
    pub backup_date: Date,
    pub clump_size: u16,
    pub data_fork: ForkDescriptor,
    pub resource_fork: ForkDescriptor,
}

impl FileRecord {
    fn new(key: CatalogKey, raw: CatalogFile) -> Self {
        Self {
            key,
            id: raw.file_id,
            flags: raw.flags,
            user_info: raw.user_info,
            finder_info: raw.finder_info,
            create_date: raw.create_date,
            modify_date: raw.modify_date,
            backup_date: raw.backup_date,
            clump_size: raw.clump_size,
            data_fork: ForkDescriptor {
                first_allocation_block: raw.data_start_block,
                logical_length: raw.data_logical_length,
                physical_length: raw.data_physical_length,
                extents: raw.data_extents,
            },
            resource_fork: ForkDescriptor {
                first_allocation_block: raw.resource_start_block,
                logical_length: raw.resource_logical_length,
                physical_length: raw.resource_physical_length,
                extents: raw.resource_extents,
            },
        }
    }

    pub fn fork(&self, kind: ForkKind) -> &ForkDescriptor {
        match kind {
            ForkKind::Data => &self.data_fork,
            ForkKind::Resource => &self.resource_fork,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.flags & file_flags::LOCKED != 0
    }

    pub fn has_thread(&self) -> bool {
        self.flags & file_flags::THREAD_EXISTS != 0
    }

    pub fn is_used(&self) -> bool {
        self.flags & file_flags::USED != 0
    }

    /// Finder file type, e.g. `TEXT`.
    pub fn file_type(&self) -> [u8; 4] {
        self.user_info.file_type.to_be_bytes()
    }

    /// Finder creator code of the owning application.
    pub fn creator(&self) -> [u8; 4] {
        self.user_info.creator.to_be_bytes()
    }
}

/// Links a directory or file back to its parent and name.
#[derive(Debug, Clone)]
pub struct ThreadRecord {
    pub key: CatalogKey,
    pub parent_id: CatalogNodeId,
    pub name: String,
}

impl ThreadRecord {
    fn new(key: CatalogKey, raw: CatalogThread) -> Self {
        Self {
            key,
            parent_id: raw.parent_id,
            name: text::mac_roman_to_string(&raw.name),
        }
    }
}

/// A record from a catalog leaf node.
#[derive(Debug, Clone)]
pub enum CatalogLeafRecord {
    Directory(DirectoryRecord),
    File(FileRecord),
    DirectoryThread(ThreadRecord),
    FileThread(ThreadRecord),
}

impl CatalogLeafRecord {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (key, offset) = CatalogKey::decode(bytes)?;
        let data = bytes.get(offset..).unwrap_or_default();
        let Some(&record_type) = data.first() else {
            return Err(Error::KeyDecode(format!("record {key} has no data")));
        };

        let record = match record_type {
            catalog_record_type::DIRECTORY => {
                let (_rest, raw) = CatalogDirectory::from_bytes((data, 0))?;
                Self::Directory(DirectoryRecord::new(key, raw))
            }
            catalog_record_type::FILE => {
                let (_rest, raw) = CatalogFile::from_bytes((data, 0))?;
                Self::File(FileRecord::new(key, raw))
            }
            catalog_record_type::DIRECTORY_THREAD => {
                let (_rest, raw) = CatalogThread::from_bytes((data, 0))?;
                Self::DirectoryThread(ThreadRecord::new(key, raw))
            }
            catalog_record_type::FILE_THREAD => {
                let (_rest, raw) = CatalogThread::from_bytes((data, 0))?;
                Self::FileThread(ThreadRecord::new(key, raw))
            }
            other => return Err(Error::UnknownRecordType(other)),
        };

        Ok(record)
    }

    pub fn key(&self) -> &CatalogKey {
        match self {
            Self::Directory(record) => &record.key,
            Self::File(record) => &record.key,
            Self::DirectoryThread(record) | Self::FileThread(record) => &record.key,
        }
    }

    pub fn parent_id(&self) -> CatalogNodeId {
        self.key().parent_id
    }

    pub fn name(&self) -> &str {
        &self.key().name
    }

    /// CNID of the directory or file, `None` for threads.
    pub fn id(&self) -> Option<CatalogNodeId> {
        match self {
            Self::Directory(record) => Some(record.id),
            Self::File(record) => Some(record.id),
            Self::DirectoryThread(_) | Self::FileThread(_) => None,
        }
    }

    pub fn is_thread(&self) -> bool {
        matches!(self, Self::DirectoryThread(_) | Self::FileThread(_))
    }
}

pub struct CatalogTree {
    tree: BTree,
}

impl CatalogTree {
    pub fn new(tree: BTree) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> &BTree {
        &self.tree
    }

    /// Descend to the leaf where records for `(parent_id, name)` would be.
    pub fn first_leaf_for(&self, parent_id: CatalogNodeId, name: &str) -> Result<Option<Node<'_>>> {
        self.tree.descend(|node| {
            btree::greatest_lower_bound(
                node.decoded(CatalogIndexRecord::decode),
                |record| record.key.compare(parent_id, name),
                |record| record.child,
                // A directory listing starts at the empty name, which can sort
                // before every key of the leaf holding the directory's entries.
                |record| name.is_empty() && record.key.parent_id == parent_id,
            )
        })
    }

    /// Every leaf record whose parent is `parent_id`, threads included,
    /// ordered by name.
    pub fn list_children(&self, parent_id: CatalogNodeId) -> Result<Vec<CatalogLeafRecord>> {
        let mut children = Vec::new();
        let Some(start) = self.first_leaf_for(parent_id, "")? else {
            return Ok(children);
        };

        for leaf in self.tree.leaves_from(start) {
            let end = btree::scan_ascending(
                leaf?.decoded(CatalogLeafRecord::decode),
                |record| record.parent_id().cmp(&parent_id),
                |record| {
                    children.push(record);
                    ControlFlow::Continue(())
                },
            );
            if end == ScanEnd::Overshot {
                break;
            }
        }

        children.sort_by(|a, b| text::compare_names(a.name(), b.name()));
        Ok(children)
    }

    /// The record keyed exactly by `(parent_id, name)`, ignoring case.
    pub fn find(&self, parent_id: CatalogNodeId, name: &str) -> Result<Option<CatalogLeafRecord>> {
        let Some(leaf) = self.first_leaf_for(parent_id, name)? else {
            return Ok(None);
        };

        let mut found = None;
        btree::scan_ascending(
            leaf.decoded(CatalogLeafRecord::decode),
            |record| record.key().compare(parent_id, name),
            |record| {
                found = Some(record);
                ControlFlow::Break(())
            },
        );
        Ok(found)
    }

    /// Look up a colon-separated path relative to the root directory, such as
    /// `System Folder:Finder`. Only the last component may name a file.
    pub fn resolve_path(&self, path: &str) -> Result<Option<CatalogLeafRecord>> {
        let mut parent_id = cnid::ROOT_DIRECTORY;
        let mut components = path.split(':').filter(|name| !name.is_empty()).peekable();

        while let Some(name) = components.next() {
            let Some(record) = self.find(parent_id, name)? else {
                log::debug!("{name:?} not found in directory {parent_id}");
                return Ok(None);
            };

            let is_last = components.peek().is_none();
            match record {
                CatalogLeafRecord::Directory(directory) if !is_last => parent_id = directory.id,
                record @ (CatalogLeafRecord::Directory(_) | CatalogLeafRecord::File(_)) if is_last => {
                    return Ok(Some(record));
                }
                _ => return Ok(None),
            }
        }

        Ok(None)
    }

    /// The thread record of a directory or file.
    pub fn thread(&self, id: CatalogNodeId) -> Result<Option<ThreadRecord>> {
        Ok(match self.find(id, "")? {
            Some(CatalogLeafRecord::DirectoryThread(thread) | CatalogLeafRecord::FileThread(thread)) => {
                Some(thread)
            }
            _ => None,
        })
    }

    /// Names leading from the root directory to `id`, recovered by following
    /// thread records upwards. The root directory itself has an empty path.
    pub fn path_of(&self, id: CatalogNodeId) -> Result<Option<Vec<String>>> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        let mut current = id;

        while current != cnid::ROOT_DIRECTORY {
            if !visited.insert(current) {
                return Err(Error::MalformedNode(format!(
                    "thread records above {id} form a cycle"
                )));
            }
            let Some(thread) = self.thread(current)? else {
                return Ok(None);
            };
            path.push(thread.name);
            current = thread.parent_id;
        }

        path.reverse();
        Ok(Some(path))
    }

    /// All leaf records in key order.
    pub fn records(&self) -> impl Iterator<Item = Result<CatalogLeafRecord>> + '_ {
        self.tree.leaves().flat_map(|leaf| match leaf {
            Ok(node) => node
                .decoded(CatalogLeafRecord::decode)
                .map(Ok)
                .collect::<Vec<_>>(),
            Err(err) => vec![Err(err)],
        })
    }
}
