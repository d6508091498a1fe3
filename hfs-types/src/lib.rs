// SPDX-License-Identifier: MIT

//! Fixed-layout structures of the classic Hierarchical File System, as
//! described in Inside Macintosh: Files, Chapter 2 > Data Organization on
//! Volumes, and Inside Macintosh: Devices > SCSI Manager for the partition map.
//!
//! Everything on disk is big-endian. Keyed B-tree records have a variable
//! length key in front of these payloads and are assembled by `classic-hfs`.

#![forbid(unsafe_code)]
#![deny(dead_code)]

use deku::ctx::Endian;
use deku::prelude::*;

/// Master Directory Block signature, `drSigWord`.
pub const MDB_SIGNATURE: u16 = u16::from_be_bytes(*b"BD");

/// `drEmbedSigWord` of an HFS wrapper around an HFS Plus volume.
pub const EMBEDDED_HFS_PLUS_SIGNATURE: u16 = u16::from_be_bytes(*b"H+");

/// Driver Descriptor Record signature, `sbSig`.
pub const DRIVER_DESCRIPTOR_SIGNATURE: u16 = u16::from_be_bytes(*b"ER");

/// Partition Map Entry signature, `pmSig`.
pub const PARTITION_MAP_SIGNATURE: u16 = u16::from_be_bytes(*b"PM");

/// `pmParType` of a partition holding an HFS volume.
pub const HFS_PARTITION_TYPE: &str = "Apple_HFS";

/// The Master Directory Block is always logical block 2 of the volume.
pub const MDB_OFFSET: u64 = 1024;

/// Logical blocks, partition map entries and B-tree nodes are all 512 bytes.
pub const LOGICAL_BLOCK_SIZE: usize = 512;
pub const NODE_SIZE: usize = 512;

/// Seconds since midnight, January 1, 1904, local time.
pub type Date = u32;

/// Catalog Node ID or CNID identifies a file or directory.
pub type CatalogNodeId = u32;

/// Reserved CNIDs. Defined in Inside Macintosh: Files > Catalog File.
pub mod cnid {
    use super::CatalogNodeId;

    /// Parent of the root directory.
    pub const ROOT_PARENT: CatalogNodeId = 1;
    pub const ROOT_DIRECTORY: CatalogNodeId = 2;
    pub const EXTENTS_FILE: CatalogNodeId = 3;
    pub const CATALOG_FILE: CatalogNodeId = 4;
}

/// Values of `ndType` in the node descriptor. Stored as a signed byte, so
/// leaf nodes read as 0xFF.
pub mod node_kind {
    pub const LEAF: u8 = 0xFF;
    pub const INDEX: u8 = 0x00;
    pub const HEADER: u8 = 0x01;
    pub const MAP: u8 = 0x02;
}

/// Values of `cdrType`, the first byte of every catalog leaf record payload.
pub mod catalog_record_type {
    pub const DIRECTORY: u8 = 1;
    pub const FILE: u8 = 2;
    pub const DIRECTORY_THREAD: u8 = 3;
    pub const FILE_THREAD: u8 = 4;
}

/// Values of `xkrFkType` in an extents overflow key.
pub mod fork_type {
    pub const DATA: u8 = 0x00;
    pub const RESOURCE: u8 = 0xFF;
}

/// Bits of `filFlags`.
pub mod file_flags {
    pub const LOCKED: u8 = 0x01;
    pub const THREAD_EXISTS: u8 = 0x02;
    pub const USED: u8 = 0x80;
}

/// Bits of `fdFlags` and `frFlags`. Defined in Inside Macintosh: Macintosh
/// Toolbox Essentials > Finder Interface.
pub mod finder_flags {
    pub const HAS_BEEN_INITED: u16 = 0x0100;
}

/// A run of contiguous allocation blocks. Defined as `ExtDescriptor`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct ExtentDescriptor {
    pub start_block: u16,
    pub block_count: u16,
}

impl ExtentDescriptor {
    pub const SIZE: usize = 4;
}

/// Three extents stored inline in the MDB, a catalog file record, or an
/// extents overflow leaf record. Unused slots are zeroed. Defined as
/// `ExtDataRec`.
pub type ExtentRecord = [ExtentDescriptor; 3];

/// Master Directory Block, stored 1024 bytes from the start of the volume.
/// Defined as `MDB` in Inside Macintosh: Files > Master Directory Blocks.
#[derive(Debug, Clone, DekuRead)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct MasterDirectoryBlock {
    pub signature: u16,
    pub create_date: Date,
    pub modify_date: Date,
    pub attributes: u16,
    pub root_file_count: u16,
    /// First logical block of the volume bitmap.
    pub bitmap_start: u16,
    pub allocation_search_start: u16,
    pub allocation_block_count: u16,
    /// Always a multiple of 512.
    pub allocation_block_size: u32,
    pub clump_size: u32,
    /// Logical block (512 bytes) at which allocation block 0 begins.
    pub allocation_block_start: u16,
    pub next_catalog_id: CatalogNodeId,
    pub free_block_count: u16,
    pub name_length: u8,
    pub name: [u8; 27],
    pub backup_date: Date,
    pub backup_sequence: u16,
    pub write_count: u32,
    pub extents_clump_size: u32,
    pub catalog_clump_size: u32,
    pub root_directory_count: u16,
    pub file_count: u32,
    pub directory_count: u32,
    pub finder_info: [u32; 8],
    /// `drVCSize`, reused as `drEmbedSigWord` by HFS wrappers.
    pub embedded_signature: u16,
    pub embedded_extent: ExtentDescriptor,
    pub extents_file_size: u32,
    pub extents_file_extents: ExtentRecord,
    pub catalog_file_size: u32,
    pub catalog_file_extents: ExtentRecord,
}

impl MasterDirectoryBlock {
    pub const SIZE: usize = 162;

    /// Volume name bytes in Mac OS Roman, without the length prefix.
    pub fn name_bytes(&self) -> &[u8] {
        let len = (self.name_length as usize).min(self.name.len());
        &self.name[..len]
    }
}

/// Node descriptor at the start of every B-tree node. Defined as `NodeDescriptor`
/// in Inside Macintosh: Files > B*-Trees.
#[derive(Debug, Clone, DekuRead)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct NodeDescriptor {
    pub forward_link: u32,
    pub backward_link: u32,
    /// One of [`node_kind`], kept raw so unknown values can be tolerated.
    pub kind: u8,
    pub height: u8,
    pub num_records: u16,
    pub reserved: u16,
}

impl NodeDescriptor {
    pub const SIZE: usize = 14;
}

/// First record of a tree's header node. Defined as `BTHdrRec`.
#[derive(Debug, Clone, DekuRead)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct HeaderRecord {
    pub depth: u16,
    pub root_node: u32,
    pub leaf_records: u32,
    pub first_leaf_node: u32,
    pub last_leaf_node: u32,
    pub node_size: u16,
    pub max_key_length: u16,
    pub total_nodes: u32,
    pub free_nodes: u32,
}

impl HeaderRecord {
    /// Size of the record on disk, including the 76 reserved bytes not decoded here.
    pub const SIZE: usize = 106;
}

/// A location on screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct Point {
    pub v: i16,
    pub h: i16,
}

/// Rectangular region used for directory windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, DekuRead)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct Rect {
    pub top: i16,
    pub left: i16,
    pub bottom: i16,
    pub right: i16,
}

/// Four characters identifying a file type or creator.
pub type OSType = u32;

/// Finder information for a file. Defined as `FInfo`.
#[derive(Debug, Clone, Copy, DekuRead)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct FileInfo {
    pub file_type: OSType,
    pub creator: OSType,
    pub finder_flags: u16,
    pub location: Point,
    pub folder: i16,
}

/// Extended Finder information for a file. Defined as `FXInfo`.
#[derive(Debug, Clone, Copy, DekuRead)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct ExtendedFileInfo {
    pub icon_id: i16,
    pub reserved: [i16; 3],
    pub script: u8,
    pub extended_flags: u8,
    pub comment: i16,
    pub put_away_folder_id: i32,
}

/// Finder information for a directory. Defined as `DInfo`.
#[derive(Debug, Clone, Copy, DekuRead)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct FolderInfo {
    pub window_bounds: Rect,
    pub finder_flags: u16,
    pub location: Point,
    pub view: i16,
}

/// Extended Finder information for a directory. Defined as `DXInfo`.
#[derive(Debug, Clone, Copy, DekuRead)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct ExtendedFolderInfo {
    pub scroll_position: Point,
    pub open_chain: i32,
    pub script: u8,
    pub extended_flags: u8,
    pub comment: i16,
    pub put_away_folder_id: i32,
}

/// Catalog leaf payload for directories. Defined as `cdrDirRec`.
#[derive(Debug, Clone, DekuRead)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct CatalogDirectory {
    /// Always [`catalog_record_type::DIRECTORY`].
    pub record_type: u8,
    pub reserved: u8,
    pub flags: u16,
    /// Number of entries in the directory.
    pub valence: u16,
    pub directory_id: CatalogNodeId,
    pub create_date: Date,
    pub modify_date: Date,
    pub backup_date: Date,
    pub user_info: FolderInfo,
    pub finder_info: ExtendedFolderInfo,
}

/// Catalog leaf payload for files. Defined as `cdrFilRec`.
#[derive(Debug, Clone, DekuRead)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct CatalogFile {
    /// Always [`catalog_record_type::FILE`].
    pub record_type: u8,
    pub reserved: u8,
    /// See [`file_flags`].
    pub flags: u8,
    /// `filTyp`, should always be zero.
    pub version: u8,
    pub user_info: FileInfo,
    pub file_id: CatalogNodeId,
    pub data_start_block: u16,
    pub data_logical_length: u32,
    pub data_physical_length: u32,
    pub resource_start_block: u16,
    pub resource_logical_length: u32,
    pub resource_physical_length: u32,
    pub create_date: Date,
    pub modify_date: Date,
    pub backup_date: Date,
    pub finder_info: ExtendedFileInfo,
    pub clump_size: u16,
    pub data_extents: ExtentRecord,
    pub resource_extents: ExtentRecord,
}

/// Catalog leaf payload linking a CNID back to its parent and name. Shared by
/// directory and file threads. Defined as `cdrThdRec` and `cdrFThdRec`.
#[derive(Debug, Clone, DekuRead)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct CatalogThread {
    pub record_type: u8,
    pub reserved: u8,
    pub reserved_2: [u32; 2],
    pub parent_id: CatalogNodeId,
    pub name_length: u8,
    #[deku(count = "name_length")]
    pub name: Vec<u8>,
}

/// Block 0 of a partitioned disk. Defined as `Block0` in Inside Macintosh:
/// Devices > SCSI Manager. Only the first driver entry is described.
#[derive(Debug, Clone, DekuRead)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct DriverDescriptor {
    pub signature: u16,
    pub block_size: u16,
    pub block_count: u32,
    pub device_type: u16,
    pub device_id: u16,
    pub data: u32,
    pub driver_count: u16,
    pub driver_block: u32,
    pub driver_size: u16,
    pub driver_type: u16,
}

/// One 512-byte entry of the Apple partition map, starting at block 1.
/// Defined as `Partition` in Inside Macintosh: Devices > SCSI Manager.
#[derive(Debug, Clone, DekuRead)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct PartitionMapEntry {
    pub signature: u16,
    pub reserved: u16,
    /// Number of entries in the whole map.
    pub map_entries: u32,
    /// First physical block of the partition.
    pub start_block: u32,
    pub block_count: u32,
    /// NUL-padded ASCII.
    pub name: [u8; 32],
    /// NUL-padded ASCII, e.g. "Apple_HFS".
    pub partition_type: [u8; 32],
    pub data_start: u32,
    pub data_count: u32,
    pub status: u32,
}
