use crate::overflow::ForkKind;
use hfs_types::CatalogNodeId;
use thiserror::Error;

/// Errors raised while opening a volume or reading from it.
///
/// Searches that simply find nothing are not errors; they return `Ok(None)`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed structure: {0}")]
    Decode(#[from] deku::DekuError),

    #[error("Malformed B-tree node: {0}")]
    MalformedNode(String),

    #[error("Unknown catalog record type {0:#04x}")]
    UnknownRecordType(u8),

    #[error("Undecodable key: {0}")]
    KeyDecode(String),

    #[error("Invalid volume: {0}")]
    InvalidVolume(String),

    #[error("Unsupported volume: {0}")]
    Unsupported(String),

    #[error(
        "Extents of the {fork:?} fork of file {file_id} cover {found} of {needed} allocation blocks"
    )]
    IncompleteExtents {
        file_id: CatalogNodeId,
        fork: ForkKind,
        found: u32,
        needed: u32,
    },

    #[error("Read {read} of {expected} bytes")]
    TruncatedRead { read: u64, expected: u64 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
