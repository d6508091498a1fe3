//! Random access to the bytes of a disk image.

use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::sync::{Arc, Mutex};

/// Byte-addressed read access to a disk image or block device.
///
/// Implementations may be shared between threads. A read returns fewer bytes
/// than requested only when the medium ends inside the range.
pub trait BlockStore: Send + Sync {
    fn read(&self, range: Range<u64>) -> io::Result<Vec<u8>>;
}

impl<T: BlockStore + ?Sized> BlockStore for &T {
    fn read(&self, range: Range<u64>) -> io::Result<Vec<u8>> {
        (**self).read(range)
    }
}

impl<T: BlockStore + ?Sized> BlockStore for Arc<T> {
    fn read(&self, range: Range<u64>) -> io::Result<Vec<u8>> {
        (**self).read(range)
    }
}

impl BlockStore for [u8] {
    fn read(&self, range: Range<u64>) -> io::Result<Vec<u8>> {
        let len = self.len() as u64;
        let start = range.start.min(len);
        let end = range.end.min(len).max(start);
        Ok(self[start as usize..end as usize].to_vec())
    }
}

impl BlockStore for Vec<u8> {
    fn read(&self, range: Range<u64>) -> io::Result<Vec<u8>> {
        self.as_slice().read(range)
    }
}

/// A seekable reader shared behind a lock, so that each seek-then-read pair
/// happens without interleaving.
pub struct ImageReader<R> {
    inner: Mutex<R>,
}

impl<R: Read + Seek + Send> ImageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<R: Read + Seek + Send> BlockStore for ImageReader<R> {
    fn read(&self, range: Range<u64>) -> io::Result<Vec<u8>> {
        let length = range.end.saturating_sub(range.start);
        let mut reader = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("Image reader lock poisoned"))?;

        reader.seek(SeekFrom::Start(range.start))?;
        // Lengths come from the image, so grow only with what is actually read.
        let mut buf = Vec::new();
        (&mut *reader).take(length).read_to_end(&mut buf)?;

        Ok(buf)
    }
}

/// View of a store rebased at a fixed byte offset, e.g. the start of a partition.
#[derive(Debug, Clone)]
pub struct Window<S> {
    store: S,
    base: u64,
}

impl<S: BlockStore> Window<S> {
    pub fn new(store: S, base: u64) -> Self {
        Self { store, base }
    }

    pub fn base(&self) -> u64 {
        self.base
    }
}

impl<S: BlockStore> BlockStore for Window<S> {
    fn read(&self, range: Range<u64>) -> io::Result<Vec<u8>> {
        let start = self.base.checked_add(range.start);
        let end = self.base.checked_add(range.end);
        match (start, end) {
            (Some(start), Some(end)) => self.store.read(start..end),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Read range overflows the image",
            )),
        }
    }
}
