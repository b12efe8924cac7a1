//! Shared memory pixel storage
//!
//! Buffers handed to the compositor live in an anonymous memfd mapped
//! into our address space. The compositor maps the same file through
//! wl_shm, so writes through [`PixelStorage::pixels_mut`] are what it
//! reads on the next commit.

use std::fs::File;
use std::os::unix::io::{AsFd, BorrowedFd};

use log::debug;
use memmap2::MmapMut;
use rustix::fs::{ftruncate, memfd_create, MemfdFlags};

use crate::error::ShmError;
use crate::protocol::{PixelStorage, BYTES_PER_PIXEL};

/// An ARGB8888 image in shared memory
#[derive(Debug)]
pub struct ShmStorage {
    file: File,
    map: MmapMut,
    width: i32,
    height: i32,
}

impl ShmStorage {
    /// Allocate a zeroed `width`x`height` image in a fresh memfd
    pub fn new(width: i32, height: i32) -> Result<Self, ShmError> {
        let size = Self::size_for(width, height)?;
        let fd = memfd_create("waysurf-shm", MemfdFlags::CLOEXEC)
            .map_err(|e| ShmError::Memfd(e.into()))?;
        ftruncate(&fd, size as u64).map_err(|e| ShmError::Memfd(e.into()))?;

        Self::map(File::from(fd), width, height)
    }

    /// Use an existing file, resized to fit the image
    pub fn from_file(file: File, width: i32, height: i32) -> Result<Self, ShmError> {
        let size = Self::size_for(width, height)?;
        file.set_len(size as u64).map_err(ShmError::Memfd)?;
        Self::map(file, width, height)
    }

    fn map(file: File, width: i32, height: i32) -> Result<Self, ShmError> {
        // SAFETY: the file is private to us and the compositor, and its
        // length is never changed while mapped
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(ShmError::Map)?;
        debug!("Mapped {} bytes of shared memory for {}x{}", map.len(), width, height);

        Ok(Self {
            file,
            map,
            width,
            height,
        })
    }

    /// Byte size of a `width`x`height` image, which must fit a wl_shm pool
    pub fn size_for(width: i32, height: i32) -> Result<usize, ShmError> {
        if width <= 0 || height <= 0 {
            return Err(ShmError::InvalidSize { width, height });
        }
        width
            .checked_mul(BYTES_PER_PIXEL)
            .and_then(|stride| stride.checked_mul(height))
            .map(|size| size as usize)
            .ok_or(ShmError::InvalidSize { width, height })
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn stride(&self) -> i32 {
        self.width * BYTES_PER_PIXEL
    }

    /// Size of the mapping in bytes
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl AsFd for ShmStorage {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl PixelStorage for ShmStorage {
    fn pixels(&self) -> &[u8] {
        &self.map
    }

    fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom};

    #[test]
    fn test_size_validation() {
        assert_eq!(ShmStorage::size_for(2, 3).unwrap(), 24);
        assert!(matches!(
            ShmStorage::size_for(0, 10),
            Err(ShmError::InvalidSize { width: 0, height: 10 })
        ));
        assert!(ShmStorage::size_for(65535, 65535).is_err());
    }

    #[test]
    fn test_writes_reach_the_file() {
        let file = tempfile::tempfile().unwrap();
        let mut reader = file.try_clone().unwrap();
        let mut storage = ShmStorage::from_file(file, 4, 2).unwrap();
        assert_eq!(storage.len(), 32);
        assert_eq!(storage.stride(), 16);

        storage.pixels_mut()[..4].copy_from_slice(&0xff11_2233u32.to_ne_bytes());

        let mut contents = Vec::new();
        reader.seek(SeekFrom::Start(0)).unwrap();
        reader.read_to_end(&mut contents).unwrap();
        assert_eq!(contents.len(), 32);
        assert_eq!(&contents[..4], &0xff11_2233u32.to_ne_bytes());
        assert!(contents[4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_memfd_storage() {
        let storage = ShmStorage::new(8, 8).unwrap();
        assert_eq!(storage.pixels().len(), 256);
        assert!(storage.pixels().iter().all(|b| *b == 0));
    }
}
