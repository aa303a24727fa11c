//! Indexed-allocation inode core.
//!
//! This crate implements the block-mapping and lifecycle core of a file
//! abstraction over a block device with fixed 512-byte sectors: a one-sector
//! on-disk inode record with direct, single-indirect and double-indirect
//! pointers, the recursive algorithms that grow, resolve and release that
//! pointer tree, and an open-handle registry (see ```struct InodeStore```)
//! with reference counting and deny-write semantics.
//!
//! Directory entries, path resolution and free-space management are out of
//! scope: callers plug those in through the `BlockDevice` and
//! `BlockAllocator` traits below.
//!
//! The interface is synchronous. See src/tests.rs for usage examples.
//!
//! TODO:
//!
//! * a scavenger for sectors orphaned by growth that failed halfway
//! * async API

pub mod file_block_device;

mod inode;
mod layout;
mod store;
mod tree;


pub use inode::Inode;
pub use layout::*;
pub use store::InodeStore;

use std::io::Result;

/// The device sector size. Fixed: the on-disk record layout depends on it.
pub const SECTOR_SIZE: usize = 512;

/// A sector of bytes.
#[derive(Clone, Copy)]
#[repr(C, align(512))]
pub struct Sector {
    bytes: [u8; 512],
}

const _: () = assert!(core::mem::size_of::<Sector>() == SECTOR_SIZE);

impl Sector {
    pub const fn new_zeroed() -> Self {
        Self { bytes: [0; 512] }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn get_at_offset<T: plain::Plain>(&self, offset: usize) -> &T {
        assert!(core::mem::size_of::<T>() + offset <= SECTOR_SIZE);
        plain::from_bytes(&self.bytes[offset..(offset + core::mem::size_of::<T>())])
            .expect("Bad alignment")
    }

    pub fn get_mut_at_offset<T: plain::Plain>(&mut self, offset: usize) -> &mut T {
        assert!(core::mem::size_of::<T>() + offset <= SECTOR_SIZE);
        plain::from_mut_bytes(&mut self.bytes[offset..(offset + core::mem::size_of::<T>())])
            .expect("Bad alignment")
    }
}

/// Synchronous block device with fixed 512-byte sectors.
///
/// Sector 0 is reserved by the device layer; it never holds file content or
/// index data, which lets pointer value 0 mean "not allocated".
pub trait BlockDevice: Send + Sync {
    /// The number of sectors in this device.
    fn num_sectors(&self) -> u32;

    /// Read a single sector into buf. buf must be of length SECTOR_SIZE.
    fn read_sector(&self, sector: u32, buf: &mut [u8]) -> Result<()>;

    /// Write a single sector. Same length requirement as in read_sector.
    fn write_sector(&self, sector: u32, buf: &[u8]) -> Result<()>;
}

/// Free-space manager, external to this crate.
pub trait BlockAllocator: Send + Sync {
    /// Obtain `count` consecutive free sectors; returns the first sector id.
    /// Fails with ErrorKind::StorageFull when the device is out of space.
    /// This crate only ever asks for one sector at a time.
    fn allocate(&self, count: u32) -> Result<u32>;

    /// Return `count` consecutive sectors starting at `sector`.
    fn release(&self, sector: u32, count: u32);
}
