//! The open-inode registry.

use std::collections::HashMap;
use std::io::{ErrorKind, Result};
use std::sync::{Arc, Mutex};

use super::*;
use crate::tree;

/// Owns the device, the allocator and the table of open inodes. Exactly one
/// `Inode` exists per record sector: opening the same sector twice hands out
/// the same `Arc` with a bumped open count.
pub struct InodeStore {
    dev: Arc<dyn BlockDevice>,
    alloc: Arc<dyn BlockAllocator>,
    open_inodes: Mutex<HashMap<u32, Arc<Inode>>>,
}

impl InodeStore {
    pub fn new(dev: Arc<dyn BlockDevice>, alloc: Arc<dyn BlockAllocator>) -> Self {
        Self {
            dev,
            alloc,
            open_inodes: Mutex::new(HashMap::new()),
        }
    }

    /// Writes a fresh record of `length` bytes at `sector`, with its whole
    /// tree allocated and zero-filled. The record sector itself is the
    /// caller's to provide: the directory layer decides where records live.
    ///
    /// Fails with StorageFull when the allocator runs out partway; sectors
    /// allocated up to that point are not returned.
    pub fn create(&self, sector: u32, length: u32, is_dir: bool) -> Result<()> {
        let mut record = InodeRecord::new(is_dir);
        tree::grow(
            &mut record,
            self.dev.as_ref(),
            self.alloc.as_ref(),
            length as u64,
        )?;
        record.length = length;

        self.dev
            .write_sector(sector, record_to_sector(&record).as_bytes())
    }

    /// Opens the record at `sector`. Repeated opens of the same sector
    /// share one handle. A record with a bad magic or an impossible length
    /// is corrupt: `Err(InvalidData)`, nothing registered.
    pub fn open(&self, sector: u32) -> Result<Arc<Inode>> {
        let mut map = self.open_inodes.lock().unwrap();
        if let Some(inode) = map.get(&sector) {
            inode.life.lock().unwrap().open_count += 1;
            return Ok(inode.clone());
        }

        let mut buf = Sector::new_zeroed();
        self.dev.read_sector(sector, buf.as_bytes_mut())?;
        let record = *sector_get_record(&buf);
        if record.magic != INODE_MAGIC {
            log::error!("sector {sector}: bad inode magic {:#x}", record.magic);
            return Err(ErrorKind::InvalidData.into());
        }
        // Every later length-driven walk of the tree counts on this bound.
        if record.length as u64 > MAX_FILE_BYTES {
            log::error!(
                "sector {sector}: inode length {} exceeds the maximum file size",
                record.length
            );
            return Err(ErrorKind::InvalidData.into());
        }

        let inode = Arc::new(Inode::new(
            sector,
            self.dev.clone(),
            self.alloc.clone(),
            record,
        ));
        map.insert(sector, inode.clone());
        Ok(inode)
    }

    /// Duplicates an existing handle, bumping its open count. No device
    /// read happens.
    pub fn reopen(&self, inode: &Arc<Inode>) -> Arc<Inode> {
        inode.life.lock().unwrap().open_count += 1;
        inode.clone()
    }

    /// Closes one reference. The last close unregisters the handle, and a
    /// removed inode then gives its record sector and tree back to the
    /// allocator.
    pub fn close(&self, inode: Arc<Inode>) -> Result<()> {
        let release;
        {
            let mut map = self.open_inodes.lock().unwrap();
            let mut life = inode.life.lock().unwrap();
            assert!(life.open_count > 0);
            life.open_count -= 1;
            if life.open_count > 0 {
                return Ok(());
            }
            map.remove(&inode.inumber());
            release = life.removed;
        }

        // Past this point the inode is unreachable through the registry;
        // the device work happens with no locks held.
        if release {
            inode.release_storage()?;
        }
        Ok(())
    }

    /// The number of currently registered handles.
    pub fn open_handles(&self) -> usize {
        self.open_inodes.lock().unwrap().len()
    }
}
