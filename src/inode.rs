//! The in-memory inode handle and the byte-addressed read/write path.

use std::io::{ErrorKind, Result};
use std::sync::{Arc, Mutex, RwLock};

use super::*;
use crate::tree;

pub(crate) struct LifeState {
    pub open_count: u32,
    pub deny_write_count: u32,
    pub removed: bool,
}

/// An open file. One instance exists per on-disk record no matter how many
/// times the record is opened; all openers share it through `Arc` and
/// observe each other's writes immediately.
///
/// Lock order: the store's registry map, then `life`. The cached `record` is
/// taken on its own, never while holding `life`: readers share it, writers
/// and growth hold it exclusively.
pub struct Inode {
    sector: u32,
    dev: Arc<dyn BlockDevice>,
    alloc: Arc<dyn BlockAllocator>,
    pub(crate) life: Mutex<LifeState>,
    record: RwLock<InodeRecord>,
}

impl Inode {
    pub(crate) fn new(
        sector: u32,
        dev: Arc<dyn BlockDevice>,
        alloc: Arc<dyn BlockAllocator>,
        record: InodeRecord,
    ) -> Self {
        Self {
            sector,
            dev,
            alloc,
            life: Mutex::new(LifeState {
                open_count: 1,
                deny_write_count: 0,
                removed: false,
            }),
            record: RwLock::new(record),
        }
    }

    /// The sector the record lives on. Doubles as the inode number.
    pub fn inumber(&self) -> u32 {
        self.sector
    }

    /// Current file size in bytes.
    pub fn length(&self) -> u32 {
        self.record.read().unwrap().length
    }

    pub fn is_dir(&self) -> bool {
        self.record.read().unwrap().is_dir != 0
    }

    /// The number of live opens of this inode.
    pub fn open_count(&self) -> u32 {
        self.life.lock().unwrap().open_count
    }

    /// Marks the inode for deletion. Existing openers keep reading and
    /// writing it; the storage is reclaimed on the last close.
    pub fn remove(&self) {
        self.life.lock().unwrap().removed = true;
    }

    /// Suppresses writes through every handle of this inode until a
    /// matching `allow_write`. Panics when denials outnumber openers: that
    /// is a caller bug, not an I/O condition.
    pub fn deny_write(&self) {
        let mut life = self.life.lock().unwrap();
        life.deny_write_count += 1;
        assert!(life.deny_write_count <= life.open_count);
    }

    /// Reverts one `deny_write`. Panics without a matching `deny_write`.
    pub fn allow_write(&self) {
        let mut life = self.life.lock().unwrap();
        assert!(life.deny_write_count > 0);
        assert!(life.deny_write_count <= life.open_count);
        life.deny_write_count -= 1;
    }

    /// Reads up to `buf.len()` bytes starting at byte `offset`. Returns the
    /// number of bytes read; short reads happen at the end of the file.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let record = self.record.read().unwrap();

        let mut bounce = Sector::new_zeroed();
        let mut offset = offset;
        let mut done = 0_usize;
        while done < buf.len() {
            let Some(sector) = tree::locate(&record, self.dev.as_ref(), offset)? else {
                break;
            };
            let sector_ofs = (offset as usize) % SECTOR_SIZE;
            let sector_left = SECTOR_SIZE - sector_ofs;
            let file_left = ((record.length as u64 - offset).min(SECTOR_SIZE as u64)) as usize;
            let chunk = (buf.len() - done).min(sector_left).min(file_left);

            if sector_ofs == 0 && chunk == SECTOR_SIZE {
                self.dev.read_sector(sector, &mut buf[done..done + SECTOR_SIZE])?;
            } else {
                self.dev.read_sector(sector, bounce.as_bytes_mut())?;
                buf[done..done + chunk]
                    .copy_from_slice(&bounce.as_bytes()[sector_ofs..sector_ofs + chunk]);
            }

            offset += chunk as u64;
            done += chunk;
        }

        Ok(done)
    }

    /// Writes `buf` at byte `offset`, growing the file when the range ends
    /// past the current length. Returns the number of bytes written: 0 when
    /// writes are denied or the allocator is out of sectors.
    pub fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        {
            let life = self.life.lock().unwrap();
            if life.deny_write_count > 0 {
                return Ok(0);
            }
        }

        let mut record = self.record.write().unwrap();
        let old_length = record.length as u64;
        let end = offset.saturating_add(buf.len() as u64);

        if end > old_length {
            if end > MAX_FILE_BYTES {
                return Err(ErrorKind::FileTooLarge.into());
            }
            match tree::grow(&mut record, self.dev.as_ref(), self.alloc.as_ref(), end) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::StorageFull => return Ok(0),
                Err(err) => return Err(err),
            }
            record.length = end as u32;
            // The record goes out before any data: a crash from here on
            // leaves the file at its new length, with zeroes where content
            // had not yet made it to the device.
            self.dev
                .write_sector(self.sector, record_to_sector(&record).as_bytes())?;
        }

        let mut bounce = Sector::new_zeroed();
        let mut offset = offset;
        let mut done = 0_usize;
        while done < buf.len() {
            let Some(sector) = tree::locate(&record, self.dev.as_ref(), offset)? else {
                break;
            };
            let sector_ofs = (offset as usize) % SECTOR_SIZE;
            let sector_left = SECTOR_SIZE - sector_ofs;
            let file_left = ((record.length as u64 - offset).min(SECTOR_SIZE as u64)) as usize;
            let chunk = (buf.len() - done).min(sector_left).min(file_left);

            if sector_ofs == 0 && chunk == SECTOR_SIZE {
                self.dev.write_sector(sector, &buf[done..done + SECTOR_SIZE])?;
            } else {
                // A sector that starts at or past the old end holds no data
                // worth reading back; stage those from zeroes.
                if (offset - sector_ofs as u64) < old_length {
                    self.dev.read_sector(sector, bounce.as_bytes_mut())?;
                } else {
                    bounce = Sector::new_zeroed();
                }
                bounce.as_bytes_mut()[sector_ofs..sector_ofs + chunk]
                    .copy_from_slice(&buf[done..done + chunk]);
                self.dev.write_sector(sector, bounce.as_bytes())?;
            }

            offset += chunk as u64;
            done += chunk;
        }

        Ok(done)
    }

    /// Returns the record's sector and its whole tree to the allocator.
    /// Called on the last close of a removed inode, when no other handle
    /// can reach it.
    pub(crate) fn release_storage(&self) -> Result<()> {
        let record = self.record.read().unwrap();
        self.alloc.release(self.sector, 1);
        tree::release(&record, self.dev.as_ref(), self.alloc.as_ref())
    }
}
