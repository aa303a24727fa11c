//! The indirection tree: resolving, growing and releasing the
//! direct/single-indirect/double-indirect sector map of one inode record.

use std::io::{ErrorKind, Result};

use super::*;

fn read_index_block(dev: &dyn BlockDevice, sector: u32) -> Result<IndexBlock> {
    let mut buf = Sector::new_zeroed();
    dev.read_sector(sector, buf.as_bytes_mut())?;
    Ok(*sector_get_index_block(&buf))
}

fn write_index_block(dev: &dyn BlockDevice, sector: u32, index: &IndexBlock) -> Result<()> {
    let mut buf = Sector::new_zeroed();
    *sector_get_index_block_mut(&mut buf) = *index;
    dev.write_sector(sector, buf.as_bytes())
}

/// One fresh sector from the allocator, zero-filled on the device.
fn fresh_zeroed_sector(dev: &dyn BlockDevice, alloc: &dyn BlockAllocator) -> Result<u32> {
    let sector = alloc.allocate(1)?;
    dev.write_sector(sector, Sector::new_zeroed().as_bytes())?;
    Ok(sector)
}

fn check_mapped(sector: u32) -> Result<u32> {
    if sector == NO_SECTOR {
        log::error!("inode record: unallocated pointer below the file length");
        return Err(ErrorKind::InvalidData.into());
    }
    Ok(sector)
}

/// Maps a byte offset within the file onto the device sector holding it.
/// Returns None at or past the end of the file.
pub(crate) fn locate(
    record: &InodeRecord,
    dev: &dyn BlockDevice,
    offset: u64,
) -> Result<Option<u32>> {
    if offset >= record.length as u64 {
        return Ok(None);
    }

    let idx = (offset as usize) / SECTOR_SIZE;
    if idx < DIRECT_PTRS {
        return check_mapped(record.direct[idx]).map(Some);
    }

    let idx = idx - DIRECT_PTRS;
    if idx < PTRS_PER_INDEX {
        let index = read_index_block(dev, check_mapped(record.single_indirect)?)?;
        return check_mapped(index.entries[idx]).map(Some);
    }

    // Both the level-1 slot and the leaf slot derive from the same
    // double-range index.
    let idx = idx - PTRS_PER_INDEX;
    if idx < DOUBLE_INDIRECT_PTRS {
        let top = read_index_block(dev, check_mapped(record.double_indirect)?)?;
        let level1 = check_mapped(top.entries[idx / PTRS_PER_INDEX])?;
        let index = read_index_block(dev, level1)?;
        return check_mapped(index.entries[idx % PTRS_PER_INDEX]).map(Some);
    }

    // The record claims a length beyond what the pointer ranges can map.
    log::error!(
        "inode record: length {} maps byte {offset} past the maximum file size",
        record.length
    );
    Err(ErrorKind::FileTooLarge.into())
}

/// Ensures the tree maps at least `ceil(target_length / SECTOR_SIZE)` leaf
/// sectors, all zero-filled on first allocation. Idempotent: populated slots
/// are counted and skipped, so growing an existing file (or retrying after a
/// failure) only allocates what is missing.
///
/// On allocator exhaustion the error surfaces immediately and sectors
/// obtained earlier in the same call stay allocated; they are picked up
/// again the next time the file grows this far.
pub(crate) fn grow(
    record: &mut InodeRecord,
    dev: &dyn BlockDevice,
    alloc: &dyn BlockAllocator,
    target_length: u64,
) -> Result<()> {
    if target_length > MAX_FILE_BYTES {
        return Err(ErrorKind::FileTooLarge.into());
    }

    let mut quota = (target_length as usize).div_ceil(SECTOR_SIZE);

    for slot in 0..quota.min(DIRECT_PTRS) {
        if record.direct[slot] == NO_SECTOR {
            record.direct[slot] = fresh_zeroed_sector(dev, alloc)?;
        }
    }
    quota = quota.saturating_sub(DIRECT_PTRS);
    if quota == 0 {
        return Ok(());
    }

    let count = quota.min(PTRS_PER_INDEX);
    grow_subtree(&mut record.single_indirect, count, 1, dev, alloc)?;
    quota -= count;
    if quota == 0 {
        return Ok(());
    }

    grow_subtree(&mut record.double_indirect, quota, 2, dev, alloc)
}

/// Grows one indirect subtree until it maps `quota` leaves. At height 1 the
/// index entries are the leaves themselves; at height 2 each entry is a
/// height-1 subtree covering up to PTRS_PER_INDEX leaves. The index block is
/// persisted after every entry that changes, so an interrupted call loses at
/// most the sectors it had not yet linked in.
fn grow_subtree(
    slot: &mut u32,
    quota: usize,
    height: u32,
    dev: &dyn BlockDevice,
    alloc: &dyn BlockAllocator,
) -> Result<()> {
    let unit = PTRS_PER_INDEX.pow(height - 1);
    debug_assert!(height == 1 || height == 2);
    debug_assert!(quota > 0 && quota <= unit * PTRS_PER_INDEX);

    if *slot == NO_SECTOR {
        *slot = fresh_zeroed_sector(dev, alloc)?;
    }
    let index_sector = *slot;
    let mut index = read_index_block(dev, index_sector)?;

    let mut remaining = quota;
    let mut child = 0_usize;
    while remaining > 0 {
        let chunk = remaining.min(unit);
        if height == 1 {
            if index.entries[child] == NO_SECTOR {
                index.entries[child] = fresh_zeroed_sector(dev, alloc)?;
                write_index_block(dev, index_sector, &index)?;
            }
        } else {
            let prev = index.entries[child];
            grow_subtree(&mut index.entries[child], chunk, height - 1, dev, alloc)?;
            if index.entries[child] != prev {
                write_index_block(dev, index_sector, &index)?;
            }
        }
        remaining -= chunk;
        child += 1;
    }

    Ok(())
}

/// Returns every sector reachable from the record's tree to the allocator,
/// leaves before the index blocks pointing at them. `record.length` is the
/// sole authority on how much of the tree is live: sectors orphaned by a
/// failed growth are not probed for.
pub(crate) fn release(
    record: &InodeRecord,
    dev: &dyn BlockDevice,
    alloc: &dyn BlockAllocator,
) -> Result<()> {
    let mut quota = sectors_for_bytes(record.length);

    for slot in 0..quota.min(DIRECT_PTRS) {
        alloc.release(record.direct[slot], 1);
    }
    quota = quota.saturating_sub(DIRECT_PTRS);
    if quota == 0 {
        return Ok(());
    }

    let count = quota.min(PTRS_PER_INDEX);
    release_subtree(record.single_indirect, count, 1, dev, alloc)?;
    quota -= count;
    if quota == 0 {
        return Ok(());
    }

    release_subtree(record.double_indirect, quota, 2, dev, alloc)
}

fn release_subtree(
    index_sector: u32,
    quota: usize,
    height: u32,
    dev: &dyn BlockDevice,
    alloc: &dyn BlockAllocator,
) -> Result<()> {
    let unit = PTRS_PER_INDEX.pow(height - 1);
    debug_assert!(quota > 0 && quota <= unit * PTRS_PER_INDEX);

    let index = read_index_block(dev, index_sector)?;

    let mut remaining = quota;
    let mut child = 0_usize;
    while remaining > 0 {
        let chunk = remaining.min(unit);
        if height == 1 {
            alloc.release(index.entries[child], 1);
        } else {
            release_subtree(index.entries[child], chunk, height - 1, dev, alloc)?;
        }
        remaining -= chunk;
        child += 1;
    }

    alloc.release(index_sector, 1);
    Ok(())
}
