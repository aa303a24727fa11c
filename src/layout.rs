//! On-disk data structures, exactly as they are on the permanent storage.
//!
//! An inode record occupies exactly one sector. File content is addressed
//! through three pointer ranges:
//! - 123 direct pointers (file sectors 0..123);
//! - one single-indirect pointer to an index block of 128 leaf pointers
//!   (file sectors 123..251);
//! - one double-indirect pointer to an index block whose 128 entries are
//!   single-indirect index blocks (file sectors 251..16635).
//!
//! Index blocks have no header and the same shape at both indirection
//! levels. A pointer value of 0 means "not allocated": sector 0 is reserved
//! by the device and never holds file or index data.

use super::*;

/// The number of direct sector pointers in an inode record. Chosen so that
/// the record fills its sector exactly.
pub const DIRECT_PTRS: usize = 123;

/// The number of sector pointers in one index block.
pub const PTRS_PER_INDEX: usize = SECTOR_SIZE / core::mem::size_of::<u32>();
const _: () = assert!(PTRS_PER_INDEX == 128);

/// Leaf capacity of the double-indirect subtree.
pub const DOUBLE_INDIRECT_PTRS: usize = PTRS_PER_INDEX * PTRS_PER_INDEX;
const _: () = assert!(DOUBLE_INDIRECT_PTRS == 16384);

pub const MAX_FILE_SECTORS: usize = DIRECT_PTRS + PTRS_PER_INDEX + DOUBLE_INDIRECT_PTRS;
const _: () = assert!(MAX_FILE_SECTORS == 16635);

pub const MAX_FILE_BYTES: u64 = (MAX_FILE_SECTORS * SECTOR_SIZE) as u64;
const _: () = assert!(MAX_FILE_BYTES == 8_517_120);

/// "INOD".
pub const INODE_MAGIC: u32 = 0x494e_4f44;

/// The reserved "not allocated" pointer value.
pub const NO_SECTOR: u32 = 0;

/// The on-disk inode record.
#[derive(Clone, Copy)]
#[repr(C)]
pub(crate) struct InodeRecord {
    /// File size in bytes. Authoritative: every algorithm in this crate
    /// trusts it over the raw state of the pointer tree.
    pub length: u32,
    /// INODE_MAGIC, written at creation.
    pub magic: u32,
    /// Non-zero for directories. Opaque to this crate.
    pub is_dir: u32,
    pub direct: [u32; DIRECT_PTRS],
    pub single_indirect: u32,
    pub double_indirect: u32,
}

unsafe impl plain::Plain for InodeRecord {}

const _: () = assert!(core::mem::size_of::<InodeRecord>() == SECTOR_SIZE);
const _: () = assert!(core::mem::offset_of!(InodeRecord, magic) == 4);
const _: () = assert!(core::mem::offset_of!(InodeRecord, direct) == 12);
const _: () = assert!(core::mem::offset_of!(InodeRecord, single_indirect) == 504);
const _: () = assert!(core::mem::offset_of!(InodeRecord, double_indirect) == 508);

impl InodeRecord {
    pub fn new(is_dir: bool) -> Self {
        Self {
            length: 0,
            magic: INODE_MAGIC,
            is_dir: is_dir as u32,
            direct: [NO_SECTOR; DIRECT_PTRS],
            single_indirect: NO_SECTOR,
            double_indirect: NO_SECTOR,
        }
    }
}

/// One level of the indirection tree. Both the single-indirect block and
/// every block under the double-indirect pointer have this shape.
#[derive(Clone, Copy)]
#[repr(C)]
pub(crate) struct IndexBlock {
    pub entries: [u32; PTRS_PER_INDEX],
}

unsafe impl plain::Plain for IndexBlock {}

const _: () = assert!(core::mem::size_of::<IndexBlock>() == SECTOR_SIZE);

/// The number of leaf sectors a file of `length` bytes occupies.
pub(crate) fn sectors_for_bytes(length: u32) -> usize {
    (length as usize).div_ceil(SECTOR_SIZE)
}

pub(crate) fn sector_get_record(sector: &Sector) -> &InodeRecord {
    sector.get_at_offset(0)
}

pub(crate) fn sector_get_record_mut(sector: &mut Sector) -> &mut InodeRecord {
    sector.get_mut_at_offset(0)
}

pub(crate) fn sector_get_index_block(sector: &Sector) -> &IndexBlock {
    sector.get_at_offset(0)
}

pub(crate) fn sector_get_index_block_mut(sector: &mut Sector) -> &mut IndexBlock {
    sector.get_mut_at_offset(0)
}

pub(crate) fn record_to_sector(record: &InodeRecord) -> Sector {
    let mut sector = Sector::new_zeroed();
    *sector_get_record_mut(&mut sector) = *record;
    sector
}
