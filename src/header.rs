// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Layout of the channel region: header, three guard sentinels, index ring,
// and data ring, all carved from one mapping via pointer arithmetic from a
// single base pointer. Mirrors ach_header_t / ach_index_t from
// original_source/src/ach.c, and reuses the teacher's chunk_storage.rs idiom
// of a #[repr(C)] header followed by a computed-offset trailing array rather
// than any owned Rust collection — this memory belongs to the OS mapping,
// not the Rust allocator.

use crate::sync::RawSync;

/// First four bytes of every region. Distinguishes a channel region from
/// garbage or a mismatched build.
pub const MAGIC: u32 = 0x4143_4831; // "ACH1"

pub const HEADER_GUARD: u64 = 0x4841_4445_525f_4731; // "HADER_G1" (header/index boundary)
pub const INDEX_GUARD: u64 = 0x494e_4458_5f47_5532; // "INDX_GU2" (index/data boundary)
pub const DATA_GUARD: u64 = 0x4441_5441_5f47_5533; // "DATA_GU3" (end of region)

pub const MAX_NAME_LEN: usize = 64;

/// Channel header. Lives at offset 0 of the mapped region.
#[repr(C)]
pub struct Header {
    pub magic: u32,
    pub name_len: u32,
    pub region_len: u64,
    pub name: [u8; MAX_NAME_LEN],
    pub sync: RawSync,
    pub index_cnt: u32,
    pub index_head: u32,
    pub index_free: u32,
    pub _pad: u32,
    pub data_head: u64,
    pub data_free: u64,
    pub data_size: u64,
    pub last_seq: u64,
}

/// One index-ring slot: describes one live (or empty, if `seq_num == 0`)
/// frame's position in the data ring.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct IndexSlot {
    pub seq_num: u64,
    pub size: u64,
    pub offset: u64,
}

impl Header {
    pub const fn name(&self) -> &[u8] {
        // Safe projection; caller slices to `name_len` for the actual string.
        &self.name
    }
}

/// Computes the total region size for `index_cnt` slots of max payload
/// `max_frame_size`, matching §4.1: `sizeof(header) + index_cnt*sizeof(slot)
/// + data_size + 3*sizeof(guard)`.
pub fn region_size(index_cnt: u32, max_frame_size: usize) -> usize {
    let data_size = index_cnt as usize * max_frame_size;
    std::mem::size_of::<Header>()
        + std::mem::size_of::<u64>() // header guard
        + index_cnt as usize * std::mem::size_of::<IndexSlot>()
        + std::mem::size_of::<u64>() // index guard
        + data_size
        + std::mem::size_of::<u64>() // data guard
}

/// Typed, non-owning view over one mapped channel region. All pointers are
/// derived from `base` on every call rather than cached, so the view stays
/// valid across remaps within the same process.
pub struct RegionView {
    base: *mut u8,
}

impl RegionView {
    /// # Safety
    /// `base` must point to a region of at least `region_size(header.index_cnt,
    /// ...)` bytes, laid out as described in §4.1, for the lifetime of the
    /// returned view.
    pub unsafe fn new(base: *mut u8) -> Self {
        Self { base }
    }

    pub fn base(&self) -> *mut u8 {
        self.base
    }

    pub fn header(&self) -> &Header {
        unsafe { &*(self.base as *const Header) }
    }

    pub fn header_mut(&self) -> &mut Header {
        unsafe { &mut *(self.base as *mut Header) }
    }

    fn header_guard_offset(&self) -> usize {
        std::mem::size_of::<Header>()
    }

    fn index_offset(&self) -> usize {
        self.header_guard_offset() + std::mem::size_of::<u64>()
    }

    fn index_guard_offset(&self) -> usize {
        self.index_offset()
            + self.header().index_cnt as usize * std::mem::size_of::<IndexSlot>()
    }

    fn data_offset(&self) -> usize {
        self.index_guard_offset() + std::mem::size_of::<u64>()
    }

    fn data_guard_offset(&self) -> usize {
        self.data_offset() + self.header().data_size as usize
    }

    pub fn header_guard(&self) -> &u64 {
        unsafe { &*(self.base.add(self.header_guard_offset()) as *const u64) }
    }

    pub fn header_guard_mut(&self) -> &mut u64 {
        unsafe { &mut *(self.base.add(self.header_guard_offset()) as *mut u64) }
    }

    pub fn index_guard(&self) -> &u64 {
        unsafe { &*(self.base.add(self.index_guard_offset()) as *const u64) }
    }

    pub fn index_guard_mut(&self) -> &mut u64 {
        unsafe { &mut *(self.base.add(self.index_guard_offset()) as *mut u64) }
    }

    pub fn data_guard(&self) -> &u64 {
        unsafe { &*(self.base.add(self.data_guard_offset()) as *const u64) }
    }

    pub fn data_guard_mut(&self) -> &mut u64 {
        unsafe { &mut *(self.base.add(self.data_guard_offset()) as *mut u64) }
    }

    /// Slot `i` of the index ring (`i < index_cnt`).
    pub fn slot(&self, i: u32) -> &IndexSlot {
        unsafe {
            let p = self.base.add(self.index_offset()) as *const IndexSlot;
            &*p.add(i as usize)
        }
    }

    pub fn slot_mut(&self, i: u32) -> &mut IndexSlot {
        unsafe {
            let p = self.base.add(self.index_offset()) as *mut IndexSlot;
            &mut *p.add(i as usize)
        }
    }

    /// The full data ring as a mutable byte slice.
    pub fn data(&self) -> &mut [u8] {
        unsafe {
            let p = self.base.add(self.data_offset());
            std::slice::from_raw_parts_mut(p, self.header().data_size as usize)
        }
    }

    /// Validates the magic tag and all three guard sentinels. Called at the
    /// start of every public operation per §4.1's invariant check.
    pub fn check_guards(&self) -> Result<(), crate::error::ChannelError> {
        if self.header().magic != MAGIC {
            return Err(crate::error::ChannelError::BadShmFile);
        }
        if *self.header_guard() != HEADER_GUARD
            || *self.index_guard() != INDEX_GUARD
            || *self.data_guard() != DATA_GUARD
        {
            return Err(crate::error::ChannelError::Corrupt);
        }
        Ok(())
    }
}

// Safety: the region this view points at is either a process-shared mapping
// (named channel) or explicitly synchronized by the embedded mutex
// (anonymous channel); `RegionView` itself is just a set of derived pointers.
unsafe impl Send for RegionView {}
unsafe impl Sync for RegionView {}
