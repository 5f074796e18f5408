// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Ring storage engine: circular index and wrap-around data buffer, with
// oldest-first eviction on publish. Grounded on original_source/src/ach.c's
// ach_get_from_offset (copy-out with wraparound memcpy splitting) and
// ach_put (free-until-data_free-suffices eviction loop). Operates on a
// RegionView under the caller's already-held lock; this module has no
// locking of its own.

use crate::error::{ChannelError, ChannelResult};
use crate::header::RegionView;

/// `(index_head + index_free) mod index_cnt` — the oldest live slot.
pub fn oldest_index(view: &RegionView) -> u32 {
    let h = view.header();
    (h.index_head + h.index_free) % h.index_cnt
}

/// `(index_head + index_cnt - 1) mod index_cnt` — the most recently written
/// slot. Only meaningful when `last_seq > 0`.
pub fn last_index(view: &RegionView) -> u32 {
    let h = view.header();
    (h.index_head + h.index_cnt - 1) % h.index_cnt
}

/// Copies the frame at slot `k` into `dst`. Preconditions: the write/read
/// lock is held and slot `k` is in use (`seq_num != 0`).
///
/// On success, advances `client_seq` to the slot's sequence number and
/// returns `(bytes_copied, client_seq, next_index)`. On `Overflow`, no bytes
/// are copied and the channel state (including `client_seq`) is unchanged.
pub fn copy_out(
    view: &RegionView,
    k: u32,
    client_seq: u64,
    dst: &mut [u8],
) -> ChannelResult<(usize, u64, u32)> {
    let slot = *view.slot(k);
    if client_seq > slot.seq_num {
        return Err(ChannelError::Bug(
            "client seq_num exceeds slot seq_num under read lock",
        ));
    }
    let size = slot.size as usize;
    if size > dst.len() {
        return Err(ChannelError::Overflow { required: size });
    }

    let data = view.data();
    let data_size = data.len();
    let offset = slot.offset as usize;
    if offset + size > data_size {
        let first = data_size - offset;
        dst[..first].copy_from_slice(&data[offset..data_size]);
        dst[first..size].copy_from_slice(&data[..size - first]);
    } else {
        dst[..size].copy_from_slice(&data[offset..offset + size]);
    }

    let next_index = (k + 1) % view.header().index_cnt;
    Ok((size, slot.seq_num, next_index))
}

/// Publishes `payload` into the ring. Preconditions: the write lock is held
/// and `payload.len() <= data_size` (checked by the caller before locking,
/// per §4.3 — an over-length payload must never reach here).
pub fn publish(view: &RegionView, payload: &[u8]) -> ChannelResult<()> {
    let len = payload.len() as u64;
    let h = view.header();
    if len > h.data_size {
        return Err(ChannelError::Overflow {
            required: len as usize,
        });
    }

    let target = view.header().index_head;

    // Step 1: guarantee a free index slot at index_head.
    if view.header().index_free == 0 {
        free_slot(view, view.header().index_head);
    }

    // Step 2: evict oldest-first until there's room for the payload.
    while view.header().data_free < len {
        let oldest = oldest_index(view);
        if oldest == view.header().index_head {
            return Err(ChannelError::Bug(
                "ran out of evictable slots before data_free sufficed",
            ));
        }
        free_slot(view, oldest);
    }

    // Step 3: copy payload into the data ring, wrapping if necessary.
    let data_head = view.header().data_head as usize;
    let data = view.data();
    let data_size = data.len();
    let size = payload.len();
    if data_head + size > data_size {
        let first = data_size - data_head;
        data[data_head..data_size].copy_from_slice(&payload[..first]);
        data[..size - first].copy_from_slice(&payload[first..]);
    } else {
        data[data_head..data_head + size].copy_from_slice(payload);
    }

    // Step 4: stamp the slot.
    let h = view.header_mut();
    h.last_seq += 1;
    let new_seq = h.last_seq;
    let slot = view.slot_mut(target);
    slot.seq_num = new_seq;
    slot.size = len;
    slot.offset = data_head as u64;

    // Step 5: advance cursors.
    let h = view.header_mut();
    h.data_head = (h.data_head + len) % h.data_size.max(1);
    h.data_free -= len;
    h.index_head = (h.index_head + 1) % h.index_cnt;
    h.index_free -= 1;

    Ok(())
}

/// Returns slot `i`'s bytes to `data_free` and clears it (`seq_num = 0`).
fn free_slot(view: &RegionView, i: u32) {
    let size = view.slot(i).size;
    {
        let slot = view.slot_mut(i);
        slot.seq_num = 0;
        slot.size = 0;
        slot.offset = 0;
    }
    let h = view.header_mut();
    h.data_free += size;
    h.index_free += 1;
}

/// Slot-selection logic for `receive`, per §4.4 step 4.
///
/// Returns `(slot_index, missed_frame)`.
pub fn choose_slot(view: &RegionView, client_seq: u64, next_index: u32, last: bool) -> (u32, bool) {
    let h = view.header();
    let read_index = if last {
        last_index(view)
    } else {
        let expected = view.slot(next_index);
        if expected.seq_num == client_seq + 1 {
            next_index
        } else if client_seq == h.last_seq {
            // Only reachable under COPY (the caller already filtered
            // STALE_FRAMES otherwise); re-deliver the newest frame.
            last_index(view)
        } else {
            // The client fell behind: its next expected sequence was evicted.
            oldest_index(view)
        }
    };
    let missed = view.slot(read_index).seq_num > client_seq + 1;
    (read_index, missed)
}
