// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Channel operations: create/open/publish/receive/flush/cancel/close/unlink/
// chmod. Built on header::RegionView (layout), sync::RawSync/WinSyncHandles
// (locking), and ring:: (storage). Grounded on original_source/src/ach.c's
// ach_create / ach_open / ach_put / ach_get / ach_flush / ach_cancel /
// ach_close / ach_unlink, adapted to the teacher's error-propagation and
// logging idiom throughout.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::attrs::{CancelAttrs, CreateAttrs, OpenAttrs, ReceiveOptions};
use crate::error::{ChannelError, ChannelResult, ReceiveOutcome};
use crate::header::{self, RegionView};
use crate::region_io;

/// Prefix applied to every channel name before it becomes an OS object name,
/// so channel namespaces never collide with unrelated shared-memory users.
const CHANNEL_PREFIX: &str = "ach-chan-";

fn validate_name(name: &str) -> ChannelResult<()> {
    if name.is_empty() || name.len() >= header::MAX_NAME_LEN || name.starts_with('.') {
        return Err(ChannelError::InvalidName(name.to_string()));
    }
    let ok = name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if !ok {
        return Err(ChannelError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn os_name(name: &str) -> String {
    crate::shm_name::make_shm_name(&format!("{CHANNEL_PREFIX}{name}"))
}

#[cfg(unix)]
enum Backing {
    Named {
        mapping: region_io::posix::NamedMapping,
    },
    Anonymous(Box<[u8]>),
}

#[cfg(windows)]
enum Backing {
    Named {
        mapping: region_io::windows::NamedMapping,
    },
    Anonymous(Box<[u8]>),
}

impl Backing {
    fn base(&self) -> *mut u8 {
        match self {
            #[cfg(unix)]
            Backing::Named { mapping } => mapping.base,
            #[cfg(windows)]
            Backing::Named { mapping } => mapping.base,
            Backing::Anonymous(b) => b.as_ptr() as *mut u8,
        }
    }
}

/// A handle to one end of a latest-message channel.
///
/// Not `Clone`: each handle owns its own read cursor (`seq_num`,
/// `next_index`). Call `canceler()` to obtain a shareable object another
/// thread can use to interrupt this handle's blocked `receive`.
pub struct Channel {
    name: Option<String>,
    backing: Backing,
    seq_num: u64,
    next_index: u32,
    cancel: Arc<AtomicBool>,
    poisoned: Cell<bool>,
    #[cfg(windows)]
    win_sync: Arc<crate::sync::WinSyncHandles>,
    closed: bool,
}

/// A lightweight, shareable object that can interrupt a `Channel`'s blocked
/// `receive`, from another thread or (in the `async_unsafe: false` default)
/// from a signal handler.
pub struct Canceler {
    cancel: Arc<AtomicBool>,
    #[cfg(unix)]
    view: RegionView,
    #[cfg(windows)]
    win_sync: Arc<crate::sync::WinSyncHandles>,
}

impl Canceler {
    pub fn cancel(&self, attrs: &CancelAttrs) -> ChannelResult<()> {
        self.cancel.store(true, Ordering::SeqCst);
        if attrs.async_unsafe {
            self.direct()
        } else {
            self.forked()
        }
    }

    #[cfg(unix)]
    fn direct(&self) -> ChannelResult<()> {
        self.view.header().sync.lock().map_err(ChannelError::from)?;
        self.view.header().sync.unlock().map_err(ChannelError::from)?;
        self.view
            .header()
            .sync
            .broadcast()
            .map_err(ChannelError::from)
    }

    /// Forks a throwaway child to perform the lock/unlock/broadcast and
    /// `_exit`s immediately, so the calling thread never blocks and never
    /// calls anything non-async-signal-safe itself. Reaped from a detached
    /// background thread so it never becomes a zombie.
    #[cfg(unix)]
    fn forked(&self) -> ChannelResult<()> {
        let base = self.view.base();
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        if pid == 0 {
            let view = unsafe { RegionView::new(base) };
            let _ = view.header().sync.lock();
            let _ = view.header().sync.unlock();
            let _ = view.header().sync.broadcast();
            unsafe { libc::_exit(0) };
        }
        std::thread::spawn(move || {
            let mut status: libc::c_int = 0;
            unsafe { libc::waitpid(pid, &mut status, 0) };
        });
        Ok(())
    }

    #[cfg(windows)]
    fn direct(&self) -> ChannelResult<()> {
        self.win_sync.lock().map_err(ChannelError::from)?;
        self.win_sync.unlock().map_err(ChannelError::from)?;
        self.win_sync.broadcast().map_err(ChannelError::from)
    }

    /// Windows has no `fork`; a spawned helper thread is the portable
    /// substitute, matching the allowance already made for anonymous-channel
    /// synchronization on this platform.
    #[cfg(windows)]
    fn forked(&self) -> ChannelResult<()> {
        let win_sync = Arc::clone(&self.win_sync);
        std::thread::spawn(move || {
            let _ = win_sync.lock();
            let _ = win_sync.unlock();
            let _ = win_sync.broadcast();
        });
        Ok(())
    }
}

impl Channel {
    fn view(&self) -> RegionView {
        unsafe { RegionView::new(self.backing.base()) }
    }

    fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    #[cfg(unix)]
    fn raw_lock(&self) -> ChannelResult<()> {
        self.view().header().sync.lock().map(|_| ()).map_err(ChannelError::from)
    }

    #[cfg(unix)]
    fn raw_unlock(&self) -> ChannelResult<()> {
        self.view().header().sync.unlock().map_err(ChannelError::from)
    }

    #[cfg(unix)]
    fn raw_wait(&self, deadline: Option<SystemTime>) -> ChannelResult<bool> {
        self.view().header().sync.wait(deadline).map_err(ChannelError::from)
    }

    #[cfg(unix)]
    fn raw_broadcast(&self) -> ChannelResult<()> {
        self.view().header().sync.broadcast().map_err(ChannelError::from)
    }

    #[cfg(windows)]
    fn raw_lock(&self) -> ChannelResult<()> {
        self.win_sync.lock().map(|_| ()).map_err(ChannelError::from)
    }

    #[cfg(windows)]
    fn raw_unlock(&self) -> ChannelResult<()> {
        self.win_sync.unlock().map_err(ChannelError::from)
    }

    #[cfg(windows)]
    fn raw_wait(&self, deadline: Option<SystemTime>) -> ChannelResult<bool> {
        self.win_sync.wait(deadline).map_err(ChannelError::from)
    }

    #[cfg(windows)]
    fn raw_broadcast(&self) -> ChannelResult<()> {
        self.win_sync.broadcast().map_err(ChannelError::from)
    }

    /// Checks the dirty flag (and this handle's own poison state)
    /// immediately after a successful lock acquisition — including each
    /// re-acquisition after a condvar wake, not just the first. A writer
    /// clears the flag before unlocking and broadcasting, so observing it
    /// set while holding the lock means a prior owner died mid-write.
    fn check_after_lock(&self) -> ChannelResult<()> {
        if self.poisoned.get() || self.view().header().sync.dirty() {
            self.poisoned.set(true);
            let _ = self.raw_unlock();
            return Err(ChannelError::Corrupt);
        }
        Ok(())
    }

    fn lock_write(&self) -> ChannelResult<()> {
        self.raw_lock()?;
        self.check_after_lock()?;
        self.view().header_mut().sync.set_dirty(true);
        Ok(())
    }

    fn unlock_write(&self) -> ChannelResult<()> {
        self.view().header_mut().sync.set_dirty(false);
        self.raw_unlock()?;
        self.raw_broadcast()
    }

    fn lock_read_wait(&self, wait: bool, deadline: Option<SystemTime>) -> ChannelResult<()> {
        self.raw_lock()?;
        self.check_after_lock()?;
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                let _ = self.raw_unlock();
                return Err(ChannelError::Canceled);
            }
            if !wait || self.seq_num != self.view().header().last_seq {
                return Ok(());
            }
            let woke = self.raw_wait(deadline)?;
            if !woke {
                let _ = self.raw_unlock();
                return Err(ChannelError::Timeout);
            }
            self.check_after_lock()?;
        }
    }

    fn unlock_read(&self) -> ChannelResult<()> {
        self.raw_unlock()
    }

    /// Creates a new channel. `attrs.truncate` replaces an existing named
    /// channel instead of failing with `AlreadyExists`; `attrs.map_anon`
    /// allocates a private, in-process region instead of a named mapping.
    pub fn create(
        name: &str,
        frame_count: u32,
        max_frame_size: usize,
        attrs: &CreateAttrs,
    ) -> ChannelResult<Channel> {
        validate_name(name)?;
        if frame_count == 0 {
            return Err(ChannelError::InvalidArgument("frame_count must be nonzero"));
        }
        if max_frame_size == 0 {
            return Err(ChannelError::InvalidArgument(
                "max_frame_size must be nonzero",
            ));
        }
        let total = header::region_size(frame_count, max_frame_size);
        let shared = !attrs.map_anon;

        let backing = if attrs.map_anon {
            Backing::Anonymous(vec![0u8; total].into_boxed_slice())
        } else {
            let mapped_name = os_name(name);
            #[cfg(unix)]
            {
                if attrs.truncate {
                    region_io::posix::unlink(&mapped_name)?;
                }
                Backing::Named {
                    mapping: region_io::posix::create(&mapped_name, total)?,
                }
            }
            #[cfg(windows)]
            {
                // Windows has no persistent unlink; `truncate` here only
                // suppresses the AlreadyExists error the Win32 call would
                // otherwise surface when a handle is still held elsewhere.
                let mapping = match region_io::windows::create(&mapped_name, total) {
                    Err(ChannelError::AlreadyExists) if attrs.truncate => {
                        region_io::windows::create(&mapped_name, total)?
                    }
                    other => other?,
                };
                Backing::Named { mapping }
            }
        };

        let base = backing.base();
        unsafe { std::ptr::write_bytes(base, 0, total) };
        let view = unsafe { RegionView::new(base) };
        {
            let h = view.header_mut();
            h.magic = header::MAGIC;
            let name_bytes = name.as_bytes();
            let n = name_bytes.len().min(header::MAX_NAME_LEN);
            h.name[..n].copy_from_slice(&name_bytes[..n]);
            h.name_len = n as u32;
            h.region_len = total as u64;
            h.index_cnt = frame_count;
            h.index_head = 0;
            h.index_free = frame_count;
            h.data_head = 0;
            h.data_size = frame_count as u64 * max_frame_size as u64;
            h.data_free = h.data_size;
            h.last_seq = 0;
            unsafe { h.sync.init(shared, attrs.clock)? };
        }
        *view.header_guard_mut() = header::HEADER_GUARD;
        *view.index_guard_mut() = header::INDEX_GUARD;
        *view.data_guard_mut() = header::DATA_GUARD;

        log::debug!(
            "channel '{name}' created ({frame_count} frames x {max_frame_size} bytes, anon={})",
            attrs.map_anon
        );

        #[cfg(windows)]
        let win_sync = Arc::new(crate::sync::WinSyncHandles::open(if attrs.map_anon {
            None
        } else {
            Some(&os_name(name))
        })?);

        Ok(Channel {
            name: if attrs.map_anon {
                None
            } else {
                Some(name.to_string())
            },
            backing,
            seq_num: 0,
            next_index: 1,
            cancel: Arc::new(AtomicBool::new(false)),
            poisoned: Cell::new(false),
            #[cfg(windows)]
            win_sync,
            closed: false,
        })
    }

    /// Opens an existing named channel. Anonymous channels cannot be opened
    /// by name — they exist only within the process that created them.
    pub fn open(name: &str, _attrs: &OpenAttrs) -> ChannelResult<Channel> {
        validate_name(name)?;
        let mapped_name = os_name(name);
        let header_size = std::mem::size_of::<header::Header>();

        #[cfg(unix)]
        let backing = Backing::Named {
            mapping: region_io::posix::open_discover(&mapped_name, header_size)?,
        };
        #[cfg(windows)]
        let backing = Backing::Named {
            mapping: region_io::windows::open_discover(&mapped_name, header_size)?,
        };

        let view = unsafe { RegionView::new(backing.base()) };
        view.check_guards()?;

        log::debug!("channel '{name}' opened");

        #[cfg(windows)]
        let win_sync = Arc::new(crate::sync::WinSyncHandles::open(Some(&mapped_name))?);

        Ok(Channel {
            name: Some(name.to_string()),
            backing,
            seq_num: 0,
            next_index: 1,
            cancel: Arc::new(AtomicBool::new(false)),
            poisoned: Cell::new(false),
            #[cfg(windows)]
            win_sync,
            closed: false,
        })
    }

    /// Publishes a frame. If the ring has no room, the oldest frames are
    /// evicted first until `payload` fits.
    pub fn publish(&mut self, payload: &[u8]) -> ChannelResult<()> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        let view = self.view();
        view.check_guards()?;
        if payload.len() as u64 > view.header().data_size {
            return Err(ChannelError::Overflow {
                required: payload.len(),
            });
        }

        self.lock_write()?;
        let result = crate::ring::publish(&view, payload);
        let unlock_result = self.unlock_write();
        result?;
        unlock_result?;

        log::trace!(
            "channel '{}' published {} bytes (seq {})",
            self.display_name(),
            payload.len(),
            view.header().last_seq
        );
        Ok(())
    }

    /// Receives the next frame per `options`, blocking until `deadline` if
    /// `options.with_wait(true)` was set and no frame is yet available.
    pub fn receive(
        &mut self,
        buf: &mut [u8],
        deadline: Option<SystemTime>,
        options: ReceiveOptions,
    ) -> ChannelResult<ReceiveOutcome> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        let view = self.view();
        view.check_guards()?;

        self.lock_read_wait(options.wait, deadline)?;

        let last_seq = view.header().last_seq;
        if last_seq == 0 || (self.seq_num == last_seq && !options.copy) {
            let _ = self.unlock_read();
            return Err(ChannelError::StaleFrames);
        }

        let (slot_idx, missed) =
            crate::ring::choose_slot(&view, self.seq_num, self.next_index, options.last);
        let copy_result = crate::ring::copy_out(&view, slot_idx, self.seq_num, buf);
        let unlock_result = self.unlock_read();

        let (len, new_seq, next_index) = copy_result?;
        unlock_result?;
        self.seq_num = new_seq;
        self.next_index = next_index;

        log::trace!(
            "channel '{}' received {len} bytes (seq {new_seq}, missed={missed})",
            self.display_name()
        );
        Ok(ReceiveOutcome {
            len,
            missed_frame: missed,
        })
    }

    /// Advances this handle's cursor to the newest frame without copying
    /// any payload, so a subsequent `receive` without `WAIT` reports
    /// `StaleFrames` rather than delivering a backlog entry.
    pub fn flush(&mut self) -> ChannelResult<()> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        let view = self.view();
        view.check_guards()?;
        self.lock_read_wait(false, None)?;
        self.seq_num = view.header().last_seq;
        self.next_index = view.header().index_head;
        self.unlock_read()
    }

    /// Returns a shareable object that can interrupt this handle's blocked
    /// `receive` from another thread.
    pub fn canceler(&self) -> Canceler {
        Canceler {
            cancel: Arc::clone(&self.cancel),
            #[cfg(unix)]
            view: self.view(),
            #[cfg(windows)]
            win_sync: Arc::clone(&self.win_sync),
        }
    }

    /// Interrupts this handle's currently (or next) blocked `receive`.
    pub fn cancel(&self, attrs: &CancelAttrs) -> ChannelResult<()> {
        self.canceler().cancel(attrs)
    }

    /// Changes the permission bits on the channel's backing file. No-op on
    /// Windows and an error for anonymous channels.
    pub fn chmod(&self, mode: u32) -> ChannelResult<()> {
        match &self.backing {
            #[cfg(unix)]
            Backing::Named { mapping } => region_io::posix::chmod(mapping, mode),
            #[cfg(windows)]
            Backing::Named { mapping } => region_io::windows::chmod(mapping, mode),
            Backing::Anonymous(_) => Err(ChannelError::InvalidArgument(
                "chmod requires a named channel",
            )),
        }
    }

    /// A short diagnostic dump of the channel's header state, for logging
    /// and ad-hoc inspection — not a stable machine-readable format.
    pub fn dump(&self) -> String {
        let view = self.view();
        let h = view.header();
        format!(
            "channel {:?}: index_cnt={} index_head={} index_free={} data_head={} data_free={} data_size={} last_seq={} dirty={}",
            self.name,
            h.index_cnt,
            h.index_head,
            h.index_free,
            h.data_head,
            h.data_free,
            h.data_size,
            h.last_seq,
            h.sync.dirty(),
        )
    }

    fn close_impl(&mut self) -> ChannelResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let view = self.view();
        view.check_guards()?;
        match &self.backing {
            #[cfg(unix)]
            Backing::Named { mapping } => region_io::posix::close(mapping)?,
            #[cfg(windows)]
            Backing::Named { mapping } => region_io::windows::close(mapping)?,
            // Freed when the Box<[u8]> drops; the closing handle owned the
            // only reference to an anonymous channel's storage.
            Backing::Anonymous(_) => {}
        }
        Ok(())
    }

    /// Unmaps the channel. The underlying named region (if any) survives
    /// until `unlink` is called — other handles may still have it mapped.
    pub fn close(mut self) -> ChannelResult<()> {
        self.close_impl()
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dump())
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close_impl() {
                log::warn!(
                    "channel '{}' dropped without explicit close, cleanup failed: {e}",
                    self.name.as_deref().unwrap_or("<anonymous>")
                );
            }
        }
    }
}

/// Removes the named shared-memory file backing a channel. The region
/// remains live for any process that still has it mapped.
pub fn unlink(name: &str) -> ChannelResult<()> {
    validate_name(name)?;
    let mapped_name = os_name(name);
    #[cfg(unix)]
    return region_io::posix::unlink(&mapped_name);
    #[cfg(windows)]
    return region_io::windows::unlink(&mapped_name);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("bad/slash").is_err());
        assert!(validate_name("ok-name_1.2").is_ok());
    }

    #[test]
    fn create_open_publish_receive_roundtrip() {
        let name = "chtest-roundtrip";
        let _ = unlink(name);
        let mut writer =
            Channel::create(name, 4, 64, &CreateAttrs::new().with_truncate(true)).unwrap();
        let mut reader = Channel::open(name, &OpenAttrs::new()).unwrap();

        writer.publish(b"hello").unwrap();
        let mut buf = [0u8; 64];
        let outcome = reader
            .receive(&mut buf, None, ReceiveOptions::new())
            .unwrap();
        assert_eq!(&buf[..outcome.len], b"hello");
        assert!(!outcome.missed_frame);

        let stale = reader.receive(&mut buf, None, ReceiveOptions::new());
        assert!(matches!(stale, Err(ChannelError::StaleFrames)));

        writer.close().unwrap();
        reader.close().unwrap();
        unlink(name).unwrap();
    }

    #[test]
    fn overflow_reports_required_size() {
        let mut writer = Channel::create(
            "chtest-overflow",
            2,
            8,
            &CreateAttrs::new().with_map_anon(true),
        )
        .unwrap();
        let err = writer.publish(&[0u8; 9]).unwrap_err();
        assert!(matches!(err, ChannelError::Overflow { required: 9 }));
    }

    #[test]
    fn small_buffer_on_receive_reports_overflow() {
        let mut ch = Channel::create(
            "chtest-recv-overflow",
            2,
            16,
            &CreateAttrs::new().with_map_anon(true),
        )
        .unwrap();
        ch.publish(b"0123456789").unwrap();
        let mut small = [0u8; 4];
        let err = ch
            .receive(&mut small, None, ReceiveOptions::new())
            .unwrap_err();
        assert!(matches!(err, ChannelError::Overflow { required: 10 }));
    }

    #[test]
    fn anonymous_channel_skips_shared_memory() {
        let ch = Channel::create(
            "chtest-anon",
            2,
            16,
            &CreateAttrs::new().with_map_anon(true),
        )
        .unwrap();
        assert!(ch.chmod(0o600).is_err());
    }

    #[test]
    fn cancel_interrupts_blocked_receive() {
        let name = "chtest-cancel";
        let _ = unlink(name);
        let mut writer =
            Channel::create(name, 2, 32, &CreateAttrs::new().with_truncate(true)).unwrap();
        let mut reader = Channel::open(name, &OpenAttrs::new()).unwrap();
        let canceler = reader.canceler();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 32];
            reader.receive(&mut buf, None, ReceiveOptions::new().with_wait(true))
        });
        std::thread::sleep(std::time::Duration::from_millis(50));
        canceler.cancel(&CancelAttrs::new()).unwrap();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(ChannelError::Canceled)));

        writer.close().unwrap();
        unlink(name).unwrap();
    }
}
