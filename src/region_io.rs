// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Raw mapping/unmapping of a named channel region. Deliberately separate
// from shm.rs/platform::PlatformShm: those implement cpp-ipc's convention of
// an owning, ref-counted mapping that auto-unlinks when the last local
// handle drops. This spec's lifecycle is the opposite — a named region
// persists until an explicit `unlink`, independent of how many handles have
// mapped and unmapped it — so the region is opened/closed here directly
// against the OS, grounded on original_source/src/ach.c's
// shmfile_for_channel_name / fd_for_channel_name and its mmap/munmap/
// shm_unlink calls, with a bounded EINTR retry on the syscalls §7 names
// (`ftruncate`, `close`, `open`).

use std::ffi::CString;
use std::io;

use crate::error::{ChannelError, ChannelResult};

const EINTR_RETRY_LIMIT: u32 = 8;

#[cfg(unix)]
fn retry_eintr<T>(mut f: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if e.raw_os_error() == Some(libc::EINTR) && attempts < EINTR_RETRY_LIMIT => {
                attempts += 1;
                continue;
            }
            other => return other,
        }
    }
}

#[cfg(unix)]
pub mod posix {
    use super::*;

    pub struct NamedMapping {
        pub fd: i32,
        pub base: *mut u8,
        pub len: usize,
    }

    unsafe impl Send for NamedMapping {}
    unsafe impl Sync for NamedMapping {}

    fn cname(posix_name: &str) -> ChannelResult<CString> {
        CString::new(posix_name.as_bytes())
            .map_err(|_| ChannelError::InvalidArgument("channel name contains NUL"))
    }

    /// Creates a fresh region of `size` bytes, failing with `AlreadyExists`
    /// if `posix_name` is already present.
    pub fn create(posix_name: &str, size: usize) -> ChannelResult<NamedMapping> {
        let c_name = cname(posix_name)?;
        let fd = retry_eintr(|| {
            let f = unsafe {
                libc::shm_open(
                    c_name.as_ptr(),
                    libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                    0o666,
                )
            };
            if f == -1 {
                Err(io::Error::last_os_error())
            } else {
                Ok(f)
            }
        })?;

        unsafe { libc::fchmod(fd, 0o666) };

        if let Err(e) = retry_eintr(|| {
            let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
            if ret != 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        }) {
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(e.into());
        }

        map(fd, size, posix_name)
    }

    /// Opens an existing region. The caller must first map just the header
    /// to discover `region_len`, then call this again with the full size —
    /// `open_full` below does both steps.
    pub fn open(posix_name: &str, size: usize) -> ChannelResult<NamedMapping> {
        let c_name = cname(posix_name)?;
        let fd = retry_eintr(|| {
            let f = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o666) };
            if f == -1 {
                Err(io::Error::last_os_error())
            } else {
                Ok(f)
            }
        })?;
        map(fd, size, posix_name)
    }

    /// Opens a region without knowing its size up front: maps the header
    /// alone, reads `region_len`, then remaps the full region. Mirrors
    /// ach_open's two-stage mmap.
    pub fn open_discover(posix_name: &str, header_size: usize) -> ChannelResult<NamedMapping> {
        let probe = open(posix_name, header_size)?;
        let region_len = unsafe { &*(probe.base as *const crate::header::Header) }.region_len;
        unsafe {
            libc::munmap(probe.base as *mut libc::c_void, probe.len);
        }
        map(probe.fd, region_len as usize, posix_name)
    }

    fn map(fd: i32, size: usize, _posix_name: &str) -> ChannelResult<NamedMapping> {
        let mem = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if mem == libc::MAP_FAILED {
            let e = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(e.into());
        }
        Ok(NamedMapping {
            fd,
            base: mem as *mut u8,
            len: size,
        })
    }

    pub fn close(mapping: &NamedMapping) -> ChannelResult<()> {
        unsafe {
            libc::munmap(mapping.base as *mut libc::c_void, mapping.len);
        }
        retry_eintr(|| {
            if unsafe { libc::close(mapping.fd) } != 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        })?;
        Ok(())
    }

    pub fn unlink(posix_name: &str) -> ChannelResult<()> {
        let c_name = cname(posix_name)?;
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } != 0 {
            let e = io::Error::last_os_error();
            if e.raw_os_error() == Some(libc::ENOENT) {
                return Ok(());
            }
            return Err(e.into());
        }
        Ok(())
    }

    pub fn chmod(mapping: &NamedMapping, mode: u32) -> ChannelResult<()> {
        if unsafe { libc::fchmod(mapping.fd, mode as libc::mode_t) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }
}

#[cfg(windows)]
pub mod windows {
    use super::*;

    pub struct NamedMapping {
        pub handle: windows_sys::Win32::Foundation::HANDLE,
        pub base: *mut u8,
        pub len: usize,
    }

    unsafe impl Send for NamedMapping {}
    unsafe impl Sync for NamedMapping {}

    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    pub fn create(name: &str, size: usize) -> ChannelResult<NamedMapping> {
        use windows_sys::Win32::Foundation::*;
        use windows_sys::Win32::System::Memory::*;

        let wide = to_wide(name);
        let handle = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                std::ptr::null(),
                PAGE_READWRITE,
                0,
                size as u32,
                wide.as_ptr(),
            )
        };
        let existed = unsafe { GetLastError() } == ERROR_ALREADY_EXISTS;
        if handle == 0 {
            return Err(io::Error::last_os_error().into());
        }
        if existed {
            unsafe { CloseHandle(handle) };
            return Err(ChannelError::AlreadyExists);
        }
        map(handle, size)
    }

    pub fn open(name: &str, size_hint: usize) -> ChannelResult<NamedMapping> {
        use windows_sys::Win32::Foundation::FALSE;
        use windows_sys::Win32::System::Memory::*;

        let wide = to_wide(name);
        let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, FALSE, wide.as_ptr()) };
        if handle == 0 {
            return Err(io::Error::last_os_error().into());
        }
        map(handle, size_hint)
    }

    fn map(handle: windows_sys::Win32::Foundation::HANDLE, size: usize) -> ChannelResult<NamedMapping> {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Memory::{MapViewOfFile, FILE_MAP_ALL_ACCESS};

        let mem = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, size) };
        if mem.is_null() {
            let e = io::Error::last_os_error();
            unsafe { CloseHandle(handle) };
            return Err(e.into());
        }
        Ok(NamedMapping {
            handle,
            base: mem as *mut u8,
            len: size,
        })
    }

    pub fn open_discover(name: &str, header_size: usize) -> ChannelResult<NamedMapping> {
        let probe = open(name, header_size)?;
        let region_len = unsafe { &*(probe.base as *const crate::header::Header) }.region_len;
        unsafe {
            windows_sys::Win32::System::Memory::UnmapViewOfFile(probe.base as *const _);
        }
        map(probe.handle, region_len as usize)
    }

    pub fn close(mapping: &NamedMapping) -> ChannelResult<()> {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Memory::UnmapViewOfFile;
        unsafe {
            UnmapViewOfFile(mapping.base as *const _);
            CloseHandle(mapping.handle);
        }
        Ok(())
    }

    /// Windows has no `shm_unlink` equivalent: a pagefile-backed mapping is
    /// reclaimed automatically once every handle across the system closes.
    /// Best-effort no-op, documented in DESIGN.md as a platform limitation.
    pub fn unlink(_name: &str) -> ChannelResult<()> {
        Ok(())
    }

    pub fn chmod(_mapping: &NamedMapping, _mode: u32) -> ChannelResult<()> {
        Ok(())
    }
}
