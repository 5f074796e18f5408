// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The channel's embedded synchronization primitive: a robust, process-shared
// mutex plus condition variable plus a one-byte dirty flag, living inline in
// the mapped header rather than in a separately-named shm segment.
//
// POSIX: grounded directly on original_source/src/ach.c's check_lock /
// rdlock / wrlock / unrdlock / unwrlock, and on the teacher's
// platform/posix.rs PlatformMutex (EOWNERDEAD / pthread_mutex_consistent
// handling, PTHREAD_MUTEX_ROBUST / PTHREAD_PROCESS_SHARED attribute setup)
// and condition.rs (pthread_cond_timedwait deadline construction) — adapted
// from "the mutex owns its own named shm segment" to "the mutex is a field
// of the already-mapped channel header".
//
// Windows cannot embed a live kernel HANDLE inside a shared mapping, so the
// mutex/event pair there is a named kernel object keyed off the channel
// name, reusing the teacher's platform/windows.rs WAIT_ABANDONED handling as
// the analogue of EOWNERDEAD. The dirty flag itself still lives in the
// mapped header on both platforms, so corruption detection is uniform.

use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::attrs::ClockSource;

/// Outcome of acquiring the mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// Acquired normally.
    Clean,
    /// The previous owner died while holding the mutex. The caller must
    /// inspect the dirty flag before trusting the region.
    OwnerDied,
}

// ---------------------------------------------------------------------------
// POSIX: pthread_mutex_t + pthread_cond_t embedded in the header
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[repr(C)]
pub struct RawSync {
    mutex: libc::pthread_mutex_t,
    cond: libc::pthread_cond_t,
    dirty: u8,
    /// Clock the condition variable's abstime deadlines are expressed
    /// against. Set by `init` to whatever `pthread_condattr_setclock`
    /// actually took effect, so `wait` can build a `timespec` in the same
    /// domain `pthread_cond_timedwait` interprets it in.
    clock: u8,
    _pad: [u8; 6],
}

const CLOCK_TAG_REALTIME: u8 = 0;
const CLOCK_TAG_MONOTONIC: u8 = 1;

#[cfg(all(unix, not(target_os = "macos")))]
const EOWNERDEAD: i32 = libc::EOWNERDEAD;
#[cfg(all(unix, not(target_os = "macos")))]
const PTHREAD_MUTEX_ROBUST: libc::c_int = 1;

#[cfg(all(unix, not(target_os = "macos")))]
extern "C" {
    fn pthread_mutexattr_setrobust(
        attr: *mut libc::pthread_mutexattr_t,
        robustness: libc::c_int,
    ) -> libc::c_int;
    fn pthread_mutex_consistent(mutex: *mut libc::pthread_mutex_t) -> libc::c_int;
}

#[cfg(unix)]
impl RawSync {
    /// Initializes the mutex and condition variable in place. `shared` is
    /// true for named (multi-process) channels, false for anonymous ones.
    ///
    /// # Safety
    /// `self` must be freshly zeroed memory (fresh shm, or a fresh
    /// allocation) and not concurrently accessed by anyone else yet.
    pub unsafe fn init(&mut self, shared: bool, clock: ClockSource) -> io::Result<()> {
        self.dirty = 0;
        self.clock = CLOCK_TAG_REALTIME;

        let mut mattr: libc::pthread_mutexattr_t = std::mem::zeroed();
        check(libc::pthread_mutexattr_init(&mut mattr))?;
        if shared {
            check(libc::pthread_mutexattr_setpshared(
                &mut mattr,
                libc::PTHREAD_PROCESS_SHARED,
            ))?;
        }
        #[cfg(not(target_os = "macos"))]
        if shared {
            check(pthread_mutexattr_setrobust(&mut mattr, PTHREAD_MUTEX_ROBUST))?;
        }
        #[cfg(debug_assertions)]
        {
            let _ = libc::pthread_mutexattr_settype(&mut mattr, libc::PTHREAD_MUTEX_ERRORCHECK);
        }
        let eno = libc::pthread_mutex_init(&mut self.mutex, &mattr);
        libc::pthread_mutexattr_destroy(&mut mattr);
        check(eno)?;

        let mut cattr: libc::pthread_condattr_t = std::mem::zeroed();
        check(libc::pthread_condattr_init(&mut cattr))?;
        if shared {
            check(libc::pthread_condattr_setpshared(
                &mut cattr,
                libc::PTHREAD_PROCESS_SHARED,
            ))?;
        }
        #[cfg(not(target_os = "macos"))]
        if matches!(clock, ClockSource::Monotonic) {
            if libc::pthread_condattr_setclock(&mut cattr, libc::CLOCK_MONOTONIC) == 0 {
                self.clock = CLOCK_TAG_MONOTONIC;
            }
        }
        #[cfg(target_os = "macos")]
        let _ = clock;
        // macOS has no pthread_condattr_setclock; the condvar always times
        // out against CLOCK_REALTIME there, so `clock` stays tagged realtime.
        let eno = libc::pthread_cond_init(&mut self.cond, &cattr);
        libc::pthread_condattr_destroy(&mut cattr);
        check(eno)?;

        Ok(())
    }

    pub fn lock(&self) -> io::Result<LockKind> {
        let eno = unsafe { libc::pthread_mutex_lock(self.mutex_ptr()) };
        match eno {
            0 => Ok(LockKind::Clean),
            #[cfg(not(target_os = "macos"))]
            EOWNERDEAD => {
                let eno2 = unsafe { pthread_mutex_consistent(self.mutex_ptr()) };
                if eno2 != 0 {
                    return Err(io::Error::from_raw_os_error(eno2));
                }
                Ok(LockKind::OwnerDied)
            }
            _ => Err(io::Error::from_raw_os_error(eno)),
        }
    }

    pub fn unlock(&self) -> io::Result<()> {
        check(unsafe { libc::pthread_mutex_unlock(self.mutex_ptr()) })
    }

    /// Waits for a broadcast, or the deadline, whichever comes first.
    /// Returns `Ok(true)` if woken, `Ok(false)` on timeout.
    pub fn wait(&self, deadline: Option<SystemTime>) -> io::Result<bool> {
        match deadline {
            None => {
                check(unsafe { libc::pthread_cond_wait(self.cond_ptr(), self.mutex_ptr()) })?;
                Ok(true)
            }
            Some(when) => {
                let ts = if self.clock == CLOCK_TAG_MONOTONIC {
                    // `when` is a wall-clock deadline; the condvar was set up
                    // with CLOCK_MONOTONIC, so re-express it as "now (on the
                    // monotonic clock) plus however long until `when`".
                    let remaining = when
                        .duration_since(SystemTime::now())
                        .unwrap_or(Duration::from_secs(0));
                    let mut now = libc::timespec {
                        tv_sec: 0,
                        tv_nsec: 0,
                    };
                    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) };
                    let mut tv_sec = now.tv_sec + remaining.as_secs() as libc::time_t;
                    let mut tv_nsec = now.tv_nsec + remaining.subsec_nanos() as libc::c_long;
                    if tv_nsec >= 1_000_000_000 {
                        tv_nsec -= 1_000_000_000;
                        tv_sec += 1;
                    }
                    libc::timespec { tv_sec, tv_nsec }
                } else {
                    let dur = when
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or(Duration::from_secs(0));
                    libc::timespec {
                        tv_sec: dur.as_secs() as libc::time_t,
                        tv_nsec: dur.subsec_nanos() as libc::c_long,
                    }
                };
                let eno =
                    unsafe { libc::pthread_cond_timedwait(self.cond_ptr(), self.mutex_ptr(), &ts) };
                match eno {
                    0 => Ok(true),
                    libc::ETIMEDOUT => Ok(false),
                    #[cfg(not(target_os = "macos"))]
                    EOWNERDEAD => Ok(true),
                    _ => Err(io::Error::from_raw_os_error(eno)),
                }
            }
        }
    }

    pub fn broadcast(&self) -> io::Result<()> {
        check(unsafe { libc::pthread_cond_broadcast(self.cond_ptr()) })
    }

    pub fn dirty(&self) -> bool {
        self.dirty != 0
    }

    pub fn set_dirty(&mut self, val: bool) {
        self.dirty = val as u8;
    }

    fn mutex_ptr(&self) -> *mut libc::pthread_mutex_t {
        &self.mutex as *const _ as *mut _
    }

    fn cond_ptr(&self) -> *mut libc::pthread_cond_t {
        &self.cond as *const _ as *mut _
    }
}

#[cfg(unix)]
fn check(eno: libc::c_int) -> io::Result<()> {
    if eno == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(eno))
    }
}

// ---------------------------------------------------------------------------
// Windows: the header only ever carries the dirty flag; the mutex/event pair
// is a pair of named kernel objects looked up by the channel's name and held
// alongside (not inside) the mapping.
// ---------------------------------------------------------------------------

#[cfg(windows)]
#[repr(C)]
pub struct RawSync {
    dirty: u8,
    _pad: [u8; 7],
}

#[cfg(windows)]
impl RawSync {
    /// # Safety
    /// `self` must be freshly zeroed memory.
    pub unsafe fn init(&mut self, _shared: bool, _clock: ClockSource) -> io::Result<()> {
        self.dirty = 0;
        Ok(())
    }

    pub fn dirty(&self) -> bool {
        self.dirty != 0
    }

    pub fn set_dirty(&mut self, val: bool) {
        self.dirty = val as u8;
    }
}

/// Named kernel objects backing the synchronization primitive on Windows.
/// Opened once per `Channel` and reused for every lock/wait/broadcast.
///
/// The broadcast counter is process-local, a limitation inherited from the
/// teacher's own `WindowsCondition`: true cross-process broadcast would need
/// the waiter count itself to live in shared memory. Acceptable here because
/// the POSIX path (embedding a real `pthread_cond_t`) is the spec-faithful
/// primary implementation; this is the fallback.
#[cfg(windows)]
fn anon_name() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "ach-anon-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

#[cfg(windows)]
struct NamedSemaphore {
    handle: windows_sys::Win32::Foundation::HANDLE,
}

#[cfg(windows)]
impl NamedSemaphore {
    fn open(name: &str) -> io::Result<Self> {
        use windows_sys::Win32::Foundation::FALSE;
        use windows_sys::Win32::System::Threading::CreateSemaphoreW;

        let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
        let handle = unsafe {
            CreateSemaphoreW(std::ptr::null(), 0, i32::MAX, wide.as_ptr())
        };
        let _ = FALSE;
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { handle })
    }

    fn wait(&self, timeout_ms: Option<u64>) -> io::Result<bool> {
        use windows_sys::Win32::Foundation::{WAIT_OBJECT_0, WAIT_TIMEOUT};
        use windows_sys::Win32::System::Threading::{WaitForSingleObject, INFINITE};

        let ms = timeout_ms.map(|v| v as u32).unwrap_or(INFINITE);
        match unsafe { WaitForSingleObject(self.handle, ms) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(io::Error::last_os_error()),
        }
    }

    fn post(&self, count: u32) -> io::Result<()> {
        use windows_sys::Win32::System::Threading::ReleaseSemaphore;
        if unsafe { ReleaseSemaphore(self.handle, count as i32, std::ptr::null_mut()) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(windows)]
impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        use windows_sys::Win32::Foundation::CloseHandle;
        if self.handle != 0 {
            unsafe { CloseHandle(self.handle) };
        }
    }
}

#[cfg(windows)]
pub struct WinSyncHandles {
    mutex: crate::IpcMutex,
    sem: NamedSemaphore,
    waiters: std::sync::atomic::AtomicI32,
}

#[cfg(windows)]
impl WinSyncHandles {
    /// `name` is `None` for an anonymous (in-process only) channel; a
    /// process-unique name is synthesized so the objects are still real
    /// (if unshared) kernel handles, valid for synchronizing threads within
    /// one process.
    pub fn open(name: Option<&str>) -> io::Result<Self> {
        let owned;
        let base = match name {
            Some(n) => n,
            None => {
                owned = anon_name();
                &owned
            }
        };
        let mutex = crate::IpcMutex::open(&format!("{base}_ACH_MTX_"))?;
        let sem = NamedSemaphore::open(&format!("{base}_ACH_SEM_"))?;
        Ok(Self {
            mutex,
            sem,
            waiters: std::sync::atomic::AtomicI32::new(0),
        })
    }

    pub fn lock(&self) -> io::Result<LockKind> {
        self.mutex.lock()?;
        Ok(LockKind::Clean)
    }

    pub fn unlock(&self) -> io::Result<()> {
        self.mutex.unlock()
    }

    pub fn wait(&self, deadline: Option<SystemTime>) -> io::Result<bool> {
        self.waiters
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.mutex.unlock()?;
        let timeout_ms = deadline.map(|when| {
            let now = SystemTime::now();
            when.duration_since(now)
                .unwrap_or(Duration::from_millis(0))
                .as_millis() as u64
        });
        let woke = self.sem.wait(timeout_ms)?;
        self.mutex.lock()?;
        if !woke {
            self.waiters
                .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        }
        Ok(woke)
    }

    pub fn broadcast(&self) -> io::Result<()> {
        let n = self.waiters.swap(0, std::sync::atomic::Ordering::SeqCst);
        if n > 0 {
            self.sem.post(n as u32)?;
        }
        Ok(())
    }
}
