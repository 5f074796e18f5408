// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

#[cfg(unix)]
pub mod posix;

#[cfg(windows)]
pub mod windows;

// Re-export the platform-specific implementations under a uniform name.
// `PlatformShm` has no remaining caller (see DESIGN.md) and is not
// re-exported here; `PlatformMutex` backs `IpcMutex`, used by the Windows
// synchronization fallback.

#[cfg(unix)]
pub use posix::PlatformMutex;

#[cfg(windows)]
pub use windows::PlatformMutex;
