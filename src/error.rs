// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error taxonomy for channel operations. Mirrors ach_status_t /
// ach_result_to_string from the original C implementation, but expressed as
// a closed Rust enum instead of an integer code, with a `source()` chain for
// wrapped syscall failures.

use std::fmt;
use std::io;

/// Every way a channel operation can fail.
#[derive(Debug)]
pub enum ChannelError {
    /// Channel name is empty, too long, starts with `.`, or uses characters
    /// outside alphanumeric/`-`/`_`/`.`.
    InvalidName(String),
    /// An argument other than the name was invalid (e.g. zero frame count).
    InvalidArgument(&'static str),
    /// `create` without `truncate` on a name that already exists.
    AlreadyExists,
    /// `open` on a name that does not exist.
    NotFound,
    /// The backing file exists but this process lacks access to it.
    PermissionDenied,
    /// No frame newer than the handle's current `seq_num` is available.
    StaleFrames,
    /// The buffer passed to `receive` was smaller than the frame's payload;
    /// `required` is the size the caller needs to retry with.
    Overflow { required: usize },
    /// A `receive` deadline elapsed before a new frame arrived.
    Timeout,
    /// `cancel` was called against the handle while it was waiting.
    Canceled,
    /// The magic tag at the start of the region did not match.
    BadShmFile,
    /// A guard sentinel mismatched, or the dirty flag was observed set after
    /// a robust-mutex owner-died recovery: the region is corrupt.
    Corrupt,
    /// The header's structural fields are inconsistent with the mapped
    /// region's actual length.
    BadHeader,
    /// An underlying system call failed.
    FailedSyscall(io::Error),
    /// The handle has already been closed.
    Closed,
    /// An internal invariant was violated; this indicates a bug in the
    /// engine, not a caller error.
    Bug(&'static str),
}

/// `Ok` payload for `MISSED_FRAME`-capable operations. Not an error: the
/// frame is still delivered, the bit only notes the client skipped ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOutcome {
    /// Bytes copied into the caller's buffer.
    pub len: usize,
    /// Set if the handle's next-expected sequence number was evicted before
    /// it could be read, so the engine jumped to the oldest live frame.
    pub missed_frame: bool,
}

pub type ChannelResult<T> = Result<T, ChannelError>;

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::InvalidName(name) => write!(f, "invalid channel name: {name:?}"),
            ChannelError::InvalidArgument(what) => write!(f, "invalid argument: {what}"),
            ChannelError::AlreadyExists => write!(f, "channel already exists"),
            ChannelError::NotFound => write!(f, "channel does not exist"),
            ChannelError::PermissionDenied => write!(f, "permission denied"),
            ChannelError::StaleFrames => write!(f, "no new frame available"),
            ChannelError::Overflow { required } => {
                write!(f, "buffer too small, need {required} bytes")
            }
            ChannelError::Timeout => write!(f, "receive deadline exceeded"),
            ChannelError::Canceled => write!(f, "receive canceled"),
            ChannelError::BadShmFile => write!(f, "bad shared memory file (magic mismatch)"),
            ChannelError::Corrupt => write!(f, "channel region is corrupt"),
            ChannelError::BadHeader => write!(f, "channel header is structurally invalid"),
            ChannelError::FailedSyscall(e) => write!(f, "system call failed: {e}"),
            ChannelError::Closed => write!(f, "handle is closed"),
            ChannelError::Bug(what) => write!(f, "internal invariant violated: {what}"),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelError::FailedSyscall(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ChannelError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::AlreadyExists => ChannelError::AlreadyExists,
            io::ErrorKind::NotFound => ChannelError::NotFound,
            io::ErrorKind::PermissionDenied => ChannelError::PermissionDenied,
            _ => ChannelError::FailedSyscall(e),
        }
    }
}
