// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Builder-style attribute structs for create/open/cancel. Mirrors
// ach_create_attr_t / ach_attr_t / ach_cancel_attr_t from the original
// implementation's attr_init functions, rendered as Rust `Default` structs
// with `with_*` builder methods instead of a separate `_init` call.

/// Which clock a channel's condition-variable deadlines are measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    /// `CLOCK_MONOTONIC` on platforms that support it (the default).
    Monotonic,
    /// `CLOCK_REALTIME`; wall-clock, subject to jumps on clock changes.
    Realtime,
}

impl Default for ClockSource {
    fn default() -> Self {
        ClockSource::Monotonic
    }
}

/// Options for `Channel::create`.
#[derive(Debug, Clone)]
pub struct CreateAttrs {
    pub(crate) map_anon: bool,
    pub(crate) truncate: bool,
    pub(crate) clock: ClockSource,
}

impl Default for CreateAttrs {
    fn default() -> Self {
        Self {
            map_anon: false,
            truncate: false,
            clock: ClockSource::default(),
        }
    }
}

impl CreateAttrs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an in-process allocation instead of a named shared-memory file.
    pub fn with_map_anon(mut self, on: bool) -> Self {
        self.map_anon = on;
        self
    }

    /// Replace an existing named channel instead of failing with
    /// `AlreadyExists`.
    pub fn with_truncate(mut self, on: bool) -> Self {
        self.truncate = on;
        self
    }

    /// Select the clock used for `receive` deadlines.
    pub fn with_clock(mut self, clock: ClockSource) -> Self {
        self.clock = clock;
        self
    }
}

/// Options for `Channel::open`. Currently empty but kept as a distinct type
/// so the public signature can grow without breaking callers, matching
/// `ach_attr_t`'s role as a forward-compatible options bag.
#[derive(Debug, Clone, Default)]
pub struct OpenAttrs {}

impl OpenAttrs {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Options for `Channel::cancel`.
#[derive(Debug, Clone, Copy)]
pub struct CancelAttrs {
    pub(crate) async_unsafe: bool,
}

impl Default for CancelAttrs {
    fn default() -> Self {
        // Conservative default: fork a helper rather than assume the caller
        // is on a non-signal thread.
        Self {
            async_unsafe: false,
        }
    }
}

impl CancelAttrs {
    pub fn new() -> Self {
        Self::default()
    }

    /// The caller is already on a non-signal-handler thread, so `cancel` may
    /// lock the mutex and broadcast directly instead of forking a helper.
    pub fn with_async_unsafe(mut self, on: bool) -> Self {
        self.async_unsafe = on;
        self
    }
}

/// Bit flags accepted by `Channel::receive`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiveOptions {
    pub(crate) wait: bool,
    pub(crate) last: bool,
    pub(crate) copy: bool,
}

impl ReceiveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block on the condition variable until a newer frame arrives, the
    /// deadline elapses, the handle is canceled, or the region is corrupt.
    pub fn with_wait(mut self, on: bool) -> Self {
        self.wait = on;
        self
    }

    /// Skip directly to the newest frame rather than the next unread one.
    pub fn with_last(mut self, on: bool) -> Self {
        self.last = on;
        self
    }

    /// Permit re-reading the current frame when already caught up.
    pub fn with_copy(mut self, on: bool) -> Self {
        self.copy = on;
        self
    }
}
