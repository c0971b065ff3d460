use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque non-negative identifier linking a [`crate::TaskHandle::suspend`]
/// call to the [`crate::EventLoop::unyield`] that wakes it. Stable for the
/// lifetime of the suspension; never reused while a suspended task holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SuspensionToken(u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

impl SuspensionToken {
    pub(crate) fn mint() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SuspensionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SuspensionToken({})", self.0)
    }
}

/// Stable identifier returned by [`crate::EventLoop::add_timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

static NEXT_TIMER: AtomicU64 = AtomicU64::new(1);

impl TimerId {
    pub(crate) fn mint() -> Self {
        Self(NEXT_TIMER.fetch_add(1, Ordering::Relaxed))
    }
}
