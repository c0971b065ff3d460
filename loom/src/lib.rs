//! Cooperative single-threaded event loop with fiber-backed tasks, typed
//! signals, and async I/O, assembled from the four core crates plus the
//! thin external-interface collaborators of `loom-collab`.
//!
//! See `SPEC_FULL.md` for the full design; this crate is a facade that
//! re-exports the pieces most callers need under one name.

pub mod collab {
    pub use loom_collab::*;
}

pub mod io {
    pub use loom_io::*;
}

pub mod signal {
    pub use loom_signal::*;
}

pub mod task {
    pub use loom_task::*;
}

pub use loom_eventloop::{CompletionSource, EventLoop, Handle, NestedLoop, SuspensionToken, TaskHandle, TimerId};

/// Re-exports the names most programs built on top of the loop need in
/// scope at once.
pub mod prelude {
    pub use loom_eventloop::{CompletionSource, EventLoop, Handle, NestedLoop, SuspensionToken, TaskHandle, TimerId};
    pub use loom_signal::{ConnectionMode, ObjectId, Property, Signal};
}
