//! Stackful coroutine primitive for a cooperative single-threaded scheduler.
//!
//! This crate is deliberately small: it knows how to spawn a closure onto a
//! pooled OS stack, run it, and suspend/resume it via [`fiber::yield_now`].
//! It has no notion of a ready queue, a timer, or a suspension token — those
//! live in `loom-eventloop`, which is built directly on top of [`Fiber`].

mod error;
mod fiber;
mod id;
mod stack;

pub use error::Error;
pub use fiber::{is_in_fiber, yield_now, Fiber, FiberState};
pub use id::TaskId;
pub use stack::{AcquiredStack, StackMemory, StackPool};
