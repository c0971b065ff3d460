//! Typed signal/slot dispatch on top of `loom-eventloop`'s task handle.
//!
//! Signals are statically bound: each signal is a typed [`Signal<Args>`]
//! field on its emitter, not an entry in a string-keyed runtime table. See
//! `SPEC_FULL.md` §4.C.

mod error;
mod id;
mod property;
mod signal;

pub use error::Error;
pub use id::{ConnectionId, ObjectId};
pub use property::Property;
pub use signal::{sender, ConnectionMode, Signal};
