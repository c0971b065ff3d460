//! Every core crate carries its own error surface (§7), even where, as
//! here, the crate's public operations happen to be infallible today.
//! `connect`/`disconnect`/`emit` cannot fail: a [`crate::Signal`] can only be
//! built from a `TaskHandle`, which in turn only exists on the loop thread,
//! so there is no "blocking emit from outside the loop" state for this type
//! to reject at runtime.

/// Reserved for future fallible operations on this crate's types. No
/// current operation constructs a value of this type.
#[allow(clippy::empty_enum)]
#[derive(Debug, thiserror::Error)]
pub enum Error {}
