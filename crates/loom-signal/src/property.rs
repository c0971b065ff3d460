use crate::{ObjectId, Signal};
use loom_eventloop::TaskHandle;

/// A value with an attached change signal, fired iff `set` is called with a
/// value that compares unequal to the one currently stored. Used the same
/// way a socket's `state` field is observed externally (see `loom-io`): no
/// dynamic, name-keyed property table, just a typed field plus a typed
/// signal (decided in favor of string-keyed properties, see `SPEC_FULL.md`
/// §9).
pub struct Property<T: PartialEq + Clone + 'static> {
    value: T,
    pub changed: Signal<T>,
}

impl<T: PartialEq + Clone + 'static> Property<T> {
    pub fn new(owner: ObjectId, handle: TaskHandle, initial: T) -> Self {
        Self {
            value: initial,
            changed: Signal::new(owner, handle),
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Stores `value`, firing `changed` iff it differs from the current one.
    pub fn set(&mut self, value: T) {
        if self.value != value {
            self.value = value.clone();
            self.changed.emit(value);
        }
    }
}
