use crate::id::{ConnectionId, ObjectId};
use loom_eventloop::TaskHandle;
use std::{
    cell::RefCell,
    panic::{catch_unwind, AssertUnwindSafe},
    rc::Rc,
};

/// Delivery mode for a connection, chosen at `connect` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Runs on the emitter's task, synchronously, before `emit` returns.
    Direct,
    /// `post`ed to run in a later iteration; `emit` returns immediately.
    Queued,
    /// Like `Queued`, but the emitting task suspends until the slot runs.
    Blocking,
}

type Slot<Args> = Rc<RefCell<dyn FnMut(Args)>>;

struct Connection<Args> {
    id: ConnectionId,
    receiver: Option<ObjectId>,
    mode: ConnectionMode,
    slot: Slot<Args>,
}

thread_local! {
    static SENDER_STACK: RefCell<Vec<ObjectId>> = const { RefCell::new(Vec::new()) };
}

/// The emitter identity of the signal currently invoking the calling slot,
/// or `None` if called outside a slot. A stack, not a single cell, so that a
/// slot which itself emits (direct re-entrancy) sees its own sender restored
/// once the nested emission finishes.
pub fn sender() -> Option<ObjectId> {
    SENDER_STACK.with(|s| s.borrow().last().copied())
}

fn with_sender<R>(emitter: ObjectId, f: impl FnOnce() -> R) -> R {
    SENDER_STACK.with(|s| s.borrow_mut().push(emitter));
    let result = f();
    SENDER_STACK.with(|s| {
        s.borrow_mut().pop();
    });
    result
}

/// A typed, ordered list of connections attached to one signal field. Args
/// are cloned per slot rather than shared by reference, since queued and
/// blocking slots must own a copy that outlives the `emit` call.
pub struct Signal<Args> {
    emitter: ObjectId,
    handle: TaskHandle,
    connections: RefCell<Vec<Connection<Args>>>,
}

impl<Args: Clone + 'static> Signal<Args> {
    pub fn new(emitter: ObjectId, handle: TaskHandle) -> Self {
        Self {
            emitter,
            handle,
            connections: RefCell::new(Vec::new()),
        }
    }

    /// Appends a connection record. `receiver` identifies the object the
    /// slot belongs to, for later `disconnect_receiver`; pass `None` for a
    /// free closure with no owning object.
    pub fn connect(
        &self,
        receiver: Option<ObjectId>,
        mode: ConnectionMode,
        slot: impl FnMut(Args) + 'static,
    ) -> ConnectionId {
        let id = ConnectionId::mint();
        self.connections.borrow_mut().push(Connection {
            id,
            receiver,
            mode,
            slot: Rc::new(RefCell::new(slot)),
        });
        id
    }

    /// Removes exactly one connection. Returns `false` if `id` is unknown
    /// (already disconnected, or never valid for this signal).
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.borrow_mut();
        let before = connections.len();
        connections.retain(|c| c.id != id);
        connections.len() != before
    }

    /// Removes every connection whose receiver is `receiver`. Called from a
    /// receiver's teardown path so no connection ever fires into a
    /// half-destroyed object.
    pub fn disconnect_receiver(&self, receiver: ObjectId) -> usize {
        let mut connections = self.connections.borrow_mut();
        let before = connections.len();
        connections.retain(|c| c.receiver != Some(receiver));
        before - connections.len()
    }

    /// Removes every connection on this signal, as when the emitter itself
    /// is torn down.
    pub fn disconnect_all(&self) {
        self.connections.borrow_mut().clear();
    }

    pub fn connection_count(&self) -> usize {
        self.connections.borrow().len()
    }

    /// Fires every connected slot in insertion order, respecting each
    /// connection's delivery mode. Iteration is over a snapshot of
    /// connection ids taken before the first slot runs, so a direct slot
    /// that disconnects others does not perturb this emission (it is
    /// visible starting with the next `emit`).
    pub fn emit(&self, args: Args) {
        let snapshot: Vec<ConnectionId> =
            self.connections.borrow().iter().map(|c| c.id).collect();
        for id in snapshot {
            let found = self
                .connections
                .borrow()
                .iter()
                .find(|c| c.id == id)
                .map(|c| (c.mode, c.slot.clone()));
            let Some((mode, slot)) = found else {
                continue;
            };
            match mode {
                ConnectionMode::Direct => {
                    run_slot_detached(self.emitter, slot, args.clone());
                }
                ConnectionMode::Queued => {
                    let emitter = self.emitter;
                    let args = args.clone();
                    self.handle.post(move |_h| {
                        run_slot_detached(emitter, slot, args);
                    });
                }
                ConnectionMode::Blocking => {
                    let token = self.handle.mint_token();
                    let emitter = self.emitter;
                    let args = args.clone();
                    let handle = self.handle.clone();
                    self.handle.post(move |_h| {
                        run_slot_detached(emitter, slot, args);
                        handle.unyield(token);
                    });
                    // Emitting from outside a running task (e.g. an I/O
                    // completion hook dispatched straight from the loop's
                    // own call stack) can't suspend; the slot still runs via
                    // the job just posted, it just won't happen before
                    // `emit` returns.
                    if let Err(e) = self.handle.try_suspend_on(token) {
                        tracing::error!(
                            emitter = %self.emitter,
                            error = %e,
                            "blocking emit could not suspend the caller"
                        );
                    }
                }
            }
        }
    }
}

/// Invokes `slot` with the sender context set to `emitter`, catching any
/// panic so it never crosses the `emit` boundary (a slot panic is logged and
/// treated as if the slot had returned normally).
fn run_slot_detached<Args>(emitter: ObjectId, slot: Slot<Args>, args: Args) {
    with_sender(emitter, || {
        let result = catch_unwind(AssertUnwindSafe(|| {
            (slot.borrow_mut())(args);
        }));
        if let Err(payload) = result {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(%emitter, panic = %message, "slot panicked, emit continues");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_eventloop::EventLoop;
    use std::{cell::RefCell as StdRefCell, time::Duration};

    fn signal_in_loop<Args: Clone + 'static>(lp: &EventLoop) -> Signal<Args> {
        Signal::new(ObjectId::new(), lp.task_handle())
    }

    #[test]
    fn direct_slots_run_synchronously_in_insertion_order() {
        let lp = EventLoop::new();
        let sig: Signal<i32> = signal_in_loop(&lp);
        let order = Rc::new(StdRefCell::new(Vec::new()));
        for tag in ["a", "b"] {
            let order = order.clone();
            sig.connect(None, ConnectionMode::Direct, move |v| {
                order.borrow_mut().push((tag, v))
            });
        }
        sig.emit(7);
        assert_eq!(*order.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn queued_slot_runs_on_a_later_iteration() {
        let lp = EventLoop::new();
        let sig: Signal<i32> = signal_in_loop(&lp);
        let seen = Rc::new(StdRefCell::new(None));
        let seen2 = seen.clone();
        sig.connect(None, ConnectionMode::Queued, move |v| {
            *seen2.borrow_mut() = Some(v);
        });
        sig.emit(9);
        assert!(seen.borrow().is_none(), "queued slot must not run inline");
        lp.process_once(false);
        assert_eq!(*seen.borrow(), Some(9));
    }

    #[test]
    fn direct_then_queued_matches_mixed_mode_ordering() {
        let lp = EventLoop::new();
        let sig: Signal<()> = signal_in_loop(&lp);
        let order = Rc::new(StdRefCell::new(Vec::new()));
        let order_x = order.clone();
        sig.connect(None, ConnectionMode::Direct, move |()| {
            order_x.borrow_mut().push("x")
        });
        let order_y = order.clone();
        sig.connect(None, ConnectionMode::Queued, move |()| {
            order_y.borrow_mut().push("y")
        });
        sig.emit(());
        assert_eq!(*order.borrow(), vec!["x"]);
        lp.process_once(false);
        assert_eq!(*order.borrow(), vec!["x", "y"]);
    }

    #[test]
    fn disconnect_removes_exactly_that_connection() {
        let lp = EventLoop::new();
        let sig: Signal<()> = signal_in_loop(&lp);
        let count = Rc::new(StdRefCell::new(0));
        let c1 = count.clone();
        let id1 = sig.connect(None, ConnectionMode::Direct, move |()| *c1.borrow_mut() += 1);
        let c2 = count.clone();
        sig.connect(None, ConnectionMode::Direct, move |()| *c2.borrow_mut() += 10);
        assert!(sig.disconnect(id1));
        sig.emit(());
        assert_eq!(*count.borrow(), 10);
        assert!(!sig.disconnect(id1), "second disconnect is a no-op");
    }

    #[test]
    fn disconnect_receiver_removes_all_its_connections() {
        let lp = EventLoop::new();
        let sig: Signal<()> = signal_in_loop(&lp);
        let receiver = ObjectId::new();
        sig.connect(Some(receiver), ConnectionMode::Direct, |()| {});
        sig.connect(Some(receiver), ConnectionMode::Direct, |()| {});
        sig.connect(None, ConnectionMode::Direct, |()| {});
        assert_eq!(sig.disconnect_receiver(receiver), 2);
        assert_eq!(sig.connection_count(), 1);
    }

    #[test]
    fn panicking_slot_does_not_stop_remaining_slots() {
        let lp = EventLoop::new();
        let sig: Signal<()> = signal_in_loop(&lp);
        let ran = Rc::new(StdRefCell::new(false));
        sig.connect(None, ConnectionMode::Direct, |()| panic!("boom"));
        let ran2 = ran.clone();
        sig.connect(None, ConnectionMode::Direct, move |()| *ran2.borrow_mut() = true);
        sig.emit(());
        assert!(*ran.borrow());
    }

    #[test]
    fn sender_reports_the_emitting_object_during_a_slot() {
        let lp = EventLoop::new();
        let emitter = ObjectId::new();
        let sig: Signal<()> = Signal::new(emitter, lp.task_handle());
        let observed = Rc::new(StdRefCell::new(None));
        let observed2 = observed.clone();
        sig.connect(None, ConnectionMode::Direct, move |()| {
            *observed2.borrow_mut() = crate::sender();
        });
        sig.emit(());
        assert_eq!(*observed.borrow(), Some(emitter));
        assert_eq!(crate::sender(), None, "cleared once the slot returns");
    }

    #[test]
    fn blocking_emit_suspends_until_the_slot_has_run() {
        let lp = EventLoop::new();
        let sig: Signal<i32> = signal_in_loop(&lp);
        let seen = Rc::new(StdRefCell::new(None));
        let seen2 = seen.clone();
        sig.connect(None, ConnectionMode::Blocking, move |v| {
            *seen2.borrow_mut() = Some(v);
        });
        let handle = lp.task_handle();
        let seen3 = seen.clone();
        handle.post(move |_h| {
            sig.emit(5);
            // By the time `emit` returns for a blocking connection, the
            // slot has already run, even though it executed from a
            // separately posted job.
            assert_eq!(*seen3.borrow(), Some(5));
        });
        lp.run_for(Duration::from_millis(50));
    }

    #[test]
    fn blocking_emit_outside_a_task_still_runs_the_slot() {
        // Mirrors an I/O completion hook firing a signal directly from the
        // loop's own call stack rather than from inside a spawned task: the
        // slot still runs, just not before `emit` returns.
        let lp = EventLoop::new();
        let sig: Signal<i32> = signal_in_loop(&lp);
        let seen = Rc::new(StdRefCell::new(None));
        let seen2 = seen.clone();
        sig.connect(None, ConnectionMode::Blocking, move |v| {
            *seen2.borrow_mut() = Some(v);
        });
        sig.emit(7);
        assert!(seen.borrow().is_none(), "slot can't have run synchronously here");
        lp.process_once(false);
        assert_eq!(*seen.borrow(), Some(7));
    }
}
