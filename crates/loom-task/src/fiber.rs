//! The stackful coroutine primitive: a fiber that can suspend mid-execution
//! and be resumed later with all of its local state intact.
//!
//! `Fiber` is the mechanism only. It knows nothing about ready queues,
//! suspension tokens or timers — those are the event loop's job. A `Fiber`
//! just runs a closure on its own stack until the closure either returns or
//! calls [`yield_now`], and can be resumed from where it left off.

use crate::{stack::AcquiredStack, Error};
use context::{Context, Transfer};
use std::cell::Cell;

const DATA_SUSPENDED: usize = 0;
const DATA_FINISHED: usize = 1;

thread_local! {
    // The context to jump back into when the running fiber calls `yield_now`.
    // Only ever `Some` while a fiber's body is actually executing.
    static RESUME_POINT: Cell<Option<Context>> = const { Cell::new(None) };
}

/// Outcome of resuming a fiber once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    /// The fiber called [`yield_now`] and can be resumed again later.
    Suspended,
    /// The fiber's body ran to completion (or panicked); its stack can be
    /// reclaimed.
    Finished,
}

/// A single suspendable unit of cooperative execution.
pub struct Fiber {
    entry: Option<Context>,
    stack: Option<AcquiredStack>,
    finished: bool,
}

impl Fiber {
    /// Wraps `body` in a fresh fiber backed by `stack`. The body does not
    /// start running until the first call to [`Fiber::resume`].
    pub fn spawn(stack: AcquiredStack, body: impl FnOnce() + 'static) -> Self {
        // Safety: `stack` is kept alive in `self.stack` for exactly as long as
        // `entry` (and any context captured from resuming it) can be used;
        // both are dropped together and neither outlives `self`.
        let entry = unsafe { Context::new(stack.memory(), trampoline) };

        let boxed: Box<dyn FnOnce()> = Box::new(body);
        let boxed: Box<Box<dyn FnOnce()>> = Box::new(boxed);
        let payload = Box::into_raw(boxed) as usize;

        let mut fiber = Self {
            entry: Some(entry),
            stack: Some(stack),
            finished: false,
        };
        // The very first resume hands the trampoline the boxed closure
        // pointer instead of a suspend/finished marker; `trampoline`
        // reconstructs and runs it before touching `RESUME_POINT`.
        fiber.resume_raw(payload);
        fiber
    }

    /// Resumes a previously suspended fiber. Panics if the fiber already
    /// finished.
    pub fn resume(&mut self) -> FiberState {
        if self.finished {
            panic!("resumed a fiber that already finished");
        }
        self.resume_raw(DATA_SUSPENDED)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Releases the stack back to its pool. Only valid once finished.
    pub fn into_stack(self) -> Result<AcquiredStack, Error> {
        if !self.finished {
            return Err(Error::FiberFinished);
        }
        Ok(self.stack.expect("stack taken twice"))
    }

    fn resume_raw(&mut self, data: usize) -> FiberState {
        let entry = self.entry.take().expect("fiber resumed while running");
        // Safety: `entry` was produced either by `Context::new` over a live
        // stack owned by `self`, or by a previous `resume` on this same
        // fiber; in both cases it is a valid suspend point to jump into.
        let Transfer { context, data } = unsafe { entry.resume(data) };
        if data == DATA_FINISHED {
            self.finished = true;
            FiberState::Finished
        } else {
            self.entry = Some(context);
            FiberState::Suspended
        }
    }
}

/// Returns whether the calling OS thread is currently executing inside a
/// fiber body, i.e. whether [`yield_now`] would suspend it rather than
/// panic.
pub fn is_in_fiber() -> bool {
    RESUME_POINT.with(|cell| {
        let ctx = cell.take();
        let present = ctx.is_some();
        cell.set(ctx);
        present
    })
}

/// Suspends the currently running fiber, returning control to whoever last
/// called [`Fiber::resume`]. Must only be called from within a fiber body.
///
/// # Panics
/// Panics if called outside of a running fiber.
pub fn yield_now() {
    RESUME_POINT.with(|cell| {
        let caller = cell
            .take()
            .expect("yield_now called outside of a running fiber");
        // Safety: `caller` is the context captured on entry to this fiber's
        // current activation (either `trampoline`'s `Transfer` or a previous
        // `yield_now`'s `Transfer`); jumping back into it resumes the
        // scheduler exactly at the matching `resume` call site.
        let Transfer { context, .. } = unsafe { caller.resume(DATA_SUSPENDED) };
        cell.set(Some(context));
    });
}

extern "C" fn trampoline(t: Transfer) -> ! {
    let Transfer { context, data } = t;
    // Safety: `data` was produced by `Fiber::spawn`, which boxes the body
    // closure twice and passes the outer `Box`'s raw pointer as `data`
    // exactly once, before this trampoline ever runs.
    let body = unsafe { Box::from_raw(data as *mut Box<dyn FnOnce()>) };

    RESUME_POINT.with(|cell| cell.set(Some(context)));

    if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (*body)())) {
        let message = panic_message(&payload);
        tracing::error!(%message, "task panicked");
    }

    let caller = RESUME_POINT.with(|cell| cell.take()).unwrap_or_else(|| {
        panic!("fiber finished without a resume point; did it call yield_now and never return?")
    });
    // Safety: `caller` is the scheduler's resume point captured above (or
    // restored by the most recent `yield_now`); this is the last context
    // switch this fiber ever performs, so `resume` not returning here is the
    // expected outcome (the scheduler must never resume a finished fiber).
    let _: Transfer = unsafe { caller.resume(DATA_FINISHED) };
    unreachable!("a finished fiber must never be resumed again");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::StackPool;
    use std::{cell::RefCell, rc::Rc};

    fn new_stack() -> AcquiredStack {
        let mut pool = StackPool::new(256 * 1024, false, 0, 4, 4);
        pool.acquire().unwrap()
    }

    #[test]
    fn runs_to_completion_without_yielding() {
        let ran = Rc::new(RefCell::new(false));
        let ran2 = ran.clone();
        let mut fiber = Fiber::spawn(new_stack(), move || {
            *ran2.borrow_mut() = true;
        });
        assert_eq!(fiber.resume(), FiberState::Finished);
        assert!(*ran.borrow());
    }

    #[test]
    fn yield_and_resume_preserves_locals() {
        let trace = Rc::new(RefCell::new(Vec::new()));
        let trace2 = trace.clone();
        let mut fiber = Fiber::spawn(new_stack(), move || {
            let local = 41;
            trace2.borrow_mut().push("before-yield");
            yield_now();
            trace2.borrow_mut().push("after-yield");
            assert_eq!(local + 1, 42);
        });
        // First `resume` inside `spawn` already ran up to the `yield_now`.
        assert_eq!(*trace.borrow(), vec!["before-yield"]);
        assert_eq!(fiber.resume(), FiberState::Finished);
        assert_eq!(*trace.borrow(), vec!["before-yield", "after-yield"]);
    }

    #[test]
    fn panic_inside_fiber_is_caught() {
        let fiber = Fiber::spawn(new_stack(), || panic!("boom"));
        assert!(fiber.is_finished());
    }
}
