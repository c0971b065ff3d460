use crate::{
    shared::{Job, ReadyItem, SharedState},
    timer::Timer,
    Handle, SuspensionToken, TimerId,
};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::{Duration, Instant},
};

/// The in-loop handle passed to every spawned task and timer body. Cheap to
/// clone (an `Rc` clone); not `Send` -- framework-owned state never leaves
/// the loop thread (§5). The one `Send + Sync` surface is [`crate::Handle`].
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) shared: Rc<RefCell<SharedState>>,
}

impl TaskHandle {
    pub(crate) fn new(shared: Rc<RefCell<SharedState>>) -> Self {
        Self { shared }
    }

    /// Enqueues a closure to run as a fresh task in a later iteration.
    pub fn post(&self, job: impl FnOnce(TaskHandle) + 'static) {
        self.shared
            .borrow_mut()
            .ready
            .push_back(ReadyItem::Spawn(Box::new(job)));
    }

    pub(crate) fn post_boxed(&self, job: Job) {
        self.shared.borrow_mut().ready.push_back(ReadyItem::Spawn(job));
    }

    /// Registers a recurring (or single-shot) timer, returning a stable id.
    pub fn add_timer(
        &self,
        interval: Duration,
        single_shot: bool,
        body: impl FnMut(TaskHandle) + 'static,
    ) -> TimerId {
        let id = TimerId::mint();
        self.shared.borrow_mut().timers.insert(Timer {
            id,
            interval,
            single_shot,
            last_fire: Instant::now(),
            body: Rc::new(RefCell::new(body)),
        });
        id
    }

    /// Unregisters a timer. Idempotent.
    pub fn remove_timer(&self, id: TimerId) {
        self.shared.borrow_mut().timers.remove(id);
    }

    /// Mints a fresh suspension token. Call before suspending so that
    /// whoever will wake this task (a timer, a completion hook, another
    /// task) has the token in hand first.
    pub fn mint_token(&self) -> SuspensionToken {
        SuspensionToken::mint()
    }

    /// Suspends the currently running task under `token`, returning control
    /// to the loop. Resumes with all local state intact once some caller
    /// invokes [`TaskHandle::unyield`] with the same token.
    ///
    /// # Panics
    /// Panics if called outside of a running task.
    pub fn suspend_on(&self, token: SuspensionToken) {
        self.try_suspend_on(token)
            .expect("suspend_on called outside of a running task");
    }

    /// Like [`TaskHandle::suspend_on`], but fails instead of panicking when
    /// called from outside a running fiber -- e.g. an I/O completion hook
    /// dispatched directly from the loop's own call stack rather than
    /// through a spawned task.
    pub fn try_suspend_on(&self, token: SuspensionToken) -> Result<(), crate::Error> {
        if !loom_task::is_in_fiber() {
            return Err(crate::Error::BlockingFromOutsideLoop);
        }
        self.shared.borrow_mut().pending_yield = Some(token);
        loom_task::yield_now();
        Ok(())
    }

    /// Marks the task suspended under `token` ready to resume. A no-op if
    /// `token` is unknown or was already unyielded (idempotent by design,
    /// see `SPEC_FULL.md` §9).
    pub fn unyield(&self, token: SuspensionToken) {
        let mut shared = self.shared.borrow_mut();
        if let Some(entry) = shared.suspended.get_mut(&token) {
            if !entry.queued_for_resume {
                entry.queued_for_resume = true;
                shared.pending_resume.push(token);
            }
        }
    }

    /// Requests termination of the owning loop with exit code 0.
    pub fn quit(&self) {
        self.exit(0);
    }

    /// Requests termination of the owning loop with the given exit code.
    pub fn exit(&self, code: i32) {
        self.shared.borrow_mut().quit = Some(code);
    }

    /// Builds a nested wait-loop facade: `exec()` suspends the current task
    /// until `quit`/`exit` is called on the *same* `NestedLoop` value. There
    /// is only ever one real scheduler; nesting is sugar over yield/unyield
    /// (see `SPEC_FULL.md` §9, "every higher-level wait reduces to yield +
    /// someone calling unyield").
    pub fn nested_loop(&self) -> NestedLoop {
        NestedLoop::new(self.clone())
    }

    /// Mints a cross-thread [`Handle`] equivalent to the one returned by
    /// `EventLoop::handle`. Used by code that must hand work off to another
    /// OS thread (e.g. `loom-io`'s synchronous DNS lookup) and post the
    /// result back.
    pub fn to_handle(&self) -> Handle {
        Handle::new(self.shared.borrow().sender.clone())
    }
}

/// A modal, re-entrant wait scoped to one logical "inner loop". See
/// [`TaskHandle::nested_loop`].
pub struct NestedLoop {
    handle: TaskHandle,
    active_token: Cell<Option<SuspensionToken>>,
    exit_code: Cell<Option<i32>>,
}

impl NestedLoop {
    fn new(handle: TaskHandle) -> Self {
        Self {
            handle,
            active_token: Cell::new(None),
            exit_code: Cell::new(None),
        }
    }

    /// Suspends the calling task until `quit`/`exit` is invoked on this same
    /// `NestedLoop`. Returns the exit code passed to `exit`, or 0 for `quit`.
    pub fn exec(&self) -> i32 {
        let token = self.handle.mint_token();
        self.active_token.set(Some(token));
        self.handle.suspend_on(token);
        self.active_token.set(None);
        self.exit_code.take().unwrap_or(0)
    }

    pub fn quit(&self) {
        self.exit(0);
    }

    pub fn exit(&self, code: i32) {
        if let Some(token) = self.active_token.get() {
            self.exit_code.set(Some(code));
            self.handle.unyield(token);
        }
    }
}
