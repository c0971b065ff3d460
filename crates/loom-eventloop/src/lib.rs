//! The cooperative single-threaded event loop: ready queue, timers, and the
//! suspended-task table, built directly on `loom-task`'s fiber primitive.
//!
//! See `SPEC_FULL.md` §4.B for the iteration algorithm this module
//! implements step by step in [`EventLoop::process_once`].

mod error;
mod handle;
mod shared;
mod task_handle;
mod timer;
mod token;

pub use error::Error;
pub use handle::Handle;
pub use loom_task::TaskId;
pub use shared::CompletionSource;
pub use task_handle::{NestedLoop, TaskHandle};
pub use token::{SuspensionToken, TimerId};

use handle::CrossThreadMsg;
use shared::{ReadyItem, SharedState};
use std::{
    cell::RefCell,
    rc::Rc,
    time::{Duration, Instant},
};

/// Iterations never report a recommended sleep longer than this, so a
/// `process_once(true)` caller driving its own loop never starves a
/// just-about-to-arrive timer by more than 10ms (§4.B step 5).
const MAX_RECOMMENDED_SLEEP: Duration = Duration::from_millis(10);

/// How long a blocking wait (step 1) waits on the cross-thread mailbox
/// before giving `process_once` a chance to re-evaluate; bounds the cost of
/// a loop shutting down from another thread without the caller observing
/// the shutdown for a full, possibly much longer, wait.
const BLOCKING_WAIT_SLICE: Duration = Duration::from_millis(50);

/// Default preallocation knobs for the task stack pool; a demo or test that
/// needs a different shape builds `EventLoop::with_stack_pool` instead.
const DEFAULT_STACK_SIZE: usize = 256 * 1024;
const DEFAULT_PREALLOCATED_STACKS: usize = 4;
const DEFAULT_TARGET_STACKS: usize = 32;
const DEFAULT_MAX_STACKS: usize = 4096;

pub struct EventLoop {
    shared: Rc<RefCell<SharedState>>,
    task_handle: TaskHandle,
    receiver: crossbeam_channel::Receiver<CrossThreadMsg>,
    sender: crossbeam_channel::Sender<CrossThreadMsg>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        let pool = loom_task::StackPool::new(
            DEFAULT_STACK_SIZE,
            true,
            DEFAULT_PREALLOCATED_STACKS,
            DEFAULT_TARGET_STACKS,
            DEFAULT_MAX_STACKS,
        );
        Self::with_stack_pool(pool)
    }

    pub fn with_stack_pool(pool: loom_task::StackPool) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let shared = Rc::new(RefCell::new(SharedState::new(pool, sender.clone())));
        let task_handle = TaskHandle::new(shared.clone());
        tracing::trace!("constructed event loop");
        Self {
            shared,
            task_handle,
            receiver,
            sender,
        }
    }

    /// A cloneable, `Send + Sync` handle usable to `post`/`request_quit`
    /// from another OS thread.
    pub fn handle(&self) -> Handle {
        Handle::new(self.sender.clone())
    }

    /// The in-loop task handle, usable to `post`/`add_timer`/etc. from
    /// setup code running on the loop thread before the first `run`.
    pub fn task_handle(&self) -> TaskHandle {
        self.task_handle.clone()
    }

    /// Registers an async I/O completion source (§4.D); `loom-io` calls
    /// this once per `loom_io::IoCore`.
    pub fn register_completion_source(&self, source: Rc<dyn CompletionSource>) {
        self.shared.borrow_mut().completion_sources.push(source);
    }

    /// Runs until `quit`/`exit` is called, returning the exit code.
    pub fn run(&self) -> i32 {
        loop {
            self.process_once(true);
            if let Some(code) = self.take_quit() {
                return code;
            }
        }
    }

    /// Runs until `quit`/`exit`, or until `max` wall-clock time elapses,
    /// whichever comes first. Returns the exit code, or 0 on timeout.
    pub fn run_for(&self, max: Duration) -> i32 {
        let deadline = Instant::now() + max;
        loop {
            if Instant::now() >= deadline {
                return self.take_quit().unwrap_or(0);
            }
            let sleep = self.process_once(false);
            if let Some(code) = self.take_quit() {
                return code;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(sleep.min(remaining));
        }
    }

    /// Runs exactly one iteration of §4.B's algorithm, returning the
    /// recommended sleep before the next call.
    pub fn process_once(&self, block: bool) -> Duration {
        self.drain_cross_thread();

        // Step 1.
        let should_block = block
            && self.shared.borrow().ready.is_empty()
            && self.shared.borrow().timers.is_empty();
        if should_block {
            self.block_until_work();
            self.drain_cross_thread();
        }

        // Step 2.
        let item = self.shared.borrow_mut().ready.pop_front();
        if let Some(item) = item {
            self.run_ready_item(item);
        }

        // Step 3.
        let now = Instant::now();
        let handle = self.task_handle.clone();
        let min_timer = {
            let mut shared = self.shared.borrow_mut();
            let SharedState { timers, ready, .. } = &mut *shared;
            timers.fire_ready(now, |job| ready.push_back(ReadyItem::Spawn(job)))
        };

        // Step 4: drain ready OS completions, non-blocking.
        let sources = self.shared.borrow().completion_sources.clone();
        for source in sources {
            source.poll_completions(&handle);
        }

        // Step 5: drain pending resume-tokens, then report the sleep hint.
        {
            let mut shared = self.shared.borrow_mut();
            let pending = std::mem::take(&mut shared.pending_resume);
            for token in pending {
                shared.ready.push_back(ReadyItem::Resume(token));
            }
        }
        min_timer
            .map(|d| d.min(MAX_RECOMMENDED_SLEEP))
            .unwrap_or(MAX_RECOMMENDED_SLEEP)
    }

    fn take_quit(&self) -> Option<i32> {
        self.shared.borrow_mut().quit.take()
    }

    fn drain_cross_thread(&self) {
        while let Ok(msg) = self.receiver.try_recv() {
            match msg {
                CrossThreadMsg::Post(job) => self.task_handle.post(move |h| job(h)),
                CrossThreadMsg::RequestQuit(code) => {
                    self.shared.borrow_mut().quit = Some(code);
                }
            }
        }
    }

    fn block_until_work(&self) {
        match self.receiver.recv_timeout(BLOCKING_WAIT_SLICE) {
            Ok(msg) => match msg {
                CrossThreadMsg::Post(job) => self.task_handle.post(move |h| job(h)),
                CrossThreadMsg::RequestQuit(code) => {
                    self.shared.borrow_mut().quit = Some(code);
                }
            },
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                tracing::error!("event loop mailbox disconnected while waiting");
            }
        }
    }

    fn run_ready_item(&self, item: ReadyItem) {
        match item {
            ReadyItem::Spawn(job) => {
                let stack = match self.shared.borrow_mut().stack_pool.acquire() {
                    Ok(stack) => stack,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to acquire a task stack, dropping job");
                        return;
                    }
                };
                let id = TaskId::next();
                let handle = self.task_handle.clone();
                tracing::trace!(%id, "spawning task");
                let fiber = loom_task::Fiber::spawn(stack, move || job(handle));
                self.finish_or_park(id, fiber);
            }
            ReadyItem::Resume(token) => {
                let entry = self.shared.borrow_mut().suspended.remove(&token);
                let Some(entry) = entry else {
                    return;
                };
                tracing::trace!(%token, id = %entry.task.id, "resuming task");
                let mut fiber = entry.task.fiber;
                match fiber.resume() {
                    loom_task::FiberState::Finished => self.release_fiber(fiber),
                    loom_task::FiberState::Suspended => self.park(entry.task.id, fiber),
                }
            }
        }
    }

    fn finish_or_park(&self, id: TaskId, fiber: loom_task::Fiber) {
        if fiber.is_finished() {
            self.release_fiber(fiber);
        } else {
            self.park(id, fiber);
        }
    }

    fn park(&self, id: TaskId, fiber: loom_task::Fiber) {
        let mut shared = self.shared.borrow_mut();
        let token = shared
            .pending_yield
            .take()
            .unwrap_or_else(|| panic!("task {id} suspended without a pending suspension token"));
        shared.suspended.insert(
            token,
            shared::SuspendedEntry {
                task: shared::ParkedTask { id, fiber },
                queued_for_resume: false,
            },
        );
    }

    fn release_fiber(&self, fiber: loom_task::Fiber) {
        if let Ok(stack) = fiber.into_stack() {
            self.shared.borrow_mut().stack_pool.release(stack);
        }
    }
}
