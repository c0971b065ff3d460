use crate::{handle::CrossThreadMsg, timer::TimerSet, SuspensionToken, TaskHandle, TaskId};
use loom_task::Fiber;
use rustc_hash::FxHashMap;
use std::{collections::VecDeque, rc::Rc};

/// A job handed to a freshly spawned or resumed task. Receives its own
/// [`TaskHandle`] explicitly rather than reaching for a thread-local
/// "current loop" -- see the design note on explicit context passing.
pub type Job = Box<dyn FnOnce(TaskHandle)>;

pub(crate) enum ReadyItem {
    Spawn(Job),
    Resume(SuspensionToken),
}

pub(crate) struct ParkedTask {
    pub id: TaskId,
    pub fiber: Fiber,
}

pub(crate) struct SuspendedEntry {
    pub task: ParkedTask,
    pub queued_for_resume: bool,
}

/// Per-iteration hook for an external completion source (step 4). `loom-io`
/// implements this to drain a `mio::Poll` and turn completions into signals
/// or unyields.
pub trait CompletionSource {
    fn poll_completions(&self, handle: &TaskHandle);
}

pub(crate) struct SharedState {
    pub ready: VecDeque<ReadyItem>,
    pub suspended: FxHashMap<SuspensionToken, SuspendedEntry>,
    pub pending_resume: Vec<SuspensionToken>,
    pub pending_yield: Option<SuspensionToken>,
    pub timers: TimerSet,
    pub stack_pool: loom_task::StackPool,
    pub quit: Option<i32>,
    pub completion_sources: Vec<Rc<dyn CompletionSource>>,
    // Lets any `TaskHandle` mint a cross-thread `Handle` on demand (used by
    // `loom-io`'s host-lookup thread to post its result back).
    pub sender: crossbeam_channel::Sender<CrossThreadMsg>,
}

impl SharedState {
    pub fn new(
        stack_pool: loom_task::StackPool,
        sender: crossbeam_channel::Sender<CrossThreadMsg>,
    ) -> Self {
        Self {
            ready: VecDeque::new(),
            suspended: FxHashMap::default(),
            pending_resume: Vec::new(),
            pending_yield: None,
            timers: TimerSet::default(),
            stack_pool,
            quit: None,
            completion_sources: Vec::new(),
            sender,
        }
    }
}
