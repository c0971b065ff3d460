use crate::TaskHandle;
use crossbeam_channel::Sender;

pub(crate) enum CrossThreadMsg {
    Post(Box<dyn FnOnce(TaskHandle) + Send>),
    RequestQuit(i32),
}

/// The only `Send + Sync` surface of an [`crate::EventLoop`]: a cloneable
/// mailbox used to inject work or request termination from another OS
/// thread. Modeled directly on the reference workspace's
/// `EventLoopHandle` -- a thin wrapper around channel senders, never around
/// the loop's actual (thread-confined) state.
#[derive(Clone)]
pub struct Handle {
    sender: Sender<CrossThreadMsg>,
}

impl Handle {
    pub(crate) fn new(sender: Sender<CrossThreadMsg>) -> Self {
        Self { sender }
    }

    /// Enqueues `job` to run as a fresh task on the loop thread. The only
    /// cross-thread entry point into the loop (§4.B).
    pub fn post(&self, job: impl FnOnce(TaskHandle) + Send + 'static) {
        // A full mailbox means the loop has shut down; dropping the job is
        // the only sound choice since there is nowhere left to run it.
        let _ = self.sender.send(CrossThreadMsg::Post(Box::new(job)));
    }

    /// Requests termination of the loop with the given exit code. Safe to
    /// call from any thread; a no-op if the loop has already stopped.
    pub fn request_quit(&self, code: i32) {
        let _ = self.sender.send(CrossThreadMsg::RequestQuit(code));
    }
}
