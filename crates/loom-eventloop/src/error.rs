/// Errors raised by the event loop.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the loop's wait condition failed: {0}")]
    Wait(String),
    #[error("blocking emit requested from outside the loop thread")]
    BlockingFromOutsideLoop,
    #[error(transparent)]
    Task(#[from] loom_task::Error),
}
