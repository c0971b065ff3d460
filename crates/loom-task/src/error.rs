/// Errors raised by the stack pool and fiber primitives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("stack pool exhausted: already at max_allocated = {max}")]
    StackPoolExhausted { max: usize },
    #[error("failed to allocate a fiber stack: {0}")]
    StackAlloc(String),
    #[error("fiber already finished")]
    FiberFinished,
}
