/// Errors raised by the I/O core's registration and polling machinery.
///
/// Failures that occur on an individual handle during normal operation (a
/// read, a write, a connect) are reported as `error-occurred(code)` signals
/// per `SPEC_FULL.md` §7, not through this type -- this `Error` covers only
/// the completion facility itself (registering with `mio`, building the
/// poller), which has no signal to report through.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to create the completion facility: {0}")]
    PollInit(#[source] std::io::Error),
    #[error("failed to register a handle with the completion facility: {0}")]
    Register(#[source] std::io::Error),
    #[error("failed to poll the completion facility: {0}")]
    Poll(#[source] std::io::Error),
}
