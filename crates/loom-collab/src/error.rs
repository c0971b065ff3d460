use std::io;

/// Error surface for the external-interface collaborators. Kept separate
/// from `loom_io::Error` and `loom_eventloop::Error` per §7's per-crate
/// granularity, even though most of what lives here is a thin pass-through.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed debug-channel frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    #[error("http response was not well-formed: {0}")]
    MalformedResponse(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
