use crate::Error;
use serde_json::{json, Value};

/// Builds the newline-delimited JSON frames of §6: an `init` frame
/// identifying the application, followed by any number of `log` frames.
/// Framing only; sending the bytes over a `loom_io::TcpSocket` is the
/// caller's job, same as the rest of this crate's thin collaborators.
pub struct FrameWriter {
    app_name: String,
    version: String,
    pid: u32,
}

impl FrameWriter {
    pub fn new(app_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            version: version.into(),
            pid: std::process::id(),
        }
    }

    /// The first frame a collaborator should send after connecting.
    pub fn init_frame(&self) -> Vec<u8> {
        self.encode(json!({
            "type": "init",
            "appName": self.app_name,
            "version": self.version,
            "pid": self.pid,
        }))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_frame(&self, level: &str, file: &str, line: u32, function: &str, message: &str) -> Vec<u8> {
        self.encode(json!({
            "type": "log",
            "appName": self.app_name,
            "version": self.version,
            "pid": self.pid,
            "level": level,
            "file": file,
            "line": line,
            "function": function,
            "message": message,
        }))
    }

    fn encode(&self, value: Value) -> Vec<u8> {
        let mut bytes = serde_json::to_vec(&value).expect("json::Value always serialises");
        bytes.push(b'\n');
        bytes
    }
}

/// Accumulates bytes arriving from a socket's `ready_read` signal and
/// yields each complete newline-delimited frame as a parsed [`Value`].
#[derive(Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Value>, Error> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            if line.is_empty() {
                continue;
            }
            frames.push(serde_json::from_slice(line).map_err(Error::MalformedFrame)?);
        }
        Ok(frames)
    }
}
