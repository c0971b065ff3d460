use crate::file::WriteStatus;
use loom_eventloop::{CompletionSource, TaskHandle};
use loom_signal::{ObjectId, Signal};
use std::{
    cell::{Cell, RefCell},
    io,
    process::{ChildStdin, Command, Stdio},
    rc::Rc,
};

enum ProcMsg {
    Chunk(io::Result<Vec<u8>>),
    Exited(i32),
    WriteDone(io::Result<usize>, ChildStdin),
}

/// A child process whose stdout is presented as a `ready-read` signal
/// carrying each chunk, and whose stdin accepts fire-and-monitor writes,
/// reusing [`crate::file::WriteStatus`] (§4.D: "child process... reuse the
/// same primitives" as the file device).
///
/// Chunks arrive from a dedicated reader thread rather than through
/// `IoCore`'s `mio::Poll`: putting a pipe fd's non-blocking flag under
/// `mio` needs raw `fcntl`, which would pull in a `libc`-family dependency
/// absent from every crate in the pack. A worker thread per child, the same
/// shape `IoCore::start_lookup` already uses for DNS, keeps the dependency
/// stack unchanged.
pub struct ChildProcess {
    stdin: RefCell<Option<ChildStdin>>,
    tx: crossbeam_channel::Sender<ProcMsg>,
    rx: crossbeam_channel::Receiver<ProcMsg>,
    write_in_flight: Cell<bool>,
    write_status: RefCell<Option<Rc<WriteStatus>>>,
    pub ready_read: Signal<Vec<u8>>,
    pub exited: Signal<i32>,
}

impl ChildProcess {
    pub fn spawn(handle: TaskHandle, mut command: Command) -> io::Result<Rc<Self>> {
        let mut child = command.stdin(Stdio::piped()).stdout(Stdio::piped()).spawn()?;
        let mut stdout = child.stdout.take().expect("stdout was piped");
        let stdin = child.stdin.take();
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = ObjectId::new();

        let reader_tx = tx.clone();
        std::thread::spawn(move || {
            use io::Read;
            let mut buf = [0u8; 4096];
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if reader_tx.send(ProcMsg::Chunk(Ok(buf[..n].to_vec()))).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = reader_tx.send(ProcMsg::Chunk(Err(e)));
                        break;
                    }
                }
            }
        });

        let wait_tx = tx.clone();
        std::thread::spawn(move || {
            let code = child.wait().ok().and_then(|s| s.code()).unwrap_or(-1);
            let _ = wait_tx.send(ProcMsg::Exited(code));
        });

        Ok(Rc::new(Self {
            stdin: RefCell::new(stdin),
            tx,
            rx,
            write_in_flight: Cell::new(false),
            write_status: RefCell::new(None),
            ready_read: Signal::new(id, handle.clone()),
            exited: Signal::new(id, handle),
        }))
    }

    /// Starts a fire-and-monitor write to the child's stdin. Returns `None`
    /// if a write is already in flight, or stdin was never piped / already
    /// closed.
    pub fn write_async(&self, data: Vec<u8>) -> Option<Rc<WriteStatus>> {
        if self.write_in_flight.replace(true) {
            return None;
        }
        let Some(mut stdin) = self.stdin.borrow_mut().take() else {
            self.write_in_flight.set(false);
            return None;
        };
        let status = Rc::new(WriteStatus::default());
        *self.write_status.borrow_mut() = Some(status.clone());
        let tx = self.tx.clone();
        std::thread::spawn(move || {
            use io::Write;
            let result = stdin.write(&data);
            let _ = tx.send(ProcMsg::WriteDone(result, stdin));
        });
        Some(status)
    }
}

impl CompletionSource for ChildProcess {
    fn poll_completions(&self, _handle: &TaskHandle) {
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                ProcMsg::Chunk(Ok(bytes)) => self.ready_read.emit(bytes),
                ProcMsg::Chunk(Err(e)) => {
                    tracing::error!(error = %e, "child stdout read failed");
                }
                ProcMsg::Exited(code) => self.exited.emit(code),
                ProcMsg::WriteDone(result, stdin) => {
                    self.write_in_flight.set(false);
                    *self.stdin.borrow_mut() = Some(stdin);
                    if let Some(status) = self.write_status.borrow_mut().take() {
                        status.done.set(true);
                        *status.result.borrow_mut() = Some(result);
                    }
                }
            }
        }
    }
}
