use loom_eventloop::{CompletionSource, TaskHandle};
use rustc_hash::FxHashMap;
use std::{
    cell::{Cell, RefCell},
    io,
    path::PathBuf,
    rc::Rc,
};

/// `mio` does not make regular files pollable (they are always
/// "ready" under epoll/kqueue), so the file device dispatches each
/// operation to a one-shot worker thread instead of registering with
/// `IoCore`, the same off-loop-thread shape as `IoCore::start_lookup`.
enum OpMsg {
    Read { id: u64, result: io::Result<Vec<u8>> },
    Write { result: io::Result<usize> },
}

/// Result of a fire-and-monitor write (§4.D): `is_done` flips once the
/// worker thread reports back; the caller ticks the loop between checks
/// instead of blocking on it directly.
#[derive(Default)]
pub struct WriteStatus {
    pub(crate) done: Cell<bool>,
    pub(crate) result: RefCell<Option<io::Result<usize>>>,
}

impl WriteStatus {
    pub fn is_done(&self) -> bool {
        self.done.get()
    }

    /// Takes the result once `is_done()` is true. Subsequent calls see
    /// `None`, matching the flag being a one-shot completion signal.
    pub fn take_result(&self) -> Option<io::Result<usize>> {
        self.result.borrow_mut().take()
    }
}

/// A file opened for async-style read/write via a worker-thread pool of
/// one. Registered as a [`CompletionSource`] so its results are delivered
/// from the loop thread during step 4 of each iteration.
pub struct FileDevice {
    path: PathBuf,
    tx: crossbeam_channel::Sender<OpMsg>,
    rx: crossbeam_channel::Receiver<OpMsg>,
    next_id: Cell<u64>,
    pending_reads: RefCell<FxHashMap<u64, Box<dyn FnOnce(io::Result<Vec<u8>>)>>>,
    write_in_flight: Cell<bool>,
    write_status: RefCell<Option<Rc<WriteStatus>>>,
}

impl FileDevice {
    pub fn new(path: impl Into<PathBuf>) -> Rc<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        Rc::new(Self {
            path: path.into(),
            tx,
            rx,
            next_id: Cell::new(0),
            pending_reads: RefCell::new(FxHashMap::default()),
            write_in_flight: Cell::new(false),
            write_status: RefCell::new(None),
        })
    }

    /// Posts a read request with an owned buffer; `on_complete` runs from a
    /// later `poll_completions` with the actual bytes transferred, or an
    /// error. There is no internal read buffer held across calls.
    pub fn read_async(&self, size: usize, offset: u64, on_complete: impl FnOnce(io::Result<Vec<u8>>) + 'static) {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.pending_reads.borrow_mut().insert(id, Box::new(on_complete));
        let tx = self.tx.clone();
        let path = self.path.clone();
        std::thread::spawn(move || {
            use std::io::{Read, Seek, SeekFrom};
            let result = std::fs::File::open(&path).and_then(|mut f| {
                f.seek(SeekFrom::Start(offset))?;
                let mut buf = vec![0u8; size];
                let n = f.read(&mut buf)?;
                buf.truncate(n);
                Ok(buf)
            });
            let _ = tx.send(OpMsg::Read { id, result });
        });
    }

    /// Starts a fire-and-monitor write. Returns `None` if a write is
    /// already in flight on this handle (only one at a time, per §4.D).
    pub fn write_async(&self, offset: u64, data: Vec<u8>) -> Option<Rc<WriteStatus>> {
        if self.write_in_flight.replace(true) {
            return None;
        }
        let status = Rc::new(WriteStatus::default());
        *self.write_status.borrow_mut() = Some(status.clone());
        let tx = self.tx.clone();
        let path = self.path.clone();
        std::thread::spawn(move || {
            use std::io::{Seek, SeekFrom, Write};
            let result = std::fs::OpenOptions::new().write(true).open(&path).and_then(|mut f| {
                f.seek(SeekFrom::Start(offset))?;
                f.write(&data)
            });
            let _ = tx.send(OpMsg::Write { result });
        });
        Some(status)
    }
}

impl CompletionSource for FileDevice {
    fn poll_completions(&self, _handle: &TaskHandle) {
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                OpMsg::Read { id, result } => {
                    if let Some(cb) = self.pending_reads.borrow_mut().remove(&id) {
                        cb(result);
                    }
                }
                OpMsg::Write { result } => {
                    self.write_in_flight.set(false);
                    if let Some(status) = self.write_status.borrow_mut().take() {
                        status.done.set(true);
                        *status.result.borrow_mut() = Some(result);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_eventloop::EventLoop;
    use std::{cell::RefCell as StdRefCell, io::Write as _, time::Duration};

    #[test]
    fn write_then_read_back_round_trips() {
        let lp = EventLoop::new();
        let path = std::env::temp_dir().join(format!("loom-io-test-{:?}", std::thread::current().id()));
        std::fs::File::create(&path).unwrap();

        let device = FileDevice::new(&path);
        lp.register_completion_source(device.clone());

        let status = device.write_async(0, b"abc123".to_vec()).unwrap();
        while !status.is_done() {
            lp.process_once(false);
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(status.take_result().unwrap().unwrap(), 6);

        let received = Rc::new(StdRefCell::new(None));
        let received2 = received.clone();
        device.read_async(6, 0, move |r| *received2.borrow_mut() = Some(r));
        loop {
            lp.process_once(false);
            if received.borrow().is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(received.borrow().as_ref().unwrap().as_ref().unwrap(), b"abc123");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn second_write_is_rejected_while_one_in_flight() {
        let device = FileDevice::new(std::env::temp_dir().join("loom-io-nonexistent-dir-x/f"));
        assert!(device.write_async(0, vec![1]).is_some());
        assert!(device.write_async(0, vec![2]).is_none());
    }
}
