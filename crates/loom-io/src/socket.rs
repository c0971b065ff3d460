use crate::{
    completion::{CompletionHook, IoCore, LookupCompletion},
    wait::spin_wait,
};
use loom_eventloop::TaskHandle;
use loom_signal::{ObjectId, Signal};
use mio::Interest;
use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::SocketAddr,
    rc::{Rc, Weak},
    time::Duration,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unconnected,
    HostLookup,
    Connecting,
    Connected,
    Closing,
}

/// A buffered, non-blocking TCP socket driven by `IoCore`'s `mio` poller.
/// See `SPEC_FULL.md` §4.D for the state diagram this type implements.
pub struct TcpSocket {
    io: Rc<IoCore>,
    handle: TaskHandle,
    id: ObjectId,
    self_weak: std::cell::RefCell<Weak<TcpSocket>>,
    state: std::cell::RefCell<State>,
    stream: std::cell::RefCell<Option<mio::net::TcpStream>>,
    token: std::cell::Cell<Option<mio::Token>>,
    write_buffer: std::cell::RefCell<VecDeque<u8>>,

    pub connected: Signal<()>,
    pub disconnected: Signal<()>,
    pub ready_read: Signal<()>,
    pub write_finished: Signal<()>,
    pub error_occurred: Signal<i32>,
}

fn io_error_code(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(-1)
}

impl TcpSocket {
    pub fn new(io: Rc<IoCore>, handle: TaskHandle) -> Rc<Self> {
        let id = ObjectId::new();
        let socket = Rc::new(Self {
            io,
            handle: handle.clone(),
            id,
            self_weak: std::cell::RefCell::new(Weak::new()),
            state: std::cell::RefCell::new(State::Unconnected),
            stream: std::cell::RefCell::new(None),
            token: std::cell::Cell::new(None),
            write_buffer: std::cell::RefCell::new(VecDeque::new()),
            connected: Signal::new(id, handle.clone()),
            disconnected: Signal::new(id, handle.clone()),
            ready_read: Signal::new(id, handle.clone()),
            write_finished: Signal::new(id, handle.clone()),
            error_occurred: Signal::new(id, handle),
        });
        *socket.self_weak.borrow_mut() = Rc::downgrade(&socket);
        socket
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.state.borrow(), State::Connected)
    }

    /// Starts the `unconnected -> host-lookup -> connecting -> connected`
    /// sequence. Returns `false` (bad-state, no signal) if not currently
    /// `unconnected`.
    pub fn connect_to_host(self: &Rc<Self>, host: impl Into<String>, port: u16) -> bool {
        if !matches!(*self.state.borrow(), State::Unconnected) {
            return false;
        }
        *self.state.borrow_mut() = State::HostLookup;
        let completion: Rc<dyn LookupCompletion> = self.clone();
        self.io.start_lookup(self.id, host.into(), port, completion);
        true
    }

    /// Adopts an already-connected handle (e.g. one accepted elsewhere),
    /// entering `connected` directly. Returns `false` if not `unconnected`.
    pub fn adopt(self: &Rc<Self>, stream: std::net::TcpStream) -> bool {
        if !matches!(*self.state.borrow(), State::Unconnected) {
            return false;
        }
        let mut mio_stream = mio::net::TcpStream::from_std(stream);
        let hook: Rc<dyn CompletionHook> = self.clone();
        match self.io.register(&mut mio_stream, Interest::READABLE, hook) {
            Ok(token) => {
                self.token.set(Some(token));
                *self.stream.borrow_mut() = Some(mio_stream);
                *self.state.borrow_mut() = State::Connected;
                self.connected.emit(());
                true
            }
            Err(crate::Error::Register(e)) => {
                self.error_occurred.emit(io_error_code(&e));
                false
            }
            Err(_) => {
                self.error_occurred.emit(-1);
                false
            }
        }
    }

    /// One non-blocking OS read of up to `min(max, 1024)` bytes. Empty
    /// means "no data right now", not closed; a zero-byte OS read (peer
    /// half-close) drives the socket to `closing`.
    pub fn read(&self, max: usize) -> Vec<u8> {
        if !matches!(*self.state.borrow(), State::Connected) {
            return Vec::new();
        }
        let cap = max.min(1024);
        let mut buf = vec![0u8; cap];
        let mut stream_ref = self.stream.borrow_mut();
        let Some(stream) = stream_ref.as_mut() else {
            return Vec::new();
        };
        match stream.read(&mut buf) {
            Ok(0) => {
                drop(stream_ref);
                self.transition_to_closing();
                Vec::new()
            }
            Ok(n) => {
                buf.truncate(n);
                buf
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Vec::new(),
            Err(e) => {
                drop(stream_ref);
                self.fail(e);
                Vec::new()
            }
        }
    }

    /// Appends `bytes` to the write buffer and attempts an immediate flush.
    /// Returns `false` (bad-state, no signal) if not `connected`.
    pub fn write(&self, bytes: &[u8]) -> bool {
        if !matches!(*self.state.borrow(), State::Connected) {
            return false;
        }
        self.write_buffer.borrow_mut().extend(bytes.iter().copied());
        self.try_flush();
        true
    }

    pub fn close(&self) -> bool {
        if matches!(*self.state.borrow(), State::Unconnected) {
            return false;
        }
        self.transition_to_closing();
        true
    }

    pub fn wait_for_connected(self: &Rc<Self>, timeout: Duration) -> bool {
        let this = self.clone();
        spin_wait(&self.handle, timeout, move || this.is_connected())
    }

    pub fn wait_for_bytes_written(self: &Rc<Self>, timeout: Duration) -> bool {
        let this = self.clone();
        spin_wait(&self.handle, timeout, move || this.write_buffer.borrow().is_empty())
    }

    fn try_flush(&self) {
        let mut buf = self.write_buffer.borrow_mut();
        if buf.is_empty() {
            return;
        }
        let mut stream_ref = self.stream.borrow_mut();
        let Some(stream) = stream_ref.as_mut() else {
            return;
        };
        let contiguous = buf.make_contiguous();
        match stream.write(contiguous) {
            Ok(0) => {}
            Ok(n) => {
                buf.drain(..n);
                let now_empty = buf.is_empty();
                drop(buf);
                drop(stream_ref);
                self.update_interest();
                if now_empty {
                    self.write_finished.emit(());
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                drop(buf);
                drop(stream_ref);
                self.fail(e);
            }
        }
    }

    fn update_interest(&self) {
        let interest = if self.write_buffer.borrow().is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        if let (Some(stream), Some(token)) =
            (self.stream.borrow_mut().as_mut(), self.token.get())
        {
            let _ = self.io.reregister(stream, token, interest);
        }
    }

    fn begin_connecting(self: &Rc<Self>, addr: SocketAddr) {
        match mio::net::TcpStream::connect(addr) {
            Ok(mut stream) => {
                *self.state.borrow_mut() = State::Connecting;
                let hook: Rc<dyn CompletionHook> = self.clone();
                match self
                    .io
                    .register(&mut stream, Interest::READABLE | Interest::WRITABLE, hook)
                {
                    Ok(token) => {
                        self.token.set(Some(token));
                        *self.stream.borrow_mut() = Some(stream);
                    }
                    Err(crate::Error::Register(e)) => self.fail(e),
                    Err(_) => self.fail(io::Error::other("registration failed")),
                }
            }
            Err(e) => self.fail(e),
        }
    }

    fn fail(&self, e: io::Error) {
        self.error_occurred.emit(io_error_code(&e));
        self.transition_to_closing();
    }

    fn transition_to_closing(&self) {
        let was_connected = matches!(*self.state.borrow(), State::Connected);
        *self.state.borrow_mut() = State::Closing;
        if let (Some(mut stream), Some(token)) = (self.stream.borrow_mut().take(), self.token.take()) {
            self.io.deregister(&mut stream, token);
        }
        self.write_buffer.borrow_mut().clear();
        if was_connected {
            self.disconnected.emit(());
        }
        *self.state.borrow_mut() = State::Unconnected;
    }
}

impl LookupCompletion for TcpSocket {
    fn on_lookup_complete(&self, _handle: &TaskHandle, result: io::Result<Vec<SocketAddr>>) {
        // Not `unconnected` means `close()` ran while the lookup was still
        // in flight; the result arrives too late to act on.
        if !matches!(*self.state.borrow(), State::HostLookup) {
            return;
        }
        let this = match self.self_weak.borrow().upgrade() {
            Some(this) => this,
            None => return,
        };
        match result.and_then(|addrs| {
            addrs
                .into_iter()
                .next()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses"))
        }) {
            Ok(addr) => this.begin_connecting(addr),
            Err(e) => this.fail(e),
        }
    }
}

impl CompletionHook for TcpSocket {
    fn on_event(&self, _handle: &TaskHandle, readable: bool, writable: bool, error: bool) {
        let this = match self.self_weak.borrow().upgrade() {
            Some(this) => this,
            None => return,
        };
        let state = *this.state.borrow();
        match state {
            State::Connecting => {
                if error {
                    this.fail(io::Error::other("connect failed"));
                    return;
                }
                let os_error = this
                    .stream
                    .borrow()
                    .as_ref()
                    .and_then(|s| s.take_error().ok().flatten());
                if let Some(e) = os_error {
                    this.fail(e);
                    return;
                }
                if writable {
                    *this.state.borrow_mut() = State::Connected;
                    this.update_interest();
                    this.connected.emit(());
                }
            }
            State::Connected => {
                if error {
                    this.fail(io::Error::other("socket error"));
                    return;
                }
                if readable {
                    this.ready_read.emit(());
                }
                if writable {
                    this.try_flush();
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_eventloop::EventLoop;
    use std::{
        cell::RefCell,
        net::{TcpListener, TcpStream},
    };

    #[test]
    fn adopted_socket_starts_connected_and_emits_connected_once() {
        let lp = EventLoop::new();
        let io = IoCore::new().unwrap();
        lp.register_completion_source(io.clone());
        let socket = TcpSocket::new(io, lp.task_handle());

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        client.set_nonblocking(true).unwrap();

        let fired = Rc::new(RefCell::new(0));
        let fired2 = fired.clone();
        socket.connected.connect(None, loom_signal::ConnectionMode::Direct, move |()| {
            *fired2.borrow_mut() += 1;
        });

        assert!(socket.adopt(client));
        assert_eq!(*fired.borrow(), 1);
        assert!(socket.is_connected());
        // A second adopt on an already-connected socket is bad-state.
        assert!(!socket.adopt(TcpStream::connect(listener.local_addr().unwrap()).unwrap()));
    }

    #[test]
    fn write_then_read_round_trips_over_loopback() {
        let lp = EventLoop::new();
        let io = IoCore::new().unwrap();
        lp.register_completion_source(io.clone());

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        client.set_nonblocking(true).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        let socket = TcpSocket::new(io, lp.task_handle());
        assert!(socket.adopt(client));

        let received = Rc::new(RefCell::new(Vec::new()));
        let received2 = received.clone();
        let socket_for_read = socket.clone();
        socket
            .ready_read
            .connect(None, loom_signal::ConnectionMode::Direct, move |()| {
                received2.borrow_mut().extend(socket_for_read.read(64));
            });

        use std::io::Write as _;
        let mut server = server;
        server.write_all(b"hello").unwrap();

        for _ in 0..20 {
            lp.process_once(false);
            if !received.borrow().is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(&*received.borrow(), b"hello");
    }
}
