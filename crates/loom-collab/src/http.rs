use crate::Error;
use loom_eventloop::{TaskHandle, TimerId};
use loom_io::{IoCore, TcpSocket};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::{Duration, Instant},
};

/// A parsed HTTP/1.1 response: status line fields plus the body bytes.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

/// A minimal, GET-only HTTP client built directly on [`loom_io::TcpSocket`],
/// implementing exactly the request/response shape of §6: a plain
/// `GET <path> HTTP/1.1` request, headers read until the blank line, then
/// either `Content-Length` bytes or everything until the peer closes.
///
/// "Blocking-style" from the caller's point of view: `get` does not return
/// until the response is complete or `timeout` elapses, but it does so by
/// spinning the event loop (the same `nested_loop` + short timer shape
/// `loom_io::wait::spin_wait` uses), never by blocking the OS thread.
pub struct HttpClient {
    io: Rc<IoCore>,
    handle: TaskHandle,
}

impl HttpClient {
    pub fn new(io: Rc<IoCore>, handle: TaskHandle) -> Self {
        Self { io, handle }
    }

    pub fn get(&self, host: &str, port: u16, path: &str, timeout: Duration) -> Result<Response, Error> {
        let socket = TcpSocket::new(self.io.clone(), self.handle.clone());
        socket.connect_to_host(host, port);
        if !socket.wait_for_connected(timeout) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connect timed out",
            )));
        }

        let request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\n\r\n");
        socket.write(request.as_bytes());
        socket.wait_for_bytes_written(timeout);

        let buffer = Rc::new(RefCell::new(Vec::new()));
        let closed = Rc::new(Cell::new(false));
        let buffer2 = buffer.clone();
        let closed2 = closed.clone();
        let socket_for_read = socket.clone();
        let read_conn = socket.ready_read.connect(None, loom_signal::ConnectionMode::Direct, move |()| {
            let chunk = socket_for_read.read(4096);
            if chunk.is_empty() {
                return;
            }
            buffer2.borrow_mut().extend(chunk);
        });
        let closed3 = closed.clone();
        let disc_conn = socket.disconnected.connect(None, loom_signal::ConnectionMode::Direct, move |()| {
            closed3.set(true);
        });

        let this_buffer = buffer.clone();
        let result = block_on_predicate(&self.handle, timeout, move || {
            response_is_complete(&this_buffer.borrow()) || closed2.get()
        });

        socket.ready_read.disconnect(read_conn);
        socket.disconnected.disconnect(disc_conn);
        socket.close();

        if !result {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "response timed out",
            )));
        }
        let parsed = parse_response(&buffer.borrow());
        parsed
    }
}

fn response_is_complete(buffer: &[u8]) -> bool {
    let Some(header_end) = find_header_end(buffer) else {
        return false;
    };
    let headers = &buffer[..header_end];
    match content_length(headers) {
        Some(len) => buffer.len() >= header_end + 4 + len,
        None => false,
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length(headers: &[u8]) -> Option<usize> {
    let text = String::from_utf8_lossy(headers);
    text.lines()
        .find_map(|line| line.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
        .and_then(|v| v.parse().ok())
}

fn parse_response(buffer: &[u8]) -> Result<Response, Error> {
    let header_end = find_header_end(buffer).ok_or_else(|| Error::MalformedResponse("no header terminator".into()))?;
    let head = String::from_utf8_lossy(&buffer[..header_end]);
    let status_line = head.lines().next().ok_or_else(|| Error::MalformedResponse("empty response".into()))?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::MalformedResponse(format!("bad status line: {status_line}")))?;
    Ok(Response {
        status,
        body: buffer[header_end + 4..].to_vec(),
    })
}

/// Same shape as `loom_io::wait::spin_wait`: a short recurring timer plus a
/// nested loop, so the caller appears to block while the loop keeps
/// servicing every other task.
fn block_on_predicate(handle: &TaskHandle, timeout: Duration, mut predicate: impl FnMut() -> bool + 'static) -> bool {
    if predicate() {
        return true;
    }
    let deadline = Instant::now() + timeout;
    let nested = Rc::new(handle.nested_loop());
    let success = Rc::new(Cell::new(false));
    let timer_id: Rc<Cell<Option<TimerId>>> = Rc::new(Cell::new(None));
    let (nested2, success2, timer_id2) = (nested.clone(), success.clone(), timer_id.clone());
    let id = handle.add_timer(Duration::from_millis(5), false, move |h| {
        let done = predicate();
        if done {
            success2.set(true);
        }
        if done || Instant::now() >= deadline {
            if let Some(id) = timer_id2.get() {
                h.remove_timer(id);
            }
            nested2.quit();
        }
    });
    timer_id.set(Some(id));
    nested.exec();
    success.get()
}
