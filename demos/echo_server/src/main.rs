//! Connects a `loom_io::TcpSocket` to a plain background-thread echo
//! server, writes a line, prints whatever comes back, and quits.

use loom::io::{IoCore, TcpSocket};
use loom::prelude::*;
use std::{
    cell::RefCell,
    io::{Read, Write},
    net::TcpListener,
    rc::Rc,
};

fn spawn_echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind echo server");
    let port = listener.local_addr().unwrap().port();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut buf = [0u8; 256];
            if let Ok(n) = stream.read(&mut buf) {
                let _ = stream.write_all(&buf[..n]);
            }
        }
    });
    port
}

fn main() {
    tracing_subscriber::fmt::init();
    let port = spawn_echo_server();

    let lp = EventLoop::new();
    let io = IoCore::new().expect("mio poll init");
    lp.register_completion_source(io.clone());
    let socket = TcpSocket::new(io, lp.task_handle());

    let handle = lp.task_handle();
    let socket_for_connect = socket.clone();
    socket.connected.connect(None, ConnectionMode::Direct, move |()| {
        println!("connected, writing message");
        socket_for_connect.write(b"hello from loom\n");
    });

    let socket_for_read = socket.clone();
    let handle_for_read = handle.clone();
    socket.ready_read.connect(None, ConnectionMode::Direct, move |()| {
        let bytes = socket_for_read.read(256);
        if bytes.is_empty() {
            return;
        }
        println!("echoed back: {}", String::from_utf8_lossy(&bytes));
        socket_for_read.close();
        handle_for_read.quit();
    });

    let timed_out = Rc::new(RefCell::new(false));
    let timed_out2 = timed_out.clone();
    handle.add_timer(std::time::Duration::from_secs(5), true, move |h| {
        *timed_out2.borrow_mut() = true;
        h.quit();
    });

    socket.connect_to_host("127.0.0.1", port);
    let code = lp.run();
    if *timed_out.borrow() {
        eprintln!("demo timed out waiting for the echo");
    }
    println!("exited with code {code}");
}
