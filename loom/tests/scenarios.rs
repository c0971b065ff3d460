//! End-to-end scenarios exercising more than one core crate at once, the
//! same split the reference workspace draws between a module's own
//! `#[cfg(test)]` unit tests and its cross-module integration tests.

use loom::io::{IoCore, TcpSocket};
use loom::signal::ConnectionMode;
use loom::EventLoop;
use std::{
    cell::RefCell,
    net::{TcpListener, TcpStream},
    rc::Rc,
    time::Duration,
};

#[test]
fn posted_closure_ordering() {
    let lp = EventLoop::new();
    let order = Rc::new(RefCell::new(Vec::new()));
    for name in ["A", "B", "C"] {
        let order = order.clone();
        lp.task_handle().post(move |_| order.borrow_mut().push(name));
    }

    lp.process_once(false);
    assert_eq!(*order.borrow(), vec!["A"]);
    lp.process_once(false);
    assert_eq!(*order.borrow(), vec!["A", "B"]);
    lp.process_once(false);
    assert_eq!(*order.borrow(), vec!["A", "B", "C"]);
}

#[test]
fn timer_cadence_stays_drift_tolerant() {
    let lp = EventLoop::new();
    let count = Rc::new(RefCell::new(0));
    let count2 = count.clone();
    lp.task_handle().add_timer(Duration::from_micros(50_000), false, move |_| {
        *count2.borrow_mut() += 1;
    });
    lp.run_for(Duration::from_micros(260_000));
    let n = *count.borrow();
    assert!((4..=6).contains(&n), "expected 4..=6 fires, got {n}");
}

#[test]
fn nested_event_loop_preserves_outer_locals() {
    let lp = EventLoop::new();
    let outer_continued = Rc::new(RefCell::new(false));
    let outer_continued2 = outer_continued.clone();
    lp.task_handle().post(move |h| {
        let local = 41;
        let inner = Rc::new(h.nested_loop());
        let inner_for_post = inner.clone();
        h.post(move |_| inner_for_post.quit());
        let code = inner.exec();
        assert_eq!(code, 0);
        assert_eq!(local + 1, 42);
        *outer_continued2.borrow_mut() = true;
    });
    lp.run_for(Duration::from_millis(50));
    assert!(*outer_continued.borrow());
}

#[test]
fn queued_slot_waits_a_full_iteration_behind_a_direct_one() {
    let lp = EventLoop::new();
    let signal = loom::signal::Signal::<()>::new(loom::signal::ObjectId::new(), lp.task_handle());
    let order = Rc::new(RefCell::new(Vec::new()));

    let order_x = order.clone();
    signal.connect(None, ConnectionMode::Direct, move |()| order_x.borrow_mut().push("X"));
    let order_y = order.clone();
    signal.connect(None, ConnectionMode::Queued, move |()| order_y.borrow_mut().push("Y"));

    signal.emit(());
    assert_eq!(*order.borrow(), vec!["X"], "direct slot runs synchronously within emit");

    lp.process_once(false);
    assert_eq!(*order.borrow(), vec!["X", "Y"], "queued slot runs on the next iteration");
}

fn loopback_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).unwrap();
    let (server, _) = listener.accept().unwrap();
    client.set_nonblocking(true).unwrap();
    server.set_nonblocking(true).unwrap();
    (client, server)
}

#[test]
fn socket_half_close_drains_then_reports_disconnected() {
    let lp = EventLoop::new();
    let io = IoCore::new().unwrap();
    lp.register_completion_source(io.clone());

    let (std_a, std_b) = loopback_pair();
    let a = TcpSocket::new(io.clone(), lp.task_handle());
    let b = TcpSocket::new(io, lp.task_handle());
    assert!(a.adopt(std_a));
    assert!(b.adopt(std_b));

    let received = Rc::new(RefCell::new(Vec::new()));
    let received2 = received.clone();
    let b_for_read = b.clone();
    b.ready_read.connect(None, ConnectionMode::Direct, move |()| {
        received2.borrow_mut().extend(b_for_read.read(64));
    });
    let disconnected = Rc::new(RefCell::new(false));
    let disconnected2 = disconnected.clone();
    b.disconnected.connect(None, ConnectionMode::Direct, move |()| {
        *disconnected2.borrow_mut() = true;
    });

    assert!(a.write(b"HELLO"));
    assert!(a.close());

    for _ in 0..50 {
        lp.process_once(false);
        if *disconnected.borrow() {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(&*received.borrow(), b"HELLO");
    assert!(*disconnected.borrow());
    assert!(!b.is_connected());
}

#[test]
fn buffered_one_mebibyte_write_drains_exactly_once() {
    let lp = EventLoop::new();
    let io = IoCore::new().unwrap();
    lp.register_completion_source(io.clone());

    let (std_a, std_b) = loopback_pair();
    let a = TcpSocket::new(io.clone(), lp.task_handle());
    let b = TcpSocket::new(io, lp.task_handle());
    assert!(a.adopt(std_a));
    assert!(b.adopt(std_b));

    let payload: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();

    let finished_count = Rc::new(RefCell::new(0));
    let finished_count2 = finished_count.clone();
    a.write_finished.connect(None, ConnectionMode::Direct, move |()| {
        *finished_count2.borrow_mut() += 1;
    });

    let received = Rc::new(RefCell::new(Vec::new()));
    let received2 = received.clone();
    let b_for_read = b.clone();
    b.ready_read.connect(None, ConnectionMode::Direct, move |()| loop {
        let chunk = b_for_read.read(64 * 1024);
        if chunk.is_empty() {
            break;
        }
        received2.borrow_mut().extend(chunk);
    });

    assert!(a.write(&payload));

    for _ in 0..2000 {
        lp.process_once(false);
        if received.borrow().len() == payload.len() {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(received.borrow().len(), payload.len());
    assert_eq!(&*received.borrow(), &payload, "bytes arrive in write order");
    assert_eq!(*finished_count.borrow(), 1, "write-finished fires exactly once");
}
