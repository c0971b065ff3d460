//! Ticks a property once a second, prints every change through its
//! `changed` signal, and quits after five ticks.

use loom::prelude::*;
use std::{cell::RefCell, rc::Rc, time::Duration};

fn main() {
    tracing_subscriber::fmt::init();

    let lp = EventLoop::new();
    let handle = lp.task_handle();
    let ticks = Rc::new(RefCell::new(Property::new(ObjectId::new(), handle.clone(), 0u32)));

    ticks.borrow().changed.connect(None, ConnectionMode::Direct, |n| {
        println!("tick changed: {n}");
    });

    let ticks_for_timer = ticks.clone();
    handle.add_timer(Duration::from_millis(200), true, move |h| {
        let next = ticks_for_timer.borrow().get() + 1;
        ticks_for_timer.borrow_mut().set(next);
        if next >= 5 {
            h.quit();
        }
    });

    let code = lp.run();
    println!("exited with code {code}");
}
