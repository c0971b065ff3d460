use loom_eventloop::{TaskHandle, TimerId};
use std::{
    cell::Cell,
    rc::Rc,
    time::{Duration, Instant},
};

/// Suspends the calling task until `predicate` returns `true` or `timeout`
/// elapses, polling every 5ms. Backs `wait_for_connected` and
/// `wait_for_bytes_written`.
///
/// There is no OS thread to literally "spin" on in this cooperative design
/// (that would block the one thread the whole loop runs on); a short
/// recurring timer plus `TaskHandle::nested_loop` gets the same externally
/// observable behaviour -- the calling task blocks from its own point of
/// view, the loop itself keeps servicing every other task meanwhile.
pub fn spin_wait(handle: &TaskHandle, timeout: Duration, mut predicate: impl FnMut() -> bool + 'static) -> bool {
    if predicate() {
        return true;
    }
    let deadline = Instant::now() + timeout;
    let nested = Rc::new(handle.nested_loop());
    let success = Rc::new(Cell::new(false));
    let timer_id: Rc<Cell<Option<TimerId>>> = Rc::new(Cell::new(None));

    let nested2 = nested.clone();
    let success2 = success.clone();
    let timer_id2 = timer_id.clone();
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
