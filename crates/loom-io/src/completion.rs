use crate::Error;
use loom_eventloop::{CompletionSource, TaskHandle};
use loom_signal::ObjectId;
use mio::{event::Source, Interest, Token};
use rustc_hash::FxHashMap;
use std::{
    cell::{Cell, RefCell},
    net::{SocketAddr, ToSocketAddrs},
    rc::Rc,
    time::Duration,
};

/// Invoked from `IoCore::poll_completions` for every `mio` readiness event
/// whose token matches the handle a hook was registered under. Has access
/// to whether the notification was readable, writable, or an error, the
/// same three facts `mio::event::Event` exposes.
pub trait CompletionHook {
    fn on_event(&self, handle: &TaskHandle, readable: bool, writable: bool, error: bool);
}

/// Invoked once a host-lookup thread started by [`IoCore::start_lookup`]
/// reports its result.
pub trait LookupCompletion {
    fn on_lookup_complete(&self, handle: &TaskHandle, result: std::io::Result<Vec<SocketAddr>>);
}

/// One per event loop. Wraps a single `mio::Poll`, the one completion
/// facility of §4.D, and dispatches readiness events to the hook registered
/// for each token. Registered into the loop via
/// `EventLoop::register_completion_source` so step 4 of every iteration
/// drains it.
pub struct IoCore {
    poll: RefCell<mio::Poll>,
    events: RefCell<mio::Events>,
    hooks: RefCell<FxHashMap<Token, Rc<dyn CompletionHook>>>,
    next_token: Cell<usize>,
    lookup_tx: crossbeam_channel::Sender<(ObjectId, std::io::Result<Vec<SocketAddr>>)>,
    lookup_rx: crossbeam_channel::Receiver<(ObjectId, std::io::Result<Vec<SocketAddr>>)>,
    pending_lookups: RefCell<FxHashMap<ObjectId, Rc<dyn LookupCompletion>>>,
}

impl IoCore {
    pub fn new() -> Result<Rc<Self>, Error> {
        Self::with_event_capacity(256)
    }

    pub fn with_event_capacity(capacity: usize) -> Result<Rc<Self>, Error> {
        let poll = mio::Poll::new().map_err(Error::PollInit)?;
        let (lookup_tx, lookup_rx) = crossbeam_channel::unbounded();
        Ok(Rc::new(Self {
            poll: RefCell::new(poll),
            events: RefCell::new(mio::Events::with_capacity(capacity)),
            hooks: RefCell::new(FxHashMap::default()),
            next_token: Cell::new(0),
            lookup_tx,
            lookup_rx,
            pending_lookups: RefCell::new(FxHashMap::default()),
        }))
    }

    /// Resolves `host:port` on a one-shot OS thread and, once resolved,
    /// invokes `completion.on_lookup_complete` from the next
    /// `poll_completions` call on the loop thread. A real async resolver is
    /// out of scope (§4.D implementation note); `ToSocketAddrs` blocks the
    /// spawned thread only, never the loop.
    pub fn start_lookup(&self, id: ObjectId, host: String, port: u16, completion: Rc<dyn LookupCompletion>) {
        self.pending_lookups.borrow_mut().insert(id, completion);
        let tx = self.lookup_tx.clone();
        std::thread::spawn(move || {
            let result = (host.as_str(), port)
                .to_socket_addrs()
                .map(|addrs| addrs.collect::<Vec<_>>());
            let _ = tx.send((id, result));
        });
    }

    /// Registers `source` under a freshly minted token and installs `hook`
    /// for it, returning the token so the caller can `reregister`/
    /// `deregister` later.
    pub fn register(
        &self,
        source: &mut impl Source,
        interest: Interest,
        hook: Rc<dyn CompletionHook>,
    ) -> Result<Token, Error> {
        let token = Token(self.next_token.get());
        self.next_token.set(token.0 + 1);
        self.poll
            .borrow()
            .registry()
            .register(source, token, interest)
            .map_err(Error::Register)?;
        self.hooks.borrow_mut().insert(token, hook);
        Ok(token)
    }

    pub fn reregister(&self, source: &mut impl Source, token: Token, interest: Interest) -> Result<(), Error> {
        self.poll
            .borrow()
            .registry()
            .reregister(source, token, interest)
            .map_err(Error::Register)
    }

    /// Drops the hook and deregisters `source`. Idempotent: deregistering a
    /// handle that `mio` has already forgotten about is ignored, matching
    /// the rest of the core's "closing always releases cleanly" policy.
    pub fn deregister(&self, source: &mut impl Source, token: Token) {
        let _ = self.poll.borrow().registry().deregister(source);
        self.hooks.borrow_mut().remove(&token);
    }
}

impl CompletionSource for IoCore {
    fn poll_completions(&self, handle: &TaskHandle) {
        while let Ok((id, result)) = self.lookup_rx.try_recv() {
            if let Some(completion) = self.pending_lookups.borrow_mut().remove(&id) {
                completion.on_lookup_complete(handle, result);
            }
        }

        let mut events = self.events.borrow_mut();
        // Non-blocking: the loop's own iteration structure (§4.B) already
        // decides whether and how long to block before this step runs.
        if let Err(e) = self.poll.borrow_mut().poll(&mut events, Some(Duration::ZERO)) {
            tracing::error!(error = %e, "mio poll failed");
            return;
        }
        let fired: Vec<_> = events
            .iter()
            .filter_map(|ev| {
                self.hooks
                    .borrow()
                    .get(&ev.token())
                    .cloned()
                    .map(|hook| (hook, ev.is_readable(), ev.is_writable(), ev.is_error()))
            })
            .collect();
        for (hook, readable, writable, error) in fired {
            hook.on_event(handle, readable, writable, error);
        }
    }
}
