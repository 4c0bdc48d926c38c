//! Shared helpers for the integration suites: an observer that records
//! an owned mirror of every event, and a harness that plays the driver
//! role around a simulated transport.

use std::cell::RefCell;
use std::rc::Rc;

use squall_core::{
    ConnectionState, Event, HttpContext, Method, Observer, ParseError, SimTransport, SocketEvents,
    SocketId,
};

/// Owned mirror of [`Event`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Opened(SocketId),
    Closed(SocketId),
    TimedOut(SocketId),
    PeerClosed(SocketId),
    DataAfterShutdown(SocketId, usize),
    Dispatched(SocketId, Method, String),
    RouteMissed(SocketId, Method, String),
    ParseFailed(SocketId, ParseError),
    Upgraded(SocketId),
}

#[derive(Clone, Default)]
pub struct RecordingObserver {
    pub seen: Rc<RefCell<Vec<Seen>>>,
}

impl Observer<SocketId> for RecordingObserver {
    fn event(&mut self, event: Event<'_, SocketId>) {
        let seen = match event {
            Event::Opened { socket, .. } => Seen::Opened(socket),
            Event::Closed { socket } => Seen::Closed(socket),
            Event::TimedOut { socket } => Seen::TimedOut(socket),
            Event::PeerClosed { socket } => Seen::PeerClosed(socket),
            Event::DataAfterShutdown { socket, len } => Seen::DataAfterShutdown(socket, len),
            Event::Dispatched {
                socket,
                method,
                path,
            } => Seen::Dispatched(socket, method, path.to_string()),
            Event::RouteMissed {
                socket,
                method,
                path,
            } => Seen::RouteMissed(socket, method, path.to_string()),
            Event::ParseFailed { socket, error } => Seen::ParseFailed(socket, error),
            Event::Upgraded { socket } => Seen::Upgraded(socket),
        };
        self.seen.borrow_mut().push(seen);
    }
}

pub type TestContext = HttpContext<SimTransport<ConnectionState>, RecordingObserver>;

/// Context plus the event log, with the bits of driver behavior the
/// simulated transport leaves to its caller.
pub struct Harness {
    pub ctx: TestContext,
    pub log: Rc<RefCell<Vec<Seen>>>,
}

pub fn harness() -> Harness {
    let observer = RecordingObserver::default();
    let log = observer.seen.clone();
    Harness {
        ctx: HttpContext::with_observer(SimTransport::new(), observer),
        log,
    }
}

impl Harness {
    /// New connection, open event delivered.
    pub fn open(&mut self) -> SocketId {
        let socket = self.ctx.transport_mut().connect();
        self.ctx.on_open(socket, false);
        socket
    }

    /// Deliver every pending close event and release the records, the
    /// way a driver settles closed sockets once handlers have unwound.
    pub fn drain_closes(&mut self) {
        while let Some(socket) = self.ctx.transport_mut().next_closed() {
            self.ctx.on_close(socket);
            self.ctx.transport_mut().release(socket);
        }
    }

    pub fn output_str(&mut self, socket: SocketId) -> String {
        String::from_utf8(self.ctx.transport_mut().take_output(socket)).unwrap()
    }

    pub fn events(&self) -> Vec<Seen> {
        self.log.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&Seen) -> bool) -> usize {
        self.log.borrow().iter().filter(|e| pred(e)).count()
    }
}
