//! Connection lifecycle state machine
//!
//! One [`ConnectionState`] record rides along with every socket, owned by
//! the transport binding from socket birth until after the close event.
//! The six [`SocketEvents`] handlers below are the whole lifecycle:
//!
//! - open arms the idle timer; a connection that never sends a complete
//!   request is reclaimed after [`IDLE_TIMEOUT_SECS`]
//! - data is fenced (closed and shut-down sockets never reach the
//!   parser), corked, fed through [`parser::consume`], and uncorked only
//!   if the connection still belongs to this layer afterwards
//! - writable drives the drain protocol: stored callback if one is
//!   installed, a bare flush nudge otherwise; completing a response
//!   re-arms the idle timer
//! - end, timeout and close are terminal: half-open peers are not
//!   serviced, timeouts are never answered, and close runs the abort
//!   callback at most once
//!
//! Within one event the handlers re-check liveness after every
//! excursion into application code; a handler closing its own socket
//! mid-dispatch stops the parse loop on the spot.

use std::mem;

use crate::context::HttpContext;
use crate::observer::{Event, Observer};
use crate::parser::{self, Flow, ParseCursor, ParseError};
use crate::request::Request;
use crate::response::{Responder, Response, Writer};
use crate::transport::{SocketEvents, Transport};

/// Idle allowance, in seconds, before a quiet connection is reclaimed.
///
/// Armed at open and at every write-cycle completion, disarmed the
/// moment a complete request is dispatched. Trickled bytes alone do not
/// reset it, which is what starves slow-loris clients out.
pub const IDLE_TIMEOUT_SECS: u32 = 10;

/// Per-connection record living inside the transport binding.
///
/// Everything here is scoped to the current request and cleared when
/// the next request head is dispatched on the same connection.
#[derive(Default)]
pub struct ConnectionState {
    /// Response bytes written so far, reported to the writable callback
    pub(crate) offset: usize,
    /// Parser continuation across reads
    pub(crate) cursor: ParseCursor,
    /// Runs at most once if the connection dies mid-request
    pub(crate) on_aborted: Option<Box<dyn FnOnce()>>,
    /// Continues a backpressured response; reports when fully drained
    pub(crate) on_writable: Option<Box<dyn FnMut(&mut dyn Writer, usize) -> bool>>,
    /// Receives request body chunks
    pub(crate) on_body: Option<Box<dyn FnMut(&mut dyn Writer, &[u8], bool)>>,
    /// Socket was promised to another protocol layer
    pub(crate) upgraded: bool,
}

impl ConnectionState {
    /// Clear request-scoped state at the boundary between two requests.
    pub(crate) fn reset_for_next_request(&mut self) {
        self.offset = 0;
        self.cursor.reset();
        self.on_aborted = None;
        self.on_writable = None;
        self.on_body = None;
        self.upgraded = false;
    }
}

impl<T, O> SocketEvents<T> for HttpContext<T, O>
where
    T: Transport<Ext = ConnectionState>,
    O: Observer<T::Socket>,
{
    fn on_open(&mut self, socket: T::Socket, is_client: bool) {
        self.transport.set_timeout(socket, IDLE_TIMEOUT_SECS);
        self.observer.event(Event::Opened { socket, is_client });
    }

    fn on_data(&mut self, socket: T::Socket, data: &[u8]) {
        if self.transport.is_closed(socket) {
            return;
        }
        // A shut-down socket can still receive, but nothing it sends is
        // ours to answer; the bytes must not reach the parser.
        if self.transport.is_shut_down(socket) {
            self.observer.event(Event::DataAfterShutdown {
                socket,
                len: data.len(),
            });
            return;
        }

        let Some(state) = self.transport.conn_ext_mut(socket) else {
            return;
        };
        let mut cursor = mem::take(&mut state.cursor);

        self.transport.cork(socket);

        let flow = {
            let mut sink = DispatchSink { ctx: &mut *self };
            parser::consume(&mut cursor, socket, data, &mut sink)
        };

        // Uncork (and keep the cursor) only if the parser handed the
        // very same socket back; anything else means the connection
        // died or now belongs to someone else.
        if let Flow::Continue(handle) = flow {
            if handle == socket {
                if let Some(state) = self.transport.conn_ext_mut(socket) {
                    state.cursor = cursor;
                }
                self.transport.uncork(socket);
            }
        }
    }

    fn on_writable(&mut self, socket: T::Socket) {
        // Writability ends the quiet period whatever happens next.
        self.transport.set_timeout(socket, 0);

        let Some(state) = self.transport.conn_ext_mut(socket) else {
            return;
        };
        let offset = state.offset;

        match state.on_writable.take() {
            Some(mut callback) => {
                let drained = {
                    let mut responder = Responder::new(&mut self.transport, socket);
                    callback(&mut responder, offset)
                };
                if drained {
                    // Write cycle complete: the response made it out, so
                    // the abort callback is moot and the idle clock runs.
                    if let Some(state) = self.transport.conn_ext_mut(socket) {
                        state.on_aborted = None;
                    }
                    if !self.transport.is_closed(socket) && !self.transport.is_shut_down(socket) {
                        self.transport.set_timeout(socket, IDLE_TIMEOUT_SECS);
                    }
                } else if let Some(state) = self.transport.conn_ext_mut(socket) {
                    state.on_writable = Some(callback);
                }
            }
            None => {
                // Nothing pending from us; nudge the transport to move
                // whatever it still buffers. Safe to repeat.
                self.transport.write(socket, &[], true, 0);
            }
        }
    }

    fn on_end(&mut self, socket: T::Socket) {
        // Half-open peers are not serviced.
        self.observer.event(Event::PeerClosed { socket });
        self.transport.close(socket);
    }

    fn on_timeout(&mut self, socket: T::Socket) {
        // Force close; a graceful shutdown could let the peer mistake a
        // truncated response for a complete one.
        self.observer.event(Event::TimedOut { socket });
        self.transport.close(socket);
    }

    fn on_close(&mut self, socket: T::Socket) {
        if let Some(state) = self.transport.conn_ext_mut(socket) {
            if let Some(callback) = state.on_aborted.take() {
                callback();
            }
        }
        self.observer.event(Event::Closed { socket });
    }
}

/// Parser-to-dispatch glue for one consume call.
struct DispatchSink<'c, T, O>
where
    T: Transport<Ext = ConnectionState>,
    O: Observer<T::Socket>,
{
    ctx: &'c mut HttpContext<T, O>,
}

impl<'c, T, O> parser::MessageSink<T::Socket> for DispatchSink<'c, T, O>
where
    T: Transport<Ext = ConnectionState>,
    O: Observer<T::Socket>,
{
    fn on_request(&mut self, socket: T::Socket, request: Request<'_>) -> Flow<T::Socket> {
        // A complete head arrived: the idle clock stops until the
        // response write cycle completes.
        self.ctx.transport.set_timeout(socket, 0);

        match self.ctx.transport.conn_ext_mut(socket) {
            Some(state) => state.reset_for_next_request(),
            None => return Flow::Stop,
        }

        let method = request.method;
        let (handler_id, params) = match self.ctx.router.find(method.as_str(), request.path) {
            Some(m) => (m.handler_id, m.params),
            None => match self.ctx.router.unhandled() {
                Some(id) => (id, Vec::new()),
                None => {
                    self.ctx.observer.event(Event::RouteMissed {
                        socket,
                        method,
                        path: request.path,
                    });
                    // No application answer exists; an unroutable
                    // pipeline is not worth keeping around.
                    let wire = Response::not_found().wire_bytes();
                    self.ctx.transport.write(socket, &wire, false, wire.len());
                    self.ctx.transport.uncork(socket);
                    self.ctx.transport.close(socket);
                    return Flow::Stop;
                }
            },
        };

        self.ctx.observer.event(Event::Dispatched {
            socket,
            method,
            path: request.path,
        });

        let request = Request {
            params: &params,
            ..request
        };
        if let Some(handler) = self.ctx.handlers.get_mut(handler_id as usize) {
            let mut responder = Responder::new(&mut self.ctx.transport, socket);
            handler(&request, &mut responder);
        }

        // The handler may have killed, shut down or promised away the
        // socket; re-check before letting the parser continue.
        if self.ctx.transport.is_closed(socket) {
            return Flow::Stop;
        }
        if self.ctx.transport.is_shut_down(socket) {
            return Flow::Stop;
        }
        match self.ctx.transport.conn_ext_mut(socket) {
            Some(state) if state.upgraded => {
                self.ctx.observer.event(Event::Upgraded { socket });
                Flow::Replaced(socket)
            }
            Some(_) => Flow::Continue(socket),
            None => Flow::Stop,
        }
    }

    fn on_body_chunk(&mut self, socket: T::Socket, chunk: &[u8], last: bool) -> Flow<T::Socket> {
        let Some(state) = self.ctx.transport.conn_ext_mut(socket) else {
            return Flow::Stop;
        };

        if let Some(mut callback) = state.on_body.take() {
            {
                let mut responder = Responder::new(&mut self.ctx.transport, socket);
                callback(&mut responder, chunk, last);
            }
            if let Some(state) = self.ctx.transport.conn_ext_mut(socket) {
                state.on_body = Some(callback);
            }
        }

        if self.ctx.transport.is_closed(socket) || self.ctx.transport.is_shut_down(socket) {
            return Flow::Stop;
        }
        Flow::Continue(socket)
    }

    fn on_error(&mut self, socket: T::Socket, error: ParseError) {
        self.ctx.observer.event(Event::ParseFailed { socket, error });
        self.ctx.transport.close(socket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimTransport;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Default)]
    struct CountingObserver {
        dispatched: usize,
        shutdown_data: usize,
        timed_out: usize,
        closed: usize,
        parse_failed: usize,
    }

    impl Observer<crate::transport::SocketId> for CountingObserver {
        fn event(&mut self, event: Event<'_, crate::transport::SocketId>) {
            match event {
                Event::Dispatched { .. } => self.dispatched += 1,
                Event::DataAfterShutdown { .. } => self.shutdown_data += 1,
                Event::TimedOut { .. } => self.timed_out += 1,
                Event::Closed { .. } => self.closed += 1,
                Event::ParseFailed { .. } => self.parse_failed += 1,
                _ => {}
            }
        }
    }

    type TestContext = HttpContext<SimTransport<ConnectionState>, CountingObserver>;

    fn test_context() -> TestContext {
        HttpContext::with_observer(SimTransport::new(), CountingObserver::default())
    }

    #[test]
    fn test_open_arms_idle_timer() {
        let mut ctx = test_context();
        let socket = ctx.transport_mut().connect();

        ctx.on_open(socket, false);

        assert_eq!(ctx.transport_mut().timeout_secs(socket), IDLE_TIMEOUT_SECS);
    }

    #[test]
    fn test_shutdown_data_never_reaches_parser() {
        let mut ctx = test_context();
        ctx.add_route("GET", "/", |_, r| {
            r.respond(&Response::ok());
        })
        .unwrap();
        let socket = ctx.transport_mut().connect();
        ctx.on_open(socket, false);

        ctx.transport_mut().set_shut_down(socket, true);
        ctx.on_data(socket, b"GET / HTTP/1.1\r\n\r\n");

        assert_eq!(ctx.observer.dispatched, 0);
        assert_eq!(ctx.observer.shutdown_data, 1);
        assert!(ctx.transport_mut().take_output(socket).is_empty());
    }

    #[test]
    fn test_timeout_force_closes() {
        let mut ctx = test_context();
        let socket = ctx.transport_mut().connect();
        ctx.on_open(socket, false);

        ctx.on_timeout(socket);

        assert!(ctx.transport_mut().is_closed(socket));
        assert_eq!(ctx.observer.timed_out, 1);
    }

    #[test]
    fn test_end_force_closes() {
        let mut ctx = test_context();
        let socket = ctx.transport_mut().connect();
        ctx.on_open(socket, false);

        ctx.on_end(socket);

        assert!(ctx.transport_mut().is_closed(socket));
    }

    #[test]
    fn test_close_runs_abort_callback_once() {
        let mut ctx = test_context();
        let socket = ctx.transport_mut().connect();
        ctx.on_open(socket, false);

        let fired = Rc::new(Cell::new(0u32));
        let seen = fired.clone();
        ctx.transport_mut()
            .conn_ext_mut(socket)
            .unwrap()
            .on_aborted = Some(Box::new(move || seen.set(seen.get() + 1)));

        ctx.on_close(socket);

        assert_eq!(fired.get(), 1);
        assert!(ctx
            .transport_mut()
            .conn_ext_mut(socket)
            .unwrap()
            .on_aborted
            .is_none());
        assert_eq!(ctx.observer.closed, 1);
    }

    #[test]
    fn test_close_without_abort_callback_is_quiet() {
        let mut ctx = test_context();
        let socket = ctx.transport_mut().connect();
        ctx.on_open(socket, false);

        ctx.on_close(socket);

        assert_eq!(ctx.observer.closed, 1);
    }

    #[test]
    fn test_writable_without_callback_is_idempotent() {
        let mut ctx = test_context();
        let socket = ctx.transport_mut().connect();
        ctx.on_open(socket, false);

        ctx.on_writable(socket);
        ctx.on_writable(socket);

        // Only the flush nudge happens, and the timer stays disarmed.
        assert_eq!(ctx.transport_mut().nudges(socket), 2);
        assert_eq!(ctx.transport_mut().timeout_secs(socket), 0);
    }

    #[test]
    fn test_writable_callback_retained_until_drained() {
        let mut ctx = test_context();
        let socket = ctx.transport_mut().connect();
        ctx.on_open(socket, false);

        let calls = Rc::new(Cell::new(0u32));
        let seen = calls.clone();
        ctx.transport_mut()
            .conn_ext_mut(socket)
            .unwrap()
            .on_writable = Some(Box::new(move |_, _| {
            seen.set(seen.get() + 1);
            seen.get() == 2
        }));

        ctx.on_writable(socket);
        assert_eq!(calls.get(), 1);
        assert_eq!(ctx.transport_mut().timeout_secs(socket), 0);

        ctx.on_writable(socket);
        assert_eq!(calls.get(), 2);
        // Drained: callback gone, idle clock running again.
        assert!(ctx
            .transport_mut()
            .conn_ext_mut(socket)
            .unwrap()
            .on_writable
            .is_none());
        assert_eq!(ctx.transport_mut().timeout_secs(socket), IDLE_TIMEOUT_SECS);

        ctx.on_writable(socket);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_drained_write_cycle_clears_abort_callback() {
        let mut ctx = test_context();
        let socket = ctx.transport_mut().connect();
        ctx.on_open(socket, false);

        let state = ctx.transport_mut().conn_ext_mut(socket).unwrap();
        state.on_aborted = Some(Box::new(|| {}));
        state.on_writable = Some(Box::new(|_, _| true));

        ctx.on_writable(socket);

        assert!(ctx
            .transport_mut()
            .conn_ext_mut(socket)
            .unwrap()
            .on_aborted
            .is_none());
    }

    #[test]
    fn test_parse_error_closes_without_dispatch() {
        let mut ctx = test_context();
        ctx.add_route("GET", "/", |_, r| {
            r.respond(&Response::ok());
        })
        .unwrap();
        let socket = ctx.transport_mut().connect();
        ctx.on_open(socket, false);

        ctx.on_data(socket, b"BLARGH / HTTP/1.1\r\n\r\n");

        assert!(ctx.transport_mut().is_closed(socket));
        assert_eq!(ctx.observer.parse_failed, 1);
        assert_eq!(ctx.observer.dispatched, 0);
    }

    #[test]
    fn test_data_on_closed_socket_is_ignored() {
        let mut ctx = test_context();
        ctx.add_route("GET", "/", |_, r| {
            r.respond(&Response::ok());
        })
        .unwrap();
        let socket = ctx.transport_mut().connect();
        ctx.on_open(socket, false);
        ctx.transport_mut().close(socket);

        ctx.on_data(socket, b"GET / HTTP/1.1\r\n\r\n");

        assert_eq!(ctx.observer.dispatched, 0);
    }
}
