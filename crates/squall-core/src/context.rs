//! Context facade
//!
//! An [`HttpContext`] owns exactly one transport binding plus the route
//! table that answers requests arriving over it. Handlers are stored in
//! a flat vector and addressed by the IDs the dispatcher hands back, so
//! the dispatcher itself stays free of closure types.

use squall_router::Router;

use crate::connection::ConnectionState;
use crate::error::{Error, Result};
use crate::observer::{NoopObserver, Observer};
use crate::request::Request;
use crate::response::Responder;
use crate::transport::{ListenOptions, Transport};

/// Boxed route handler
pub type Handler<T> = Box<dyn FnMut(&Request<'_>, &mut Responder<'_, T>)>;

/// One connection layer instance: a transport, its route table and the
/// observer its events go to.
///
/// The context outlives every connection it services; drivers feed it
/// through the [`SocketEvents`](crate::transport::SocketEvents)
/// handlers it implements.
pub struct HttpContext<T, O = NoopObserver>
where
    T: Transport<Ext = ConnectionState>,
    O: Observer<T::Socket>,
{
    pub(crate) transport: T,
    pub(crate) router: Router,
    pub(crate) handlers: Vec<Handler<T>>,
    pub(crate) observer: O,
}

impl<T> HttpContext<T, NoopObserver>
where
    T: Transport<Ext = ConnectionState>,
{
    /// Create a context over one concrete transport binding.
    pub fn create(transport: T) -> Self {
        Self::with_observer(transport, NoopObserver)
    }
}

impl<T, O> HttpContext<T, O>
where
    T: Transport<Ext = ConnectionState>,
    O: Observer<T::Socket>,
{
    /// Like [`create`](HttpContext::create), with connection events
    /// delivered to `observer`.
    pub fn with_observer(transport: T, observer: O) -> Self {
        Self {
            transport,
            router: Router::new(),
            handlers: Vec::new(),
            observer,
        }
    }

    /// Register a handler for a method + pattern pair.
    ///
    /// Patterns use the dispatcher syntax: static segments, `:name`
    /// captures, `*name` tails. The first registration for a pair wins;
    /// a duplicate is reported as [`Error::DuplicateRoute`] and leaves
    /// the table untouched.
    pub fn add_route(
        &mut self,
        method: &str,
        pattern: &str,
        handler: impl FnMut(&Request<'_>, &mut Responder<'_, T>) + 'static,
    ) -> Result<()> {
        let id = self.handlers.len() as u32;
        if !self.router.add(method, pattern, id) {
            return Err(Error::DuplicateRoute {
                method: method.to_string(),
                pattern: pattern.to_string(),
            });
        }
        self.handlers.push(Box::new(handler));
        Ok(())
    }

    /// Install the fallback handler for requests no pattern matches.
    /// Without one, unrouted requests get a minimal 404 and the
    /// connection is dropped.
    pub fn set_unhandled(
        &mut self,
        handler: impl FnMut(&Request<'_>, &mut Responder<'_, T>) + 'static,
    ) {
        let id = self.handlers.len() as u32;
        self.handlers.push(Box::new(handler));
        self.router.set_unhandled(id);
    }

    /// Open a listen socket on the underlying transport.
    pub fn listen(
        &mut self,
        host: &str,
        port: u16,
        options: ListenOptions,
    ) -> Result<T::ListenHandle> {
        self.transport.listen(host, port, options)
    }

    /// Tear the context down. Connections still owned by the binding
    /// go with it; this is deliberate and exactly-once by construction.
    pub fn destroy(self) {}

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
