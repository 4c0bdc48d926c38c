//! Native TCP binding and driver
//!
//! [`NetTransport`] is pure bookkeeping: per-socket write buffers, cork
//! and liveness flags, the idle deadline and the extension record. The
//! IO itself lives in [`run`], a tokio current-thread driver with one
//! local task per connection that reads, hands bytes to the state
//! machine, drains the outbox and delivers timeout/end/close. The
//! context is shared between tasks with `Rc<RefCell>`, never locks.
//!
//! Writes are asynchronous to the caller: [`Transport::write`] banks
//! bytes in a bounded per-socket outbox and reports how many it took;
//! the task flushes the outbox to the stream and forwards writability
//! once a partial acceptance has fully cleared. The same driver serves
//! plaintext and encrypted streams (see [`tls`]).

#[cfg(feature = "tls")]
pub mod tls;

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener, ToSocketAddrs};
use std::rc::Rc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::net::TcpListener;
use tokio::time::Instant;

use crate::connection::ConnectionState;
use crate::context::HttpContext;
use crate::error::{Error, Result};
use crate::observer::Observer;
use crate::transport::{ListenOptions, SocketEvents, SocketId, Transport};

/// Per-task read buffer size
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Outbox high-water mark. Uncorked writes past this are only partially
/// accepted; the caller continues through the writable event.
pub const MAX_BACKPRESSURE: usize = 256 * 1024;

/// How long a closed socket may keep flushing already-accepted bytes
/// before the stream is dropped.
const CLOSE_FLUSH_GRACE: Duration = Duration::from_secs(1);

struct NetSocket<E> {
    ext: E,
    /// Accepted but not yet written to the stream, FIFO
    outbox: VecDeque<Bytes>,
    outbox_len: usize,
    /// Cork batch, spilled into the outbox on uncork
    staged: BytesMut,
    corked: bool,
    closed: bool,
    /// Write side is gone; the state machine must not answer anything
    shut_down: bool,
    /// Stream reported a hard write error; task closes on next round
    io_dead: bool,
    /// A partial acceptance happened; forward writability once drained
    want_writable: bool,
    deadline: Option<Instant>,
}

impl<E: Default> NetSocket<E> {
    fn new() -> Self {
        Self {
            ext: E::default(),
            outbox: VecDeque::new(),
            outbox_len: 0,
            staged: BytesMut::new(),
            corked: false,
            closed: false,
            shut_down: false,
            io_dead: false,
            want_writable: false,
            deadline: None,
        }
    }
}

/// Tokio-backed [`Transport`] binding behind the `native` feature.
pub struct NetTransport<E> {
    sockets: HashMap<SocketId, NetSocket<E>>,
    next_id: u32,
}

impl<E> NetTransport<E> {
    pub fn new() -> Self {
        Self {
            sockets: HashMap::new(),
            next_id: 1,
        }
    }

    fn register(&mut self) -> SocketId
    where
        E: Default,
    {
        let socket = SocketId(self.next_id);
        self.next_id += 1;
        self.sockets.insert(socket, NetSocket::new());
        socket
    }

    fn release(&mut self, socket: SocketId) {
        self.sockets.remove(&socket);
    }

    fn front_chunk(&self, socket: SocketId) -> Option<Bytes> {
        self.sockets
            .get(&socket)
            .and_then(|s| s.outbox.front().cloned())
    }

    /// Drop `n` bytes that reached the stream; true once the outbox is
    /// empty.
    fn consume_outbox(&mut self, socket: SocketId, n: usize) -> bool {
        let Some(s) = self.sockets.get_mut(&socket) else {
            return true;
        };
        let mut left = n;
        while left > 0 {
            let Some(front) = s.outbox.front_mut() else {
                break;
            };
            if front.len() <= left {
                left -= front.len();
                s.outbox.pop_front();
            } else {
                front.advance(left);
                left = 0;
            }
        }
        s.outbox_len = s.outbox_len.saturating_sub(n);
        s.outbox.is_empty()
    }

    fn take_want_writable(&mut self, socket: SocketId) -> bool {
        self.sockets
            .get_mut(&socket)
            .map(|s| std::mem::replace(&mut s.want_writable, false))
            .unwrap_or(false)
    }

    /// Write side failed hard. Unsent bytes are unrecoverable.
    fn mark_dead(&mut self, socket: SocketId) {
        if let Some(s) = self.sockets.get_mut(&socket) {
            s.io_dead = true;
            s.shut_down = true;
            s.outbox.clear();
            s.outbox_len = 0;
            s.staged.clear();
        }
    }

    fn is_dead(&self, socket: SocketId) -> bool {
        self.sockets.get(&socket).map(|s| s.io_dead).unwrap_or(false)
    }

    fn deadline(&self, socket: SocketId) -> Option<Instant> {
        self.sockets.get(&socket).and_then(|s| s.deadline)
    }

    fn clear_deadline(&mut self, socket: SocketId) {
        if let Some(s) = self.sockets.get_mut(&socket) {
            s.deadline = None;
        }
    }

    #[cfg(test)]
    fn outbox_len(&self, socket: SocketId) -> usize {
        self.sockets.get(&socket).map(|s| s.outbox_len).unwrap_or(0)
    }
}

impl<E> Default for NetTransport<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Transport for NetTransport<E> {
    type Socket = SocketId;
    type Ext = E;
    type ListenHandle = NetListenHandle;

    fn conn_ext_mut(&mut self, socket: SocketId) -> Option<&mut E> {
        self.sockets.get_mut(&socket).map(|s| &mut s.ext)
    }

    fn set_timeout(&mut self, socket: SocketId, seconds: u32) {
        if let Some(s) = self.sockets.get_mut(&socket) {
            if !s.closed {
                s.deadline = if seconds == 0 {
                    None
                } else {
                    Some(Instant::now() + Duration::from_secs(u64::from(seconds)))
                };
            }
        }
    }

    fn is_shut_down(&self, socket: SocketId) -> bool {
        self.sockets
            .get(&socket)
            .map(|s| s.shut_down)
            .unwrap_or(false)
    }

    fn is_closed(&self, socket: SocketId) -> bool {
        self.sockets.get(&socket).map(|s| s.closed).unwrap_or(true)
    }

    fn close(&mut self, socket: SocketId) {
        if let Some(s) = self.sockets.get_mut(&socket) {
            if !s.closed {
                s.closed = true;
                s.corked = false;
                s.staged.clear();
                s.deadline = None;
                // Outbox bytes were already accepted and stay owed to
                // the wire; the task settles them before releasing.
            }
        }
    }

    fn cork(&mut self, socket: SocketId) {
        if let Some(s) = self.sockets.get_mut(&socket) {
            if !s.closed {
                s.corked = true;
            }
        }
    }

    fn uncork(&mut self, socket: SocketId) {
        if let Some(s) = self.sockets.get_mut(&socket) {
            s.corked = false;
            if s.closed {
                s.staged.clear();
            } else if !s.staged.is_empty() {
                let batch = s.staged.split().freeze();
                s.outbox_len += batch.len();
                s.outbox.push_back(batch);
            }
        }
    }

    fn write(&mut self, socket: SocketId, data: &[u8], _more_coming: bool, _hint: usize) -> usize {
        let Some(s) = self.sockets.get_mut(&socket) else {
            return 0;
        };
        if s.closed || s.shut_down || data.is_empty() {
            return 0;
        }
        if s.corked {
            s.staged.extend_from_slice(data);
            return data.len();
        }
        let budget = MAX_BACKPRESSURE.saturating_sub(s.outbox_len);
        let accepted = data.len().min(budget);
        if accepted < data.len() {
            s.want_writable = true;
        }
        if accepted > 0 {
            s.outbox.push_back(Bytes::copy_from_slice(&data[..accepted]));
            s.outbox_len += accepted;
        }
        accepted
    }

    fn listen(&mut self, host: &str, port: u16, options: ListenOptions) -> Result<NetListenHandle> {
        let fail = |source: io::Error| Error::Listen {
            host: host.to_string(),
            port,
            source,
        };
        let addr = resolve(host, port).map_err(fail)?;
        let listener = bind_listener(&addr, options).map_err(fail)?;
        let local_addr = listener.local_addr().map_err(fail)?;
        Ok(NetListenHandle {
            listener,
            local_addr,
        })
    }
}

/// Bound, non-blocking listen socket waiting for [`run`].
#[derive(Debug)]
pub struct NetListenHandle {
    listener: StdTcpListener,
    local_addr: SocketAddr,
}

impl NetListenHandle {
    /// Actual bound address, useful with port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "host resolved to no addresses",
        )
    })
}

/// TCP listener with the usual server socket tuning applied.
fn bind_listener(addr: &SocketAddr, options: ListenOptions) -> io::Result<StdTcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // SO_REUSEADDR - allow binding to an address in TIME_WAIT
    socket.set_reuse_address(true)?;

    // SO_REUSEPORT - kernel load balancing across processes
    #[cfg(unix)]
    if options.reuse_port {
        socket.set_reuse_port(true)?;
    }

    // TCP_NODELAY - disable Nagle's algorithm for lower latency
    socket.set_nodelay(true)?;

    socket.bind(&(*addr).into())?;
    socket.listen(options.backlog as i32)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

type SharedContext<O> = Rc<RefCell<HttpContext<NetTransport<ConnectionState>, O>>>;

/// Accept connections and drive them until the listener fails.
///
/// Blocks the calling thread on a current-thread runtime; the whole
/// server, accept loop included, stays on this one thread.
pub fn run<O>(
    ctx: HttpContext<NetTransport<ConnectionState>, O>,
    handle: NetListenHandle,
) -> Result<()>
where
    O: Observer<SocketId> + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let local = tokio::task::LocalSet::new();
    let ctx = Rc::new(RefCell::new(ctx));
    local.block_on(&runtime, accept_loop(ctx, handle.listener))
}

async fn accept_loop<O>(ctx: SharedContext<O>, listener: StdTcpListener) -> Result<()>
where
    O: Observer<SocketId> + 'static,
{
    let listener = TcpListener::from_std(listener)?;
    loop {
        let (stream, _peer) = listener.accept().await?;
        let _ = stream.set_nodelay(true);
        spawn_connection(&ctx, stream);
    }
}

/// Bring one accepted stream under the state machine's management.
fn spawn_connection<S, O>(ctx: &SharedContext<O>, stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin + 'static,
    O: Observer<SocketId> + 'static,
{
    let socket = ctx.borrow_mut().transport_mut().register();
    ctx.borrow_mut().on_open(socket, false);
    tokio::task::spawn_local(drive(ctx.clone(), socket, stream));
}

/// Per-connection event loop.
///
/// Every event the state machine ever sees for this socket originates
/// here, so liveness flags flipped during a handler are observed on the
/// next iteration without any cross-task signalling.
async fn drive<S, O>(ctx: SharedContext<O>, socket: SocketId, stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin + 'static,
    O: Observer<SocketId> + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let (closed, dead, upgraded, deadline, chunk) = {
            let mut guard = ctx.borrow_mut();
            let transport = guard.transport_mut();
            (
                transport.is_closed(socket),
                transport.is_dead(socket),
                transport
                    .conn_ext_mut(socket)
                    .map(|s| s.upgraded)
                    .unwrap_or(false),
                transport.deadline(socket),
                transport.front_chunk(socket),
            )
        };

        if dead && !closed {
            ctx.borrow_mut().transport_mut().close(socket);
            continue;
        }
        if closed {
            // Accepted bytes are still owed to the wire.
            let _ = tokio::time::timeout(
                CLOSE_FLUSH_GRACE,
                flush_outbox(&ctx, socket, &mut writer),
            )
            .await;
            let mut guard = ctx.borrow_mut();
            guard.on_close(socket);
            guard.transport_mut().release(socket);
            return;
        }
        if upgraded {
            // The socket now belongs to another protocol layer; settle
            // our remaining output and step away without a close event.
            let _ = tokio::time::timeout(
                CLOSE_FLUSH_GRACE,
                flush_outbox(&ctx, socket, &mut writer),
            )
            .await;
            ctx.borrow_mut().transport_mut().release(socket);
            return;
        }

        tokio::select! {
            biased;

            _ = tokio::time::sleep_until(
                deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86400)),
            ), if deadline.is_some() => {
                let mut guard = ctx.borrow_mut();
                // One-shot: a fired timer never fires again by itself.
                guard.transport_mut().clear_deadline(socket);
                guard.on_timeout(socket);
            }

            written = writer.write(chunk.as_deref().unwrap_or(&[])), if chunk.is_some() => {
                match written {
                    Ok(0) | Err(_) => ctx.borrow_mut().transport_mut().mark_dead(socket),
                    Ok(n) => {
                        let forward = {
                            let mut guard = ctx.borrow_mut();
                            let transport = guard.transport_mut();
                            transport.consume_outbox(socket, n)
                                && transport.take_want_writable(socket)
                        };
                        if forward {
                            ctx.borrow_mut().on_writable(socket);
                        }
                    }
                }
            }

            read = reader.read(&mut buf) => {
                match read {
                    Ok(0) => ctx.borrow_mut().on_end(socket),
                    Ok(n) => ctx.borrow_mut().on_data(socket, &buf[..n]),
                    Err(_) => ctx.borrow_mut().transport_mut().close(socket),
                }
            }
        }
    }
}

/// Push whatever the outbox still holds into the stream, best effort.
async fn flush_outbox<S, O>(
    ctx: &SharedContext<O>,
    socket: SocketId,
    writer: &mut WriteHalf<S>,
) where
    S: AsyncWrite,
    O: Observer<SocketId> + 'static,
{
    loop {
        let Some(chunk) = ctx.borrow_mut().transport_mut().front_chunk(socket) else {
            break;
        };
        match writer.write(&chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                ctx.borrow_mut().transport_mut().consume_outbox(socket, n);
            }
        }
    }
    let _ = writer.flush().await;
}
