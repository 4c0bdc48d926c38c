//! Deterministic in-memory transport binding
//!
//! Drives the connection layer without sockets, threads or a runtime:
//! tests create connections explicitly, feed the event handlers by
//! hand, and inspect exactly what the layer did (staged vs flushed
//! bytes, cork state, timer value, close queue). Write acceptance can
//! be capped per socket to exercise the backpressure path.
//!
//! The close contract matches the real driver: [`close`](Transport::close)
//! flips state immediately and queues the socket; the test delivers the
//! close event itself and then calls [`release`](SimTransport::release).

use std::collections::{HashMap, VecDeque};

use bytes::BytesMut;

use crate::error::Result;
use crate::transport::{ListenOptions, SocketId, Transport};

struct SimSocket<E> {
    ext: E,
    /// Flushed output, as the peer would see it
    wire: BytesMut,
    /// Corked bytes awaiting uncork
    staged: BytesMut,
    corked: bool,
    timeout_secs: u32,
    shut_down: bool,
    closed: bool,
    /// Remaining bytes an uncorked write may accept; None = unlimited
    write_budget: Option<usize>,
    /// Zero-length flush nudges observed
    nudges: usize,
}

impl<E: Default> SimSocket<E> {
    fn new() -> Self {
        Self {
            ext: E::default(),
            wire: BytesMut::new(),
            staged: BytesMut::new(),
            corked: false,
            timeout_secs: 0,
            shut_down: false,
            closed: false,
            write_budget: None,
            nudges: 0,
        }
    }
}

/// In-memory [`Transport`] for tests.
pub struct SimTransport<E> {
    sockets: HashMap<SocketId, SimSocket<E>>,
    pending_close: VecDeque<SocketId>,
    listening: Option<(String, u16)>,
    next_id: u32,
}

impl<E> SimTransport<E> {
    pub fn new() -> Self {
        Self {
            sockets: HashMap::new(),
            pending_close: VecDeque::new(),
            listening: None,
            next_id: 1,
        }
    }

    /// Bring a new connection into existence, record included.
    /// The caller still owes the layer an open event.
    pub fn connect(&mut self) -> SocketId
    where
        E: Default,
    {
        let socket = SocketId(self.next_id);
        self.next_id += 1;
        self.sockets.insert(socket, SimSocket::new());
        socket
    }

    /// Drain everything flushed to the peer so far
    pub fn take_output(&mut self, socket: SocketId) -> Vec<u8> {
        self.sockets
            .get_mut(&socket)
            .map(|s| s.wire.split().to_vec())
            .unwrap_or_default()
    }

    /// Bytes corked but not yet flushed
    pub fn staged_len(&self, socket: SocketId) -> usize {
        self.sockets.get(&socket).map(|s| s.staged.len()).unwrap_or(0)
    }

    pub fn is_corked(&self, socket: SocketId) -> bool {
        self.sockets.get(&socket).map(|s| s.corked).unwrap_or(false)
    }

    /// Current idle timer value; 0 = disarmed
    pub fn timeout_secs(&self, socket: SocketId) -> u32 {
        self.sockets
            .get(&socket)
            .map(|s| s.timeout_secs)
            .unwrap_or(0)
    }

    /// Zero-length flush nudges seen so far
    pub fn nudges(&self, socket: SocketId) -> usize {
        self.sockets.get(&socket).map(|s| s.nudges).unwrap_or(0)
    }

    /// Mark the write side shut down, as after an outgoing FIN
    pub fn set_shut_down(&mut self, socket: SocketId, value: bool) {
        if let Some(s) = self.sockets.get_mut(&socket) {
            s.shut_down = value;
        }
    }

    /// Cap how many more bytes uncorked writes may accept
    pub fn set_write_capacity(&mut self, socket: SocketId, cap: usize) {
        if let Some(s) = self.sockets.get_mut(&socket) {
            s.write_budget = Some(cap);
        }
    }

    pub fn clear_write_capacity(&mut self, socket: SocketId) {
        if let Some(s) = self.sockets.get_mut(&socket) {
            s.write_budget = None;
        }
    }

    /// Next socket owed a close event, oldest first
    pub fn next_closed(&mut self) -> Option<SocketId> {
        self.pending_close.pop_front()
    }

    /// Drop the record. Only valid after the close event was delivered.
    pub fn release(&mut self, socket: SocketId) {
        self.sockets.remove(&socket);
    }

    pub fn listening(&self) -> Option<&(String, u16)> {
        self.listening.as_ref()
    }
}

impl<E> Default for SimTransport<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Transport for SimTransport<E> {
    type Socket = SocketId;
    type Ext = E;
    type ListenHandle = ();

    fn conn_ext_mut(&mut self, socket: SocketId) -> Option<&mut E> {
        self.sockets.get_mut(&socket).map(|s| &mut s.ext)
    }

    fn set_timeout(&mut self, socket: SocketId, seconds: u32) {
        if let Some(s) = self.sockets.get_mut(&socket) {
            if !s.closed {
                s.timeout_secs = seconds;
            }
        }
    }

    fn is_shut_down(&self, socket: SocketId) -> bool {
        self.sockets.get(&socket).map(|s| s.shut_down).unwrap_or(false)
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
                s.timeout_secs = 0;
                self.pending_close.push_back(socket);
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
            if !s.closed && !s.staged.is_empty() {
                let staged = s.staged.split();
                s.wire.extend_from_slice(&staged);
            }
            s.corked = false;
        }
    }

    fn write(&mut self, socket: SocketId, data: &[u8], _more_coming: bool, _hint: usize) -> usize {
        let Some(s) = self.sockets.get_mut(&socket) else {
            return 0;
        };
        if s.closed || s.shut_down {
            return 0;
        }
        if data.is_empty() {
            s.nudges += 1;
            return 0;
        }
        if s.corked {
            s.staged.extend_from_slice(data);
            return data.len();
        }
        let accepted = match s.write_budget {
            Some(budget) => data.len().min(budget),
            None => data.len(),
        };
        if let Some(budget) = s.write_budget.as_mut() {
            *budget -= accepted;
        }
        s.wire.extend_from_slice(&data[..accepted]);
        accepted
    }

    fn listen(&mut self, host: &str, port: u16, _options: ListenOptions) -> Result<()> {
        self.listening = Some((host.to_string(), port));
        Ok(())
    }
}
