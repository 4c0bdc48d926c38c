//! Response types and the per-request write surface

use bytes::Bytes;
use smallvec::SmallVec;

use crate::connection::{ConnectionState, IDLE_TIMEOUT_SECS};
use crate::transport::Transport;

/// HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const SWITCHING_PROTOCOLS: StatusCode = StatusCode(101);

    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const NO_CONTENT: StatusCode = StatusCode(204);

    pub const MOVED_PERMANENTLY: StatusCode = StatusCode(301);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);

    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const PAYLOAD_TOO_LARGE: StatusCode = StatusCode(413);
    pub const HEADER_FIELDS_TOO_LARGE: StatusCode = StatusCode(431);

    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(501);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            304 => "Not Modified",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            413 => "Payload Too Large",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            503 => "Service Unavailable",
            _ => "Unknown",
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.0)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.0)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.0)
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode(code)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.0, self.reason_phrase())
    }
}

/// A complete response, serialized in one piece
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    /// Headers in emission order (stack-allocated for small counts)
    pub headers: SmallVec<[(String, String); 8]>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: SmallVec::new(),
            body: Bytes::new(),
        }
    }

    /// 200 with an empty body
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// 200 with a plain-text body
    pub fn text(body: impl Into<Bytes>) -> Self {
        ResponseBuilder::new(StatusCode::OK)
            .header("content-type", "text/plain; charset=utf-8")
            .body(body)
            .build()
    }

    /// Minimal 404, used for unrouted requests
    pub fn not_found() -> Self {
        ResponseBuilder::new(StatusCode::NOT_FOUND)
            .header("content-type", "text/plain")
            .body("Not Found")
            .build()
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to HTTP/1.1 wire format.
    ///
    /// A `content-length` is always emitted (zero included) unless the
    /// caller supplied one; without it a keep-alive peer cannot frame
    /// the message.
    pub fn wire_bytes(&self) -> Bytes {
        let mut buf = Vec::with_capacity(256 + self.body.len());

        buf.extend_from_slice(b"HTTP/1.1 ");
        buf.extend_from_slice(self.status.0.to_string().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.status.reason_phrase().as_bytes());
        buf.extend_from_slice(b"\r\n");

        for (name, value) in &self.headers {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }

        if self.header("content-length").is_none() {
            buf.extend_from_slice(b"content-length: ");
            buf.extend_from_slice(self.body.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
        }

        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(&self.body);

        Bytes::from(buf)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::ok()
    }
}

/// Builder for constructing responses
pub struct ResponseBuilder {
    response: Response,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            response: Response::new(status),
        }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.response.status = status;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.response.body = body.into();
        self
    }

    pub fn build(self) -> Response {
        self.response
    }
}

/// Object-safe slice of [`Responder`] available to stored callbacks.
///
/// Writable and body callbacks live inside the connection record, so
/// they cannot capture the transport; they receive it again through
/// this surface each time they fire. Installers are deliberately
/// absent: a writable callback that is not done simply returns false
/// and stays installed.
pub trait Writer {
    /// Stream raw bytes; advances the write offset by what was accepted
    fn write_raw(&mut self, data: &[u8]) -> usize;
    /// Write a complete response and finish the write cycle
    fn respond(&mut self, response: &Response) -> usize;
    /// Finish a streamed response
    fn end(&mut self);
    /// Force-close the connection now
    fn close(&mut self);
}

/// Write surface handed to a route handler for one request.
///
/// Owns the write half of the timeout protocol: completing a response
/// (via [`respond`](Responder::respond) or [`end`](Responder::end))
/// re-arms the idle timer, so a connection that goes quiet after a
/// response is eventually reclaimed. The callback installers store
/// their closures in the connection record; they fire on later
/// transport events, not during the dispatch that installed them.
pub struct Responder<'a, T>
where
    T: Transport<Ext = ConnectionState>,
{
    transport: &'a mut T,
    socket: T::Socket,
}

impl<'a, T> Responder<'a, T>
where
    T: Transport<Ext = ConnectionState>,
{
    pub(crate) fn new(transport: &'a mut T, socket: T::Socket) -> Self {
        Self { transport, socket }
    }

    /// Write a complete response and finish the write cycle.
    ///
    /// Flushes anything corked, drops the abort callback (the response
    /// made it out) and re-arms the idle timer. Returns how many bytes
    /// the transport accepted; a short count means backpressure, and
    /// the rest is the caller's to continue via
    /// [`on_writable`](Responder::on_writable) + [`write_raw`](Responder::write_raw).
    pub fn respond(&mut self, response: &Response) -> usize {
        let wire = response.wire_bytes();
        let accepted = self.transport.write(self.socket, &wire, false, wire.len());
        if let Some(state) = self.transport.conn_ext_mut(self.socket) {
            state.offset += accepted;
            state.on_aborted = None;
        }
        self.transport.uncork(self.socket);
        self.arm_idle_timer();
        accepted
    }

    /// Stream raw bytes; advances the write offset by what was accepted.
    pub fn write_raw(&mut self, data: &[u8]) -> usize {
        let accepted = self.transport.write(self.socket, data, true, 0);
        if let Some(state) = self.transport.conn_ext_mut(self.socket) {
            state.offset += accepted;
        }
        accepted
    }

    /// Finish a streamed response: flush, forget the abort callback and
    /// start the idle clock again.
    pub fn end(&mut self) {
        if let Some(state) = self.transport.conn_ext_mut(self.socket) {
            state.on_aborted = None;
        }
        self.transport.uncork(self.socket);
        self.arm_idle_timer();
    }

    /// Bytes of response written so far for this request
    pub fn offset(&mut self) -> usize {
        self.transport
            .conn_ext_mut(self.socket)
            .map(|state| state.offset)
            .unwrap_or(0)
    }

    /// Run `f` exactly once if the connection dies before the response
    /// is finished.
    pub fn on_aborted(&mut self, f: impl FnOnce() + 'static) {
        if let Some(state) = self.transport.conn_ext_mut(self.socket) {
            state.on_aborted = Some(Box::new(f));
        }
    }

    /// Continue a backpressured response. Called with a fresh [`Writer`]
    /// and the current write offset whenever the socket drains; return
    /// true once the response is fully written.
    pub fn on_writable(&mut self, f: impl FnMut(&mut dyn Writer, usize) -> bool + 'static) {
        if let Some(state) = self.transport.conn_ext_mut(self.socket) {
            state.on_writable = Some(Box::new(f));
        }
    }

    /// Receive request body chunks; `last` marks the final one.
    pub fn on_body(&mut self, f: impl FnMut(&mut dyn Writer, &[u8], bool) + 'static) {
        if let Some(state) = self.transport.conn_ext_mut(self.socket) {
            state.on_body = Some(Box::new(f));
        }
    }

    /// Force-close the connection now
    pub fn close(&mut self) {
        self.transport.close(self.socket);
    }

    /// Hand this socket to another protocol layer. The HTTP machine
    /// makes no further use of it once the current dispatch returns.
    pub fn upgrade(&mut self) {
        if let Some(state) = self.transport.conn_ext_mut(self.socket) {
            state.upgraded = true;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed(self.socket)
    }

    fn arm_idle_timer(&mut self) {
        if !self.transport.is_closed(self.socket) && !self.transport.is_shut_down(self.socket) {
            self.transport.set_timeout(self.socket, IDLE_TIMEOUT_SECS);
        }
    }
}

impl<'a, T> Writer for Responder<'a, T>
where
    T: Transport<Ext = ConnectionState>,
{
    fn write_raw(&mut self, data: &[u8]) -> usize {
        Responder::write_raw(self, data)
    }

    fn respond(&mut self, response: &Response) -> usize {
        Responder::respond(self, response)
    }

    fn end(&mut self) {
        Responder::end(self)
    }

    fn close(&mut self) {
        Responder::close(self)
    }
}
