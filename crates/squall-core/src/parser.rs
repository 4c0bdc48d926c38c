//! Incremental HTTP/1.x tokenizer
//!
//! Consumes whatever the transport delivers, in whatever fragmentation,
//! and drives a [`MessageSink`] with three hooks: request head ready,
//! body chunk, parse error. The continuation protocol is explicit:
//! every hook answers with a [`Flow`], and [`consume`] stops feeding the
//! moment a hook answers anything other than [`Flow::Continue`].
//!
//! Framing rules:
//! - request line and headers are strict CRLF; bare LF is malformed
//! - bodies are framed by `Content-Length` only; `Transfer-Encoding`
//!   is rejected outright rather than risk framing desync
//! - the head is capped at [`MAX_HEAD_SIZE`] bytes and [`MAX_HEADERS`]
//!   header lines; beyond either cap the message is malformed
//!
//! The fast path parses straight out of the input slice with no copies.
//! Only a head split across reads spills into the cursor's carry buffer.

use bytes::BytesMut;
use thiserror::Error;

use crate::request::{Header, Method, Request};

/// Upper bound on request line + headers, in bytes
pub const MAX_HEAD_SIZE: usize = 8192;

/// Maximum number of header lines per request
pub const MAX_HEADERS: usize = 64;

/// What the layer should do with the connection after a hook ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow<S> {
    /// Keep feeding this socket (possibly a changed handle)
    Continue(S),
    /// Socket is gone or dying; stop touching it
    Stop,
    /// Socket was handed to another protocol layer; stop touching it
    Replaced(S),
}

/// Why a message could not be tokenized. Fatal to its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unrecognized method token")]
    BadMethod,
    #[error("malformed request line")]
    BadRequestLine,
    #[error("malformed header line")]
    BadHeader,
    #[error("request head exceeds {MAX_HEAD_SIZE} bytes")]
    HeadTooLarge,
    #[error("more than {MAX_HEADERS} header lines")]
    TooManyHeaders,
    #[error("invalid or conflicting content-length")]
    BadContentLength,
    #[error("transfer-encoding is not supported")]
    UnsupportedTransferEncoding,
}

/// Receiver side of [`consume`].
pub trait MessageSink<S: Copy> {
    /// A complete request head was tokenized. `request.params` is empty
    /// at this point; binding captures is the receiver's business.
    fn on_request(&mut self, socket: S, request: Request<'_>) -> Flow<S>;

    /// Body bytes for the most recent request. `last` marks the chunk
    /// that completes the declared content length.
    fn on_body_chunk(&mut self, socket: S, chunk: &[u8], last: bool) -> Flow<S>;

    /// Tokenization failed. The connection is unusable afterwards;
    /// [`consume`] returns [`Flow::Stop`] right after this hook.
    fn on_error(&mut self, socket: S, error: ParseError);
}

/// Per-connection parser continuation, stored in the connection record.
///
/// `Default` is the pristine state; the record starts there and the
/// layer takes/puts the cursor around each consume call.
#[derive(Debug, Default)]
pub struct ParseCursor {
    /// Carry buffer for a head split across reads; empty on the fast path
    spill: BytesMut,
    /// Body bytes still owed to the sink for the current message
    remaining_body: usize,
}

impl ParseCursor {
    /// True while a message is partially consumed
    pub fn is_midstream(&self) -> bool {
        !self.spill.is_empty() || self.remaining_body > 0
    }

    /// Forget any partially consumed message
    pub fn reset(&mut self) {
        self.spill.clear();
        self.remaining_body = 0;
    }
}

/// Feed freshly received bytes through the cursor into the sink.
///
/// Loops over pipelined messages until the input is exhausted or a hook
/// stops the flow. The handle inside [`Flow::Continue`] threads through
/// every hook; callers compare it against the socket they started with
/// before touching the connection again.
pub fn consume<S, K>(cursor: &mut ParseCursor, socket: S, data: &[u8], sink: &mut K) -> Flow<S>
where
    S: Copy,
    K: MessageSink<S>,
{
    let mut current = socket;
    let mut input = data;

    // Finish the body a previous read left open.
    if cursor.remaining_body > 0 {
        let take = cursor.remaining_body.min(input.len());
        if take > 0 {
            let (chunk, rest) = input.split_at(take);
            cursor.remaining_body -= take;
            match sink.on_body_chunk(current, chunk, cursor.remaining_body == 0) {
                Flow::Continue(s) => current = s,
                other => return other,
            }
            input = rest;
        }
        if cursor.remaining_body > 0 {
            return Flow::Continue(current);
        }
    }

    loop {
        if input.is_empty() {
            return Flow::Continue(current);
        }

        let mut headers = [Header {
            name: &[],
            value: &[],
        }; MAX_HEADERS];

        let content_length;
        if cursor.spill.is_empty() {
            // Fast path: the head is tokenized in place, zero copies.
            match parse_head(input, &mut headers) {
                HeadState::Incomplete => {
                    cursor.spill.extend_from_slice(input);
                    return Flow::Continue(current);
                }
                HeadState::Failed(err) => {
                    sink.on_error(current, err);
                    return Flow::Stop;
                }
                HeadState::Complete(info) => {
                    let request = match borrow_request(input, &headers[..info.header_count], &info)
                    {
                        Some(r) => r,
                        None => {
                            sink.on_error(current, ParseError::BadRequestLine);
                            return Flow::Stop;
                        }
                    };
                    match sink.on_request(current, request) {
                        Flow::Continue(s) => current = s,
                        other => return other,
                    }
                    input = &input[info.head_len..];
                    content_length = info.content_length;
                }
            }
        } else {
            // A previous read ended mid-head; grow the carry buffer just
            // far enough (a valid head never exceeds the cap) and retry.
            let old_len = cursor.spill.len();
            let take = input.len().min(MAX_HEAD_SIZE - old_len);
            cursor.spill.extend_from_slice(&input[..take]);

            match parse_head(&cursor.spill, &mut headers) {
                HeadState::Incomplete => {
                    return Flow::Continue(current);
                }
                HeadState::Failed(err) => {
                    sink.on_error(current, err);
                    return Flow::Stop;
                }
                HeadState::Complete(info) => {
                    let request =
                        match borrow_request(&cursor.spill, &headers[..info.header_count], &info) {
                            Some(r) => r,
                            None => {
                                sink.on_error(current, ParseError::BadRequestLine);
                                return Flow::Stop;
                            }
                        };
                    let flow = sink.on_request(current, request);
                    match flow {
                        Flow::Continue(s) => current = s,
                        other => return other,
                    }
                    // The spill held old_len carried bytes; the rest of
                    // the head came out of this input.
                    input = &input[info.head_len - old_len..];
                    content_length = info.content_length;
                    cursor.spill.clear();
                }
            }
        }

        // Body bytes already in hand follow the head immediately.
        cursor.remaining_body = content_length;
        if cursor.remaining_body > 0 {
            let take = cursor.remaining_body.min(input.len());
            if take > 0 {
                let (chunk, rest) = input.split_at(take);
                cursor.remaining_body -= take;
                match sink.on_body_chunk(current, chunk, cursor.remaining_body == 0) {
                    Flow::Continue(s) => current = s,
                    other => return other,
                }
                input = rest;
            }
            if cursor.remaining_body > 0 {
                return Flow::Continue(current);
            }
        }
    }
}

/// Offsets of a tokenized head within its buffer.
struct HeadInfo {
    /// Bytes consumed, terminator included; body starts here
    head_len: usize,
    method: Method,
    path: (usize, usize),
    query: Option<(usize, usize)>,
    header_count: usize,
    content_length: usize,
}

enum HeadState {
    Incomplete,
    Complete(HeadInfo),
    Failed(ParseError),
}

fn parse_head<'b>(buf: &'b [u8], headers: &mut [Header<'b>]) -> HeadState {
    match parse_head_inner(buf, headers) {
        HeadState::Incomplete if buf.len() >= MAX_HEAD_SIZE => {
            HeadState::Failed(ParseError::HeadTooLarge)
        }
        HeadState::Complete(info) if info.head_len > MAX_HEAD_SIZE => {
            HeadState::Failed(ParseError::HeadTooLarge)
        }
        other => other,
    }
}

fn parse_head_inner<'b>(buf: &'b [u8], headers: &mut [Header<'b>]) -> HeadState {
    // Request line: METHOD SP target SP version CRLF. A line break
    // before the first space can never become a valid request line.
    let method_end = match memchr3(b' ', b'\r', b'\n', buf) {
        Some(i) if buf[i] == b' ' => i,
        Some(_) => return HeadState::Failed(ParseError::BadRequestLine),
        None => return HeadState::Incomplete,
    };
    let method = match Method::parse(&buf[..method_end]) {
        Some(m) => m,
        None => return HeadState::Failed(ParseError::BadMethod),
    };

    let target_start = method_end + 1;
    let line_end = match find_crlf(buf, target_start) {
        LineEnd::At(i) => i,
        LineEnd::Incomplete => return HeadState::Incomplete,
        LineEnd::Bad => return HeadState::Failed(ParseError::BadRequestLine),
    };

    let target_end = match memchr(b' ', &buf[target_start..line_end]) {
        Some(i) => target_start + i,
        None => return HeadState::Failed(ParseError::BadRequestLine),
    };
    if target_end == target_start {
        return HeadState::Failed(ParseError::BadRequestLine);
    }
    let version = &buf[target_end + 1..line_end];
    if version != b"HTTP/1.1" && version != b"HTTP/1.0" {
        return HeadState::Failed(ParseError::BadRequestLine);
    }

    let (path, query) = match memchr(b'?', &buf[target_start..target_end]) {
        Some(i) => {
            let q = target_start + i;
            ((target_start, q), Some((q + 1, target_end)))
        }
        None => ((target_start, target_end), None),
    };

    // Header lines until the empty CRLF line.
    let mut pos = line_end + 2;
    let mut header_count = 0;
    let mut content_length = None;

    loop {
        if pos >= buf.len() {
            return HeadState::Incomplete;
        }
        if buf[pos] == b'\r' {
            if pos + 1 >= buf.len() {
                return HeadState::Incomplete;
            }
            if buf[pos + 1] != b'\n' {
                return HeadState::Failed(ParseError::BadHeader);
            }
            pos += 2;
            break;
        }
        if buf[pos] == b'\n' {
            return HeadState::Failed(ParseError::BadHeader);
        }
        if header_count == headers.len() {
            return HeadState::Failed(ParseError::TooManyHeaders);
        }

        let name_start = pos;
        let colon = match memchr2(b':', b'\r', &buf[pos..]) {
            Some(i) if buf[pos + i] == b':' => pos + i,
            Some(_) => return HeadState::Failed(ParseError::BadHeader),
            None => return HeadState::Incomplete,
        };
        if colon == name_start {
            return HeadState::Failed(ParseError::BadHeader);
        }
        let name = &buf[name_start..colon];
        if memchr(b'\n', name).is_some() {
            return HeadState::Failed(ParseError::BadHeader);
        }

        pos = colon + 1;
        while pos < buf.len() && (buf[pos] == b' ' || buf[pos] == b'\t') {
            pos += 1;
        }
        let value_start = pos;
        let value_end = match find_crlf(buf, value_start) {
            LineEnd::At(i) => i,
            LineEnd::Incomplete => return HeadState::Incomplete,
            LineEnd::Bad => return HeadState::Failed(ParseError::BadHeader),
        };
        let value = trim_trailing_ows(&buf[value_start..value_end]);

        if name.eq_ignore_ascii_case(b"content-length") {
            if content_length.is_some() {
                return HeadState::Failed(ParseError::BadContentLength);
            }
            content_length = match parse_content_length(value) {
                Some(n) => Some(n),
                None => return HeadState::Failed(ParseError::BadContentLength),
            };
        } else if name.eq_ignore_ascii_case(b"transfer-encoding") {
            return HeadState::Failed(ParseError::UnsupportedTransferEncoding);
        }

        headers[header_count] = Header { name, value };
        header_count += 1;
        pos = value_end + 2;
    }

    HeadState::Complete(HeadInfo {
        head_len: pos,
        method,
        path,
        query,
        header_count,
        content_length: content_length.unwrap_or(0),
    })
}

/// Build the borrowed request view; `None` if the target is not UTF-8.
fn borrow_request<'b>(
    buf: &'b [u8],
    headers: &'b [Header<'b>],
    info: &HeadInfo,
) -> Option<Request<'b>> {
    let path = std::str::from_utf8(&buf[info.path.0..info.path.1]).ok()?;
    let query = match info.query {
        Some((start, end)) => Some(std::str::from_utf8(&buf[start..end]).ok()?),
        None => None,
    };
    Some(Request {
        method: info.method,
        path,
        query,
        headers,
        params: &[],
    })
}

enum LineEnd {
    At(usize),
    Incomplete,
    Bad,
}

/// Locate a CRLF terminator at or after `from`. A bare LF, or a CR not
/// followed by LF, is malformed.
fn find_crlf(buf: &[u8], from: usize) -> LineEnd {
    match memchr2(b'\r', b'\n', &buf[from..]) {
        Some(i) if buf[from + i] == b'\n' => LineEnd::Bad,
        Some(i) => {
            let cr = from + i;
            if cr + 1 >= buf.len() {
                LineEnd::Incomplete
            } else if buf[cr + 1] == b'\n' {
                LineEnd::At(cr)
            } else {
                LineEnd::Bad
            }
        }
        None => LineEnd::Incomplete,
    }
}

fn trim_trailing_ows(mut value: &[u8]) -> &[u8] {
    while let [rest @ .., last] = value {
        if *last == b' ' || *last == b'\t' {
            value = rest;
        } else {
            break;
        }
    }
    value
}

/// Digits only, overflow checked
fn parse_content_length(value: &[u8]) -> Option<usize> {
    if value.is_empty() {
        return None;
    }
    let mut n: usize = 0;
    for &b in value {
        if !b.is_ascii_digit() {
            return None;
        }
        n = n.checked_mul(10)?.checked_add((b - b'0') as usize)?;
    }
    Some(n)
}

/// Simple memchr implementation
#[inline]
fn memchr(needle: u8, haystack: &[u8]) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

/// Find first occurrence of either byte
#[inline]
fn memchr2(a: u8, b: u8, haystack: &[u8]) -> Option<usize> {
    haystack.iter().position(|&byte| byte == a || byte == b)
}

/// Find first occurrence of any of three bytes
#[inline]
fn memchr3(a: u8, b: u8, c: u8, haystack: &[u8]) -> Option<usize> {
    haystack
        .iter()
        .position(|&byte| byte == a || byte == b || byte == c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SocketId;

    #[derive(Default)]
    struct TestSink {
        requests: Vec<(Method, String, Option<String>, usize)>,
        chunks: Vec<(Vec<u8>, bool)>,
        errors: Vec<ParseError>,
        /// Pre-programmed answers for on_request, oldest first
        request_answers: Vec<Flow<SocketId>>,
    }

    impl MessageSink<SocketId> for TestSink {
        fn on_request(&mut self, socket: SocketId, request: Request<'_>) -> Flow<SocketId> {
            self.requests.push((
                request.method,
                request.path.to_string(),
                request.query.map(str::to_string),
                request.headers.len(),
            ));
            if self.request_answers.is_empty() {
                Flow::Continue(socket)
            } else {
                self.request_answers.remove(0)
            }
        }

        fn on_body_chunk(&mut self, socket: SocketId, chunk: &[u8], last: bool) -> Flow<SocketId> {
            self.chunks.push((chunk.to_vec(), last));
            Flow::Continue(socket)
        }

        fn on_error(&mut self, _socket: SocketId, error: ParseError) {
            self.errors.push(error);
        }
    }

    const S: SocketId = SocketId(1);

    fn run(cursor: &mut ParseCursor, sink: &mut TestSink, data: &[u8]) -> Flow<SocketId> {
        consume(cursor, S, data, sink)
    }

    #[test]
    fn test_simple_get() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        let flow = run(
            &mut cursor,
            &mut sink,
            b"GET /users HTTP/1.1\r\nHost: localhost\r\n\r\n",
        );

        assert_eq!(flow, Flow::Continue(S));
        assert_eq!(sink.requests.len(), 1);
        let (method, path, query, header_count) = &sink.requests[0];
        assert_eq!(*method, Method::Get);
        assert_eq!(path, "/users");
        assert_eq!(*query, None);
        assert_eq!(*header_count, 1);
        assert!(sink.chunks.is_empty());
        assert!(!cursor.is_midstream());
    }

    #[test]
    fn test_query_split() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        run(
            &mut cursor,
            &mut sink,
            b"GET /search?q=rust&page=2 HTTP/1.1\r\n\r\n",
        );

        let (_, path, query, _) = &sink.requests[0];
        assert_eq!(path, "/search");
        assert_eq!(query.as_deref(), Some("q=rust&page=2"));
    }

    #[test]
    fn test_head_split_across_reads() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        assert_eq!(run(&mut cursor, &mut sink, b"GET /sp"), Flow::Continue(S));
        assert!(cursor.is_midstream());
        assert!(sink.requests.is_empty());

        assert_eq!(
            run(&mut cursor, &mut sink, b"lit HTTP/1.1\r\nHost: lo"),
            Flow::Continue(S)
        );
        assert!(sink.requests.is_empty());

        assert_eq!(
            run(&mut cursor, &mut sink, b"calhost\r\n\r\n"),
            Flow::Continue(S)
        );
        assert_eq!(sink.requests.len(), 1);
        assert_eq!(sink.requests[0].1, "/split");
        assert!(!cursor.is_midstream());
    }

    #[test]
    fn test_pipelined_requests() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        run(
            &mut cursor,
            &mut sink,
            b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n",
        );

        assert_eq!(sink.requests.len(), 2);
        assert_eq!(sink.requests[0].1, "/a");
        assert_eq!(sink.requests[1].1, "/b");
    }

    #[test]
    fn test_body_in_same_read() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        run(
            &mut cursor,
            &mut sink,
            b"POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello",
        );

        assert_eq!(sink.requests.len(), 1);
        assert_eq!(sink.chunks, vec![(b"hello".to_vec(), true)]);
        assert!(!cursor.is_midstream());
    }

    #[test]
    fn test_body_split_across_reads() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        run(
            &mut cursor,
            &mut sink,
            b"POST /up HTTP/1.1\r\nContent-Length: 10\r\n\r\n abc",
        );
        assert_eq!(sink.chunks, vec![(b" abc".to_vec(), false)]);
        assert!(cursor.is_midstream());

        run(&mut cursor, &mut sink, b"defgh");
        assert_eq!(sink.chunks[1], (b"defgh".to_vec(), false));

        run(&mut cursor, &mut sink, b"i");
        assert_eq!(sink.chunks[2], (b"i".to_vec(), true));
        assert!(!cursor.is_midstream());
    }

    #[test]
    fn test_body_then_pipelined_request() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        run(
            &mut cursor,
            &mut sink,
            b"POST /a HTTP/1.1\r\nContent-Length: 2\r\n\r\nxyGET /b HTTP/1.1\r\n\r\n",
        );

        assert_eq!(sink.chunks, vec![(b"xy".to_vec(), true)]);
        assert_eq!(sink.requests.len(), 2);
        assert_eq!(sink.requests[1].1, "/b");
    }

    #[test]
    fn test_zero_length_body_skips_hook() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        run(
            &mut cursor,
            &mut sink,
            b"POST /a HTTP/1.1\r\nContent-Length: 0\r\n\r\n",
        );

        assert_eq!(sink.requests.len(), 1);
        assert!(sink.chunks.is_empty());
    }

    #[test]
    fn test_bad_method() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        let flow = run(&mut cursor, &mut sink, b"BLARGH / HTTP/1.1\r\n\r\n");

        assert_eq!(flow, Flow::Stop);
        assert_eq!(sink.errors, vec![ParseError::BadMethod]);
        assert!(sink.requests.is_empty());
    }

    #[test]
    fn test_request_line_without_spaces() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        let flow = run(&mut cursor, &mut sink, b"NONSENSE\r\n\r\n");

        assert_eq!(flow, Flow::Stop);
        assert_eq!(sink.errors, vec![ParseError::BadRequestLine]);
        assert!(sink.requests.is_empty());
    }

    #[test]
    fn test_missing_version() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        let flow = run(&mut cursor, &mut sink, b"GET /\r\n\r\n");

        assert_eq!(flow, Flow::Stop);
        assert_eq!(sink.errors, vec![ParseError::BadRequestLine]);
    }

    #[test]
    fn test_bare_lf_rejected() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        let flow = run(&mut cursor, &mut sink, b"GET / HTTP/1.1\nHost: x\n\n");

        assert_eq!(flow, Flow::Stop);
        assert_eq!(sink.errors, vec![ParseError::BadRequestLine]);
    }

    #[test]
    fn test_conflicting_content_length() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        let flow = run(
            &mut cursor,
            &mut sink,
            b"POST / HTTP/1.1\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\n",
        );

        assert_eq!(flow, Flow::Stop);
        assert_eq!(sink.errors, vec![ParseError::BadContentLength]);
    }

    #[test]
    fn test_non_numeric_content_length() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        run(
            &mut cursor,
            &mut sink,
            b"POST / HTTP/1.1\r\nContent-Length: 3x\r\n\r\n",
        );

        assert_eq!(sink.errors, vec![ParseError::BadContentLength]);
    }

    #[test]
    fn test_transfer_encoding_rejected() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        let flow = run(
            &mut cursor,
            &mut sink,
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n",
        );

        assert_eq!(flow, Flow::Stop);
        assert_eq!(sink.errors, vec![ParseError::UnsupportedTransferEncoding]);
    }

    #[test]
    fn test_head_too_large_single_read() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        let mut big = Vec::from(&b"GET / HTTP/1.1\r\nX-Pad: "[..]);
        big.resize(MAX_HEAD_SIZE + 16, b'a');

        let flow = run(&mut cursor, &mut sink, &big);

        assert_eq!(flow, Flow::Stop);
        assert_eq!(sink.errors, vec![ParseError::HeadTooLarge]);
    }

    #[test]
    fn test_head_too_large_trickled() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        assert_eq!(
            run(&mut cursor, &mut sink, b"GET / HTTP/1.1\r\nX-Pad: "),
            Flow::Continue(S)
        );
        let filler = vec![b'a'; MAX_HEAD_SIZE];
        let flow = run(&mut cursor, &mut sink, &filler);

        assert_eq!(flow, Flow::Stop);
        assert_eq!(sink.errors, vec![ParseError::HeadTooLarge]);
    }

    #[test]
    fn test_too_many_headers() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        let mut head = String::from("GET / HTTP/1.1\r\n");
        for i in 0..(MAX_HEADERS + 1) {
            head.push_str(&format!("X-H{}: v\r\n", i));
        }
        head.push_str("\r\n");

        let flow = run(&mut cursor, &mut sink, head.as_bytes());

        assert_eq!(flow, Flow::Stop);
        assert_eq!(sink.errors, vec![ParseError::TooManyHeaders]);
    }

    #[test]
    fn test_value_whitespace_trimmed() {
        struct ValueSink(Vec<Vec<u8>>);
        impl MessageSink<SocketId> for ValueSink {
            fn on_request(&mut self, socket: SocketId, request: Request<'_>) -> Flow<SocketId> {
                self.0
                    .extend(request.headers.iter().map(|h| h.value.to_vec()));
                Flow::Continue(socket)
            }
            fn on_body_chunk(&mut self, socket: SocketId, _: &[u8], _: bool) -> Flow<SocketId> {
                Flow::Continue(socket)
            }
            fn on_error(&mut self, _: SocketId, _: ParseError) {}
        }

        let mut cursor = ParseCursor::default();
        let mut sink = ValueSink(Vec::new());
        consume(
            &mut cursor,
            S,
            b"GET / HTTP/1.1\r\nX-A:  padded\t \r\n\r\n",
            &mut sink,
        );

        assert_eq!(sink.0, vec![b"padded".to_vec()]);
    }

    #[test]
    fn test_stop_halts_pipeline() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink {
            request_answers: vec![Flow::Stop],
            ..TestSink::default()
        };

        let flow = run(
            &mut cursor,
            &mut sink,
            b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n",
        );

        assert_eq!(flow, Flow::Stop);
        assert_eq!(sink.requests.len(), 1);
    }

    #[test]
    fn test_replaced_halts_pipeline() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink {
            request_answers: vec![Flow::Replaced(SocketId(7))],
            ..TestSink::default()
        };

        let flow = run(
            &mut cursor,
            &mut sink,
            b"GET /ws HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n",
        );

        assert_eq!(flow, Flow::Replaced(SocketId(7)));
        assert_eq!(sink.requests.len(), 1);
    }

    #[test]
    fn test_cursor_reset_discards_partial() {
        let mut cursor = ParseCursor::default();
        let mut sink = TestSink::default();

        run(&mut cursor, &mut sink, b"GET /part");
        assert!(cursor.is_midstream());

        cursor.reset();
        assert!(!cursor.is_midstream());

        run(&mut cursor, &mut sink, b"GET /fresh HTTP/1.1\r\n\r\n");
        assert_eq!(sink.requests.len(), 1);
        assert_eq!(sink.requests[0].1, "/fresh");
    }
}
