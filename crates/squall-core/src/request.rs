//! Borrowed request view handed to route handlers
//!
//! All slices point into the connection's receive buffer; nothing here
//! allocates or outlives the dispatch call.

use std::fmt;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Connect,
    Trace,
}

impl Method {
    /// Parse method token from bytes (zero-copy)
    #[inline]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"GET" => Some(Method::Get),
            b"POST" => Some(Method::Post),
            b"PUT" => Some(Method::Put),
            b"DELETE" => Some(Method::Delete),
            b"PATCH" => Some(Method::Patch),
            b"HEAD" => Some(Method::Head),
            b"OPTIONS" => Some(Method::Options),
            b"CONNECT" => Some(Method::Connect),
            b"TRACE" => Some(Method::Trace),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Connect => "CONNECT",
            Method::Trace => "TRACE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed header, borrowed from the receive buffer
#[derive(Debug, Clone, Copy)]
pub struct Header<'a> {
    pub name: &'a [u8],
    pub value: &'a [u8],
}

/// Parsed request head plus the route captures bound during dispatch
#[derive(Debug)]
pub struct Request<'a> {
    pub method: Method,
    /// Path without the query string
    pub path: &'a str,
    /// Query string without the leading `?`
    pub query: Option<&'a str>,
    pub headers: &'a [Header<'a>],
    /// Captures from the matched route pattern, in pattern order
    pub params: &'a [(String, String)],
}

impl<'a> Request<'a> {
    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&'a [u8]> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name.as_bytes()))
            .map(|h| h.value)
    }

    /// Route capture by name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Declared body length, if a well-formed Content-Length is present
    pub fn content_length(&self) -> Option<usize> {
        let value = self.header("content-length")?;
        std::str::from_utf8(value).ok()?.trim().parse().ok()
    }
}
