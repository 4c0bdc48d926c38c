//! squall-router: Zero-dependency segment-trie route dispatcher
//!
//! Maps (method, path) pairs to opaque handler IDs so the connection layer
//! never stores closures inside the table itself.
//!
//! ## Pattern Syntax
//! - `/users/list` - Static segments, matched exactly
//! - `:name` - Capture (binds one segment)
//! - `*` or `*name` - Tail capture (binds the remaining path)
//!
//! ## Matching Priority
//! 1. Exact static segment (highest)
//! 2. Capture
//! 3. Tail capture (lowest)
//!
//! Registration is first-wins: adding a second handler for an identical
//! method + pattern pair is a no-op and reports `false`.
//!
//! ## Example
//! ```
//! use squall_router::Router;
//!
//! let mut router = Router::new();
//! router.add("GET", "/users", 0);
//! router.add("GET", "/users/:id", 1);
//! router.add("GET", "/files/*path", 2);
//!
//! let m = router.find("GET", "/users/123").unwrap();
//! assert_eq!(m.handler_id, 1);
//! assert_eq!(m.params, vec![("id".to_string(), "123".to_string())]);
//! ```

use std::collections::HashMap;

/// Successful dispatch result
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    /// ID the pattern was registered under
    pub handler_id: u32,
    /// Captured segments as (name, value) pairs, in pattern order
    pub params: Vec<(String, String)>,
}

/// Trie node keyed by one path segment
#[derive(Debug, Default)]
struct Node {
    /// Static children (key = segment text)
    fixed: HashMap<String, Node>,
    /// Capture child (:name)
    capture: Option<Box<Capture>>,
    /// Tail-capture child (*name)
    tail: Option<Tail>,
    /// Handler bound at this exact depth
    handler_id: Option<u32>,
}

#[derive(Debug)]
struct Capture {
    name: String,
    node: Node,
}

#[derive(Debug)]
struct Tail {
    name: String,
    handler_id: u32,
}

/// Method-keyed segment trie with a fallback slot for unrouted requests.
///
/// One trie per method gives O(1) method dispatch, then O(k) path walk
/// where k is the number of segments.
#[derive(Debug, Default)]
pub struct Router {
    /// Method -> trie root
    trees: HashMap<String, Node>,
    /// Handler consulted when no pattern matches
    unhandled: Option<u32>,
}

impl Router {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pattern under a handler ID.
    ///
    /// Returns `false` (and changes nothing) if an identical
    /// method + pattern pair is already registered: first wins.
    ///
    /// # Example
    /// ```
    /// use squall_router::Router;
    ///
    /// let mut router = Router::new();
    /// assert!(router.add("GET", "/users/:id", 0));
    /// assert!(!router.add("GET", "/users/:id", 7));
    /// assert_eq!(router.find("GET", "/users/1").unwrap().handler_id, 0);
    /// ```
    pub fn add(&mut self, method: &str, pattern: &str, handler_id: u32) -> bool {
        let tree = self.trees.entry(method.to_ascii_uppercase()).or_default();
        let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        Self::add_node(tree, &segments, handler_id)
    }

    fn add_node(node: &mut Node, segments: &[&str], handler_id: u32) -> bool {
        if segments.is_empty() {
            if node.handler_id.is_some() {
                return false;
            }
            node.handler_id = Some(handler_id);
            return true;
        }

        let segment = segments[0];
        let rest = &segments[1..];

        if let Some(name) = segment.strip_prefix(':') {
            // Capture segment; the first registration fixes its name
            // for this position.
            let capture = node.capture.get_or_insert_with(|| {
                Box::new(Capture {
                    name: name.to_string(),
                    node: Node::default(),
                })
            });
            Self::add_node(&mut capture.node, rest, handler_id)
        } else if let Some(name) = segment.strip_prefix('*') {
            // Tail segment (*path or bare *), always terminal
            if node.tail.is_some() {
                return false;
            }
            let tail_name = if name.is_empty() { "*" } else { name };
            node.tail = Some(Tail {
                name: tail_name.to_string(),
                handler_id,
            });
            true
        } else {
            let child = node.fixed.entry(segment.to_string()).or_default();
            Self::add_node(child, rest, handler_id)
        }
    }

    /// Install the fallback handler consulted when nothing matches
    pub fn set_unhandled(&mut self, handler_id: u32) {
        self.unhandled = Some(handler_id);
    }

    /// The fallback handler ID, if one was installed
    pub fn unhandled(&self) -> Option<u32> {
        self.unhandled
    }

    /// Match a request path.
    ///
    /// Returns the handler ID and captured params, or `None` when no
    /// pattern matches. The fallback slot is deliberately not consulted
    /// here; callers decide whether a miss goes to the fallback.
    ///
    /// # Example
    /// ```
    /// use squall_router::Router;
    ///
    /// let mut router = Router::new();
    /// router.add("GET", "/users/:id", 0);
    ///
    /// let m = router.find("GET", "/users/42").unwrap();
    /// assert_eq!(m.handler_id, 0);
    /// assert_eq!(m.params[0], ("id".to_string(), "42".to_string()));
    /// ```
    pub fn find(&self, method: &str, path: &str) -> Option<RouteMatch> {
        let tree = self.trees.get(&method.to_ascii_uppercase())?;
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = Vec::new();
        Self::find_node(tree, &segments, &mut params)
    }

    fn find_node(
        node: &Node,
        segments: &[&str],
        params: &mut Vec<(String, String)>,
    ) -> Option<RouteMatch> {
        if segments.is_empty() {
            return node.handler_id.map(|id| RouteMatch {
                handler_id: id,
                params: params.clone(),
            });
        }

        let segment = segments[0];
        let rest = &segments[1..];

        if let Some(child) = node.fixed.get(segment) {
            if let Some(m) = Self::find_node(child, rest, params) {
                return Some(m);
            }
        }

        if let Some(ref capture) = node.capture {
            params.push((capture.name.clone(), segment.to_string()));
            if let Some(m) = Self::find_node(&capture.node, rest, params) {
                return Some(m);
            }
            params.pop();
        }

        if let Some(ref tail) = node.tail {
            let rest_path = segments.join("/");
            params.push((tail.name.clone(), rest_path));
            return Some(RouteMatch {
                handler_id: tail.handler_id,
                params: params.clone(),
            });
        }

        None
    }

    /// Whether any pattern is registered for a method
    pub fn has_method(&self, method: &str) -> bool {
        self.trees.contains_key(&method.to_ascii_uppercase())
    }
}
