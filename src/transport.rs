//! Request-side credential extraction
//!
//! A transport-neutral view of an inbound request, plus the small parsers that pull
//! the consent cookie and capability token out of it. [`GateRequest::outbound`] builds
//! the request that goes on to the origin once the gate forwards.

use crate::core::pattern::PatternMatcher;
use crate::core::render::{headers, ForwardingMetadata};

/// Cookie carrying the consent state
pub const CONSENT_COOKIE: &str = "user-consent";

/// Header carrying a capability token
pub const CAPABILITY_HEADER: &str = "X-Capability-Token";

/// Query parameter carrying a capability token
pub const CAPABILITY_QUERY_PARAM: &str = "capability";

/// Connection-level headers that are never forwarded
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Headers only the gate may set on a forwarded request
pub const GATE_ASSERTED: &[&str] = &[headers::VERIFIED_CAPABILITY, headers::CAPABILITY_GRANTED_BY];

/// The parts of an inbound request the gate reads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateRequest {
    /// HTTP method, as sent
    pub method: String,
    /// Path without query string
    pub path: String,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
    /// Header name/value pairs, in arrival order
    pub headers: Vec<(String, String)>,
}

impl GateRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        GateRequest {
            method: method.into(),
            path: path.into(),
            query: None,
            headers: Vec::new(),
        }
    }

    /// Build from a method and a request target such as `/a/b?x=1`
    pub fn from_target(method: impl Into<String>, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };
        GateRequest {
            method: method.into(),
            path: path.to_string(),
            query,
            headers: Vec::new(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First header value with this name, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Value of a named cookie from the `Cookie` header(s)
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("cookie"))
            .find_map(|(_, value)| parse_cookie(value, name))
    }

    /// Raw `user-consent` cookie value
    pub fn consent_cookie(&self) -> Option<&str> {
        self.cookie(CONSENT_COOKIE)
    }

    /// Capability token from the header, falling back to the query parameter
    ///
    /// Blank values are treated as absent. A query value that was sent with a raw `+`
    /// (form-decoded to a space) has it restored, since tokens never contain spaces.
    pub fn capability_token(&self) -> Option<String> {
        if let Some(token) = self.header(CAPABILITY_HEADER) {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }

        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == CAPABILITY_QUERY_PARAM)
            .map(|(_, value)| value.trim().replace(' ', "+"))
            .filter(|value| !value.is_empty())
    }

    /// Path the gate decided on, plus the original query
    ///
    /// The origin must see the same path that was matched against the rule tables.
    pub fn gated_target(&self) -> String {
        let path = PatternMatcher::normalize(&self.path);
        match self.query.as_deref() {
            Some(query) => format!("{}?{}", path, query),
            None => path,
        }
    }

    /// Request to send to the origin after a forward decision
    ///
    /// Drops `Host`, hop-by-hop headers and any client-supplied copy of a gate-asserted
    /// header, then appends the headers the gate attached.
    pub fn outbound(&self, metadata: &ForwardingMetadata) -> OutboundRequest {
        let mut outbound_headers: Vec<(String, String)> = self
            .headers
            .iter()
            .filter(|(name, _)| !is_stripped(name))
            .cloned()
            .collect();
        outbound_headers.extend(
            metadata
                .request_headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone())),
        );

        OutboundRequest {
            method: self.method.clone(),
            target: self.gated_target(),
            headers: outbound_headers,
        }
    }
}

/// A forwarded request, ready to be sent to the origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub method: String,
    /// Normalized path and query, relative to the origin base URL
    pub target: String,
    pub headers: Vec<(String, String)>,
}

impl OutboundRequest {
    /// First header value with this name, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn is_stripped(name: &str) -> bool {
    name.eq_ignore_ascii_case("host")
        || HOP_BY_HOP
            .iter()
            .chain(GATE_ASSERTED)
            .any(|stripped| name.eq_ignore_ascii_case(stripped))
}

/// Find `name` in a `Cookie` header value
///
/// Pairs are split on `;` and trimmed; the value is everything after the first `=`.
pub fn parse_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|pair| match pair.split_once('=') {
            Some((key, value)) if key == name => Some(value),
            _ => None,
        })
}
