//! Header policy for relayed traffic
//!
//! Static allow/deny rules applied on the way to the backend and on the way
//! back to the caller.

use http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderName};

/// Hop-by-hop headers never copied onto the upstream request
pub const REQUEST_DENY_LIST: [&str; 9] = [
    "host",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authorization",
    "proxy-connection",
];

/// Headers never copied from the upstream response
pub const RESPONSE_DENY_LIST: [&str; 3] = ["transfer-encoding", "connection", "keep-alive"];

pub fn is_denied_request_header(name: &HeaderName) -> bool {
    REQUEST_DENY_LIST.contains(&name.as_str())
}

pub fn is_denied_response_header(name: &HeaderName) -> bool {
    RESPONSE_DENY_LIST.contains(&name.as_str())
}

/// Build the header set sent upstream.
///
/// Every incoming header except the deny list is copied, then cookie and
/// authorization are written again from the incoming set so session and
/// bearer credentials always reach the backend.
pub fn outgoing_request_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut outgoing = HeaderMap::with_capacity(incoming.len());
    for (name, value) in incoming.iter() {
        if is_denied_request_header(name) {
            continue;
        }
        outgoing.append(name.clone(), value.clone());
    }

    for name in [COOKIE, AUTHORIZATION] {
        if !incoming.contains_key(&name) {
            continue;
        }
        outgoing.remove(&name);
        for value in incoming.get_all(&name) {
            outgoing.append(name.clone(), value.clone());
        }
    }

    outgoing
}

/// Build the header set returned to the caller.
///
/// Each Set-Cookie occurrence is appended on its own; merging them into one
/// comma-joined value breaks cookie parsing in browsers.
pub fn outgoing_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut outgoing = HeaderMap::with_capacity(upstream.len());
    for name in upstream.keys() {
        if is_denied_response_header(name) {
            continue;
        }
        if *name == SET_COOKIE {
            for cookie in upstream.get_all(SET_COOKIE) {
                outgoing.append(SET_COOKIE, cookie.clone());
            }
            continue;
        }
        for value in upstream.get_all(name) {
            outgoing.append(name.clone(), value.clone());
        }
    }
    outgoing
}
