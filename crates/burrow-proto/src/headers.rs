//! Hop-by-hop header hygiene
//!
//! Headers that apply to a single transport hop must not cross the tunnel in
//! either direction. `content-length` is included because both sides
//! re-derive it from the materialized body.

/// Headers stripped from proxied requests and responses.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "content-length",
];

/// Case-insensitive membership test against [`HOP_BY_HOP_HEADERS`].
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
