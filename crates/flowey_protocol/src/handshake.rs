//! Websocket handshake conventions.
//!
//! Browsers cannot attach arbitrary headers to a websocket upgrade, so the
//! session token travels as the second entry of `Sec-WebSocket-Protocol`:
//!
//! ```text
//! Sec-WebSocket-Protocol: flowey, <session token>
//! ```
//!
//! The server answers with the single subprotocol `flowey`.

/// Subprotocol name negotiated with clients.
pub const SUBPROTOCOL: &str = "flowey";

/// Extracts the session token from a `Sec-WebSocket-Protocol` header value.
///
/// Returns `None` unless the header holds exactly two entries and the first
/// is [`SUBPROTOCOL`].
pub fn parse_subprotocol_header(value: &str) -> Option<&str> {
    let mut parts = value.split(',').map(str::trim);
    let protocol = parts.next()?;
    let token = parts.next()?;
    if parts.next().is_some() || protocol != SUBPROTOCOL || token.is_empty() {
        return None;
    }
    Some(token)
}
