//! Pure classification of transport outcomes into [`ErrorKind`]s.
//!
//! The mapping is total: every HTTP status code and every transport-level I/O
//! failure maps to exactly one kind, and both functions are queryable without
//! exercising any timing, so tests can assert classification in isolation.
//! [`ErrorKind::is_retryable`] decides retry eligibility on top of this.

use std::io;

use crate::error::ErrorKind;

/// Maps an HTTP status code to its [`ErrorKind`].
///
/// Success codes (2xx) have no failure kind; callers are expected to classify
/// only non-success outcomes. A 2xx passed in anyway maps to
/// [`ErrorKind::Unexpected`] so the mapping stays total.
pub fn from_status(status: u16) -> ErrorKind {
    match status {
        400 => ErrorKind::BadRequest,
        401 => ErrorKind::Unauthorized,
        403 => ErrorKind::Forbidden,
        404 => ErrorKind::NotFound,
        408 => ErrorKind::RequestTimeout,
        429 => ErrorKind::RateLimited,
        500..=599 => ErrorKind::ServerError,
        other => ErrorKind::Unexpected(other),
    }
}

/// Maps a transport-level I/O failure to its [`ErrorKind`].
///
/// Any failure before a response is received, including timeouts and DNS
/// failures, is a plain [`ErrorKind::Network`] failure
/// ([`ErrorKind::RequestTimeout`] is reserved for HTTP 408). Conditions that
/// indicate an established connection went away map to
/// [`ErrorKind::ConnectionClosed`] so the connection manager can tell a dead
/// link from a link that never came up.
pub fn from_io(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe => ErrorKind::ConnectionClosed,
        _ => ErrorKind::Network,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping_is_total() {
        // Every representable status code maps to exactly one kind without
        // panicking.
        for status in 0..=u16::MAX {
            let _ = from_status(status);
        }
    }

    #[test]
    fn test_known_status_codes() {
        assert_eq!(from_status(400), ErrorKind::BadRequest);
        assert_eq!(from_status(401), ErrorKind::Unauthorized);
        assert_eq!(from_status(403), ErrorKind::Forbidden);
        assert_eq!(from_status(404), ErrorKind::NotFound);
        assert_eq!(from_status(408), ErrorKind::RequestTimeout);
        assert_eq!(from_status(429), ErrorKind::RateLimited);
        assert_eq!(from_status(500), ErrorKind::ServerError);
        assert_eq!(from_status(503), ErrorKind::ServerError);
        assert_eq!(from_status(599), ErrorKind::ServerError);
    }

    #[test]
    fn test_unmapped_status_codes() {
        assert_eq!(from_status(418), ErrorKind::Unexpected(418));
        assert_eq!(from_status(302), ErrorKind::Unexpected(302));
        assert_eq!(from_status(600), ErrorKind::Unexpected(600));
        // Unmapped codes are terminal unless explicitly whitelisted.
        assert!(!from_status(418).is_retryable());
    }

    #[test]
    fn test_io_classification() {
        let timeout = io::Error::new(io::ErrorKind::TimedOut, "timed out");
        assert_eq!(from_io(&timeout), ErrorKind::Network);

        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(from_io(&refused), ErrorKind::Network);

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(from_io(&reset), ErrorKind::ConnectionClosed);

        let other = io::Error::other("dns failure");
        assert_eq!(from_io(&other), ErrorKind::Network);
    }
}
