use std::error;
use std::fmt;

/// Convenient result type for sync operations using [`SyncError`] as the error type.
///
/// This type alias reduces boilerplate when working with fallible operations
/// in the connectivity core. Most functions in this crate return this type.
pub type SyncResult<T> = Result<T, SyncError>;

/// Main error type for the connectivity and synchronization core.
///
/// [`SyncError`] pairs a classified [`ErrorKind`] with a static description
/// and optional dynamic detail, and can aggregate multiple errors. The kind is
/// the single source of truth for retry eligibility (see
/// [`ErrorKind::is_retryable`]).
#[derive(Debug, Clone)]
pub struct SyncError {
    repr: ErrorRepr,
}

/// Internal representation of error data.
///
/// This enum supports different error patterns while maintaining a unified
/// interface. Users should not interact with this type directly but use
/// [`SyncError`] methods instead.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Error with kind and static description.
    WithDescription(ErrorKind, &'static str),
    /// Error with kind, static description, and dynamic detail.
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    /// Multiple aggregated errors.
    Many(Vec<SyncError>),
}

/// Classified failure kinds for the connectivity core.
///
/// The first group mirrors the transport/HTTP boundary: exactly one of these
/// kinds is produced per failed attempt by [`crate::classify`]. The second
/// group covers local failures (storage, serialization, configuration) which
/// are always fatal to the single operation and never retried automatically.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Transport & HTTP classification
    /// I/O failure or timeout before any response was received.
    Network,
    /// HTTP 400.
    BadRequest,
    /// HTTP 401.
    Unauthorized,
    /// HTTP 403.
    Forbidden,
    /// HTTP 404.
    NotFound,
    /// HTTP 408.
    RequestTimeout,
    /// HTTP 429.
    RateLimited,
    /// HTTP 500-599.
    ServerError,
    /// Any status code with no dedicated mapping.
    Unexpected(u16),
    /// The persistent connection was closed, by either side, while an
    /// operation was in flight.
    ConnectionClosed,

    // Local failures
    StorageError,
    SerializationError,
    DeserializationError,
    ConfigError,
    InvalidState,
    WorkerPanic,

    // Unknown / Uncategorized
    Unknown,
}

impl ErrorKind {
    /// Returns `true` if a failure of this kind is worth retrying.
    ///
    /// This is the default retryable set of the transport boundary: transient
    /// network conditions, server-side timeouts and overload, and internal
    /// server errors. Everything else is terminal, including every local
    /// failure kind.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network
                | ErrorKind::RequestTimeout
                | ErrorKind::RateLimited
                | ErrorKind::ServerError
        )
    }
}

impl SyncError {
    /// Creates a [`SyncError`] containing multiple aggregated errors.
    ///
    /// This is useful when multiple operations fail and all failures should be
    /// reported rather than just the first one.
    pub fn many(errors: Vec<SyncError>) -> SyncError {
        SyncError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or
    /// [`ErrorKind::Unknown`] if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    ///
    /// For single errors, returns a vector with one element. For multiple
    /// errors, returns a flattened vector of all error kinds.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has
    /// one. Returns [`None`] if no detailed information is available.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }
}

impl PartialEq for SyncError {
    fn eq(&self, other: &SyncError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;

                Ok(())
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;
                f.write_str(" -> ")?;
                detail.fmt(f)?;

                Ok(())
            }
            ErrorRepr::Many(ref errors) => {
                if errors.is_empty() {
                    write!(f, "Multiple errors occurred (empty)")?;
                } else if errors.len() == 1 {
                    errors[0].fmt(f)?;
                } else {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl error::Error for SyncError {}

/// Creates a [`SyncError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for SyncError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

/// Creates a [`SyncError`] from an error kind, static description, and dynamic detail.
impl From<(ErrorKind, &'static str, String)> for SyncError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

/// Creates a [`SyncError`] from a vector of errors for aggregation.
impl<E> From<Vec<E>> for SyncError
where
    E: Into<SyncError>,
{
    fn from(errors: Vec<E>) -> SyncError {
        SyncError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

/// Converts [`std::io::Error`] to [`SyncError`] via transport classification.
///
/// I/O failures on the wire are what the core retries, so the kind comes from
/// [`crate::classify::from_io`] rather than a fixed local kind.
impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                crate::classify::from_io(&err),
                "I/O error occurred",
                err.to_string(),
            ),
        }
    }
}

/// Converts [`serde_json::Error`] to [`SyncError`] with appropriate error kind.
///
/// Maps to [`ErrorKind::SerializationError`] for I/O-side failures and
/// [`ErrorKind::DeserializationError`] for syntax/data failures based on the
/// error classification.
impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> SyncError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => {
                (ErrorKind::SerializationError, "JSON I/O operation failed")
            }
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

/// Converts [`sqlx::Error`] to [`SyncError`] with [`ErrorKind::StorageError`].
///
/// Local storage failures are always fatal to the single operation and never
/// retried automatically, so every sqlx error maps to the same kind.
impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::StorageError,
                "Queue storage operation failed",
                err.to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, sync_error};

    #[test]
    fn test_simple_error_creation() {
        let err = SyncError::from((ErrorKind::Network, "Connection refused"));
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(err.detail(), None);
        assert_eq!(err.kinds(), vec![ErrorKind::Network]);
    }

    #[test]
    fn test_error_with_detail() {
        let err = SyncError::from((
            ErrorKind::StorageError,
            "Queue storage operation failed",
            "database is locked".to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::StorageError);
        assert_eq!(err.detail(), Some("database is locked"));
    }

    #[test]
    fn test_multiple_errors() {
        let errors = vec![
            SyncError::from((ErrorKind::Unauthorized, "Session token rejected")),
            SyncError::from((ErrorKind::Network, "Connection reset")),
        ];
        let multi_err = SyncError::many(errors);

        assert_eq!(multi_err.kind(), ErrorKind::Unauthorized);
        assert_eq!(
            multi_err.kinds(),
            vec![ErrorKind::Unauthorized, ErrorKind::Network]
        );
        assert_eq!(multi_err.detail(), None);
    }

    #[test]
    fn test_empty_multiple_errors() {
        let multi_err = SyncError::many(vec![]);
        assert_eq!(multi_err.kind(), ErrorKind::Unknown);
        assert_eq!(multi_err.kinds(), vec![]);
    }

    #[test]
    fn test_error_equality() {
        let err1 = SyncError::from((ErrorKind::RateLimited, "Too many requests"));
        let err2 = SyncError::from((ErrorKind::RateLimited, "Too many requests"));
        let err3 = SyncError::from((ErrorKind::Forbidden, "Access denied"));

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }

    #[test]
    fn test_error_display_with_detail() {
        let err = SyncError::from((
            ErrorKind::ServerError,
            "Server rejected the request",
            "internal error".to_string(),
        ));
        let display_str = format!("{err}");
        assert!(display_str.contains("ServerError"));
        assert!(display_str.contains("Server rejected the request"));
        assert!(display_str.contains("internal error"));
    }

    #[test]
    fn test_default_retryable_set() {
        for kind in [
            ErrorKind::Network,
            ErrorKind::RequestTimeout,
            ErrorKind::RateLimited,
            ErrorKind::ServerError,
        ] {
            assert!(kind.is_retryable(), "{kind:?} should be retryable");
        }

        for kind in [
            ErrorKind::BadRequest,
            ErrorKind::Unauthorized,
            ErrorKind::Forbidden,
            ErrorKind::NotFound,
            ErrorKind::Unexpected(418),
            ErrorKind::ConnectionClosed,
            ErrorKind::StorageError,
            ErrorKind::SerializationError,
            ErrorKind::DeserializationError,
            ErrorKind::ConfigError,
            ErrorKind::InvalidState,
            ErrorKind::Unknown,
        ] {
            assert!(!kind.is_retryable(), "{kind:?} should be terminal");
        }
    }

    #[test]
    fn test_macro_usage() {
        let err = sync_error!(ErrorKind::InvalidState, "Session already started");
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(err.detail(), None);

        let err_with_detail = sync_error!(
            ErrorKind::DeserializationError,
            "Frame decoding failed",
            "unknown frame type 'pong'"
        );
        assert_eq!(err_with_detail.kind(), ErrorKind::DeserializationError);
        assert!(err_with_detail.detail().unwrap().contains("pong"));
    }

    #[test]
    fn test_bail_macro() {
        fn test_function() -> SyncResult<i32> {
            bail!(ErrorKind::ConfigError, "Test error");
        }

        let err = test_function().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
