//! Error types for the tether runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tether runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or unexpected message: unknown request id, unknown guid,
    /// unknown type. Always fatal to the operation; it signals client/server
    /// desync and is never dropped silently.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The far side executed the call and reported failure.
    #[error("{name}: {message}")]
    Remote {
        /// Error type name (e.g. "TimeoutError").
        name: String,
        /// Human-readable message.
        message: String,
        /// Remote stack trace, with local call-site frames appended by
        /// `wrap_api_call`.
        stack: Option<String>,
    },

    /// A schema mismatch detected locally, before sending or on a received
    /// payload. Never transmitted.
    #[error(transparent)]
    Validation(#[from] tether_protocol::ValidationError),

    /// A call issued after, or outstanding during, `close()`. Carries the
    /// stored close reason so callers never hang.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Transport-level failure (framing, stream I/O).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Timeout waiting for an event or object.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// An internal channel closed unexpectedly.
    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    /// A `__create__` named a type the registry does not know.
    #[error("Unknown remote object type: {0}")]
    UnknownObjectType(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A failure annotated with the logical API call it escaped from and the
    /// captured call site.
    #[error("{api_name} (at {location}): {source}")]
    Api {
        api_name: String,
        location: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Returns the error name if this is a remote error.
    pub fn error_name(&self) -> Option<&str> {
        match self {
            Error::Remote { name, .. } => Some(name),
            Error::Api { source, .. } => source.error_name(),
            _ => None,
        }
    }

    /// Returns the stack trace if this is a remote error with a stack.
    pub fn stack_trace(&self) -> Option<&str> {
        match self {
            Error::Remote { stack, .. } => stack.as_deref(),
            Error::Api { source, .. } => source.stack_trace(),
            _ => None,
        }
    }

    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Remote { name, .. } => name == "TimeoutError",
            Error::Api { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Attaches the logical call name and captured call site.
    ///
    /// Remote errors keep their variant: the call name is prefixed onto the
    /// message and the local frame is appended to the remote stack, so both
    /// sides of the failure stay visible in one trace. Everything else is
    /// wrapped in [`Error::Api`].
    pub fn with_call_context(
        self,
        api_name: &str,
        location: &'static std::panic::Location<'static>,
    ) -> Self {
        match self {
            Error::Remote {
                name,
                message,
                stack,
            } => {
                let local_frame = format!("    at {location}");
                Error::Remote {
                    name,
                    message: format!("{api_name}: {message}"),
                    stack: Some(match stack {
                        Some(remote) => format!("{remote}\n{local_frame}"),
                        None => local_frame,
                    }),
                }
            }
            other => Error::Api {
                api_name: api_name.to_string(),
                location: location.to_string(),
                source: Box::new(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_timeout_is_classified() {
        let err = Error::Remote {
            name: "TimeoutError".to_string(),
            message: "deadline exceeded".to_string(),
            stack: None,
        };
        assert!(err.is_timeout());
        assert_eq!(err.error_name(), Some("TimeoutError"));
    }

    #[test]
    fn call_context_prefixes_remote_message_and_extends_stack() {
        let err = Error::Remote {
            name: "Error".to_string(),
            message: "no such node".to_string(),
            stack: Some("    at remote.js:10".to_string()),
        };

        let annotated = err.with_call_context("session.query", std::panic::Location::caller());
        match annotated {
            Error::Remote { message, stack, .. } => {
                assert!(message.starts_with("session.query: "));
                let stack = stack.unwrap();
                assert!(stack.contains("remote.js:10"));
                assert!(stack.contains("error.rs"));
            }
            other => panic!("expected Remote, got {other:?}"),
        }
    }

    #[test]
    fn call_context_wraps_local_errors() {
        let err = Error::Protocol("unknown guid".to_string());
        let annotated = err.with_call_context("session.stop", std::panic::Location::caller());
        match annotated {
            Error::Api {
                api_name, source, ..
            } => {
                assert_eq!(api_name, "session.stop");
                assert!(matches!(*source, Error::Protocol(_)));
            }
            other => panic!("expected Api, got {other:?}"),
        }
    }
}
