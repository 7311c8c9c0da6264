use serde::Serialize;
use thiserror::Error;

/// Classification of an [`RpcError`].
///
/// Kinds are what the circuit breaker's allow-list matches against, so a
/// breaker can be configured to count only the failures that indicate an
/// unhealthy backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ErrorKind {
    Schema,
    MethodNotFound,
    AmbiguousMethod,
    UnknownMessageType,
    InvalidRequest,
    NoHealthyInstance,
    EndpointMetadata,
    Registry,
    Transport,
    Timeout,
    Remote,
    CircuitOpen,
    ServiceUnavailable,
    Io,
    Serialization,
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Method '{0}' not found")]
    MethodNotFound(String),

    #[error("Method '{method}' is declared by more than one service: {}", services.join(", "))]
    AmbiguousMethod {
        method: String,
        services: Vec<String>,
    },

    #[error("Message type '{0}' is not declared in any loaded IDL file")]
    UnknownMessageType(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No healthy instance of service '{service}' in group '{group}'")]
    NoHealthyInstance { service: String, group: String },

    #[error("Instance {host}:{port} has no '{key}' metadata entry")]
    MissingEndpointMetadata { host: String, port: u16, key: String },

    #[error("Instance {host}:{port} has invalid '{key}' metadata value '{value}'")]
    InvalidEndpointMetadata {
        host: String,
        port: u16,
        key: String,
        value: String,
    },

    #[error("Naming registry error: {0}")]
    Registry(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("Circuit open for '{0}'")]
    CircuitOpen(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

impl RpcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Schema(_) => ErrorKind::Schema,
            RpcError::MethodNotFound(_) => ErrorKind::MethodNotFound,
            RpcError::AmbiguousMethod { .. } => ErrorKind::AmbiguousMethod,
            RpcError::UnknownMessageType(_) => ErrorKind::UnknownMessageType,
            RpcError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            RpcError::NoHealthyInstance { .. } => ErrorKind::NoHealthyInstance,
            RpcError::MissingEndpointMetadata { .. } | RpcError::InvalidEndpointMetadata { .. } => {
                ErrorKind::EndpointMetadata
            }
            RpcError::Registry(_) => ErrorKind::Registry,
            RpcError::Transport(_) => ErrorKind::Transport,
            RpcError::Timeout(_) => ErrorKind::Timeout,
            RpcError::Remote { .. } => ErrorKind::Remote,
            RpcError::CircuitOpen(_) => ErrorKind::CircuitOpen,
            RpcError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            RpcError::Io(_) => ErrorKind::Io,
            RpcError::JsonSerialization(_) => ErrorKind::Serialization,
        }
    }

    /// Whether the web layer should answer this with "service unavailable".
    pub fn is_service_unavailable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::CircuitOpen | ErrorKind::NoHealthyInstance | ErrorKind::ServiceUnavailable
        )
    }

    /// Errors that indicate a programming or deployment mistake rather than
    /// a transient backend condition.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MethodNotFound
                | ErrorKind::AmbiguousMethod
                | ErrorKind::UnknownMessageType
                | ErrorKind::Schema
        )
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(RpcError::Transport("x".into()).kind(), ErrorKind::Transport);
        assert_eq!(RpcError::Timeout(10).kind(), ErrorKind::Timeout);
        assert_eq!(
            RpcError::MissingEndpointMetadata {
                host: "h".into(),
                port: 1,
                key: "k".into()
            }
            .kind(),
            ErrorKind::EndpointMetadata
        );
        assert_eq!(
            RpcError::InvalidEndpointMetadata {
                host: "h".into(),
                port: 1,
                key: "k".into(),
                value: "v".into()
            }
            .kind(),
            ErrorKind::EndpointMetadata
        );
    }

    #[test]
    fn test_service_unavailable_class() {
        assert!(RpcError::CircuitOpen("a".into()).is_service_unavailable());
        assert!(RpcError::NoHealthyInstance {
            service: "s".into(),
            group: "g".into()
        }
        .is_service_unavailable());
        assert!(!RpcError::MethodNotFound("m".into()).is_service_unavailable());
        assert!(!RpcError::Transport("t".into()).is_service_unavailable());
    }

    #[test]
    fn test_configuration_errors() {
        assert!(RpcError::MethodNotFound("m".into()).is_configuration_error());
        assert!(RpcError::AmbiguousMethod {
            method: "m".into(),
            services: vec!["A".into(), "B".into()]
        }
        .is_configuration_error());
        assert!(!RpcError::Timeout(1).is_configuration_error());
    }

    #[test]
    fn test_ambiguous_message_lists_services() {
        let err = RpcError::AmbiguousMethod {
            method: "Upload".into(),
            services: vec!["Ticket".into(), "File".into()],
        };
        assert_eq!(
            err.to_string(),
            "Method 'Upload' is declared by more than one service: Ticket, File"
        );
    }
}
