// Error types for the Keel framework

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Method not allowed for {path}; allowed: {}", .allowed.join(", "))]
    MethodNotAllowed { path: String, allowed: Vec<String> },

    #[error("Missing mandatory parameter `{parameter}` for route `{route}`")]
    MissingMandatoryParameter { route: String, parameter: String },

    #[error(
        "Parameter `{parameter}` for route `{route}` has value `{value}` which does not satisfy `{requirement}`"
    )]
    InvalidParameter {
        route: String,
        parameter: String,
        value: String,
        requirement: String,
    },

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Circular reference detected: {}", .path.join(" -> "))]
    CircularReference { path: Vec<String> },

    #[error(
        "Cannot autowire service `{service}`: no service satisfies type `{type_name}` required by parameter `{parameter}`"
    )]
    AutowireFailure {
        service: String,
        parameter: String,
        type_name: String,
    },

    #[error("Unresolvable controller `{identifier}`: {reason}")]
    UnresolvableController { identifier: String, reason: String },

    #[error("Unresolvable argument `{parameter}` of controller `{controller}`: {reason}")]
    UnresolvableArgument {
        controller: String,
        parameter: String,
        reason: String,
    },

    #[error("Controller `{controller}` returned a raw value and no view listener converted it")]
    ViewNotConvertible { controller: String },

    #[error("Parameter not found: {0}")]
    ParameterNotFound(String),

    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Dependency injection error: {0}")]
    DependencyInjection(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Listener error: {0}")]
    Listener(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::RouteNotFound(_) => 404,
            Error::MethodNotAllowed { .. } => 405,
            Error::Deserialization(_) => 400,
            _ => 500,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Unwrap a dispatch failure back into a kernel error.
    ///
    /// Listeners that fail with a `keel_core::Error` keep their original
    /// variant; foreign errors are wrapped.
    pub fn from_event(err: keel_events::EventError) -> Self {
        match err {
            keel_events::EventError::Listener { source, .. } => {
                match source.downcast::<Error>() {
                    Ok(err) => *err,
                    Err(other) => Error::Listener(other.to_string()),
                }
            }
            other => Error::Listener(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::RouteNotFound("/x".into()).status_code(), 404);
        assert_eq!(
            Error::MethodNotAllowed {
                path: "/x".into(),
                allowed: vec!["GET".into()]
            }
            .status_code(),
            405
        );
        assert_eq!(
            Error::ServiceNotFound("mailer".into()).status_code(),
            500
        );
    }

    #[test]
    fn test_circular_reference_names_cycle() {
        let err = Error::CircularReference {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(
            err.to_string(),
            "Circular reference detected: a -> b -> a"
        );
    }

    #[test]
    fn test_from_event_preserves_kernel_error() {
        let source: Box<dyn std::error::Error + Send + Sync> =
            Box::new(Error::RouteNotFound("/gone".into()));
        let err = Error::from_event(keel_events::EventError::Listener {
            key: "request".into(),
            source,
        });
        assert!(matches!(err, Error::RouteNotFound(_)));
    }
}
