//! Error types for route preloading

use crate::RouteId;
use thiserror::Error;

/// Result type for preload operations
pub type Result<T> = std::result::Result<T, PreloadError>;

/// Failure reported by a module import function.
///
/// Cloneable so a single rejected import can be handed to every caller
/// waiting on the same shared load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ImportError {
    message: String,
}

impl ImportError {
    /// Create a new import error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors that can occur while preloading routes
#[derive(Error, Debug)]
pub enum PreloadError {
    /// The route's import function rejected
    #[error("Import failed for {route}: {source}")]
    Import {
        route: RouteId,
        #[source]
        source: ImportError,
    },

    /// A module is already registered for the route
    #[error("Module already registered for {0}")]
    AlreadyRegistered(RouteId),

    /// Host capability missing (idle callbacks, observers, DOM access)
    #[error("Host capability unavailable: {0}")]
    Unsupported(&'static str),

    /// Bundle analysis artifact could not be used
    #[error("Bundle artifact unavailable: {0}")]
    Artifact(String),

    /// HTTP request failed
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PreloadError {
    /// Wrap an import failure for a route
    pub fn import(route: impl Into<RouteId>, source: ImportError) -> Self {
        PreloadError::Import {
            route: route.into(),
            source,
        }
    }

    /// Check if the error only means a host capability is missing
    pub fn is_unsupported(&self) -> bool {
        matches!(self, PreloadError::Unsupported(_))
    }
}

#[cfg(all(feature = "http", not(target_arch = "wasm32")))]
impl From<reqwest::Error> for PreloadError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => PreloadError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None => PreloadError::Artifact(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_error_display() {
        let err = PreloadError::import("/pos", ImportError::new("chunk 404"));
        assert_eq!(err.to_string(), "Import failed for /pos: chunk 404");
    }

    #[test]
    fn test_already_registered_display() {
        let err = PreloadError::AlreadyRegistered(RouteId::from("/crm"));
        assert_eq!(err.to_string(), "Module already registered for /crm");
    }

    #[test]
    fn test_unsupported() {
        assert!(PreloadError::Unsupported("requestIdleCallback").is_unsupported());
        assert!(!PreloadError::Config("bad".into()).is_unsupported());
    }
}
