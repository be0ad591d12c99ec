// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Errors raised while reading cluster snapshots
#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    /// A resource quantity string could not be parsed
    #[error("Invalid quantity '{value}': {reason}")]
    #[diagnostic(
        code(lodestar::invalid_quantity),
        help("Use a Kubernetes quantity such as '500m', '2', '128Mi' or '1Gi'")
    )]
    InvalidQuantity {
        #[allow(unused)]
        value: String,
        #[allow(unused)]
        reason: String,
    },

    /// A JSON or YAML document did not decode into the expected object
    #[error("Malformed {format} document: {source}")]
    #[diagnostic(
        code(lodestar::malformed_document),
        help("Check the document against the Kubernetes object schema; unknown fields are ignored")
    )]
    MalformedDocument {
        #[allow(unused)]
        format: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn invalid_quantity(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQuantity {
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed_document(
        format: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::MalformedDocument {
            format,
            source: Box::new(source),
        }
    }
}
