//! Error types for the Halldyll hotswap system.
//!
//! This module provides the error hierarchy for every stage of a hotswap
//! attempt: configuration, template loading, expression evaluation, and
//! the service calls issued while applying a patch.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Halldyll hotswap system.
#[derive(Debug, Error)]
pub enum HotswapError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Template or change-set loading errors.
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Template expression evaluation errors.
    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    /// Errors returned by the environment or by a service call.
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// An environment override could not be interpreted.
    #[error("Invalid value '{value}' for environment variable {name}")]
    InvalidEnvVar {
        /// Name of the variable.
        name: String,
        /// The rejected value.
        value: String,
    },
}

/// Template and change-set loading errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The document could not be read.
    #[error("Failed to read {path}: {message}")]
    ReadFailed {
        /// Path of the document.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// The document is not valid JSON or YAML, or has the wrong shape.
    #[error("Failed to parse {what}: {message}")]
    ParseError {
        /// What was being parsed (template, change set, snapshot).
        what: String,
        /// Description of the parse error.
        message: String,
    },
}

/// Template expression evaluation errors.
///
/// `UnresolvableReference` and `AttributeNotFound` form the
/// unresolvable-reference class; see [`HotswapError::is_unresolvable`].
/// `UnsupportedResourceType` and `UnsupportedAttribute` mean the attribute
/// formatting table needs extending, not that the template is wrong.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// The intrinsic function is not part of the supported grammar.
    #[error("Intrinsic function {name} is not supported")]
    UnsupportedIntrinsic {
        /// Name of the intrinsic.
        name: String,
    },

    /// The intrinsic function has arguments of the wrong shape.
    #[error("Malformed {name} expression: {message}")]
    MalformedIntrinsic {
        /// Name of the intrinsic.
        name: String,
        /// Description of the problem.
        message: String,
    },

    /// A `Ref` target is neither a parameter nor a deployed resource.
    #[error("Parameter or resource '{logical_id}' could not be found for evaluation")]
    UnresolvableReference {
        /// The referenced logical ID.
        logical_id: String,
    },

    /// A `Fn::GetAtt` target could not be resolved.
    #[error("Attribute '{attribute}' of resource '{logical_id}' could not be found for evaluation")]
    AttributeNotFound {
        /// The referenced logical ID.
        logical_id: String,
        /// The requested attribute.
        attribute: String,
    },

    /// The resource type has no entry in the attribute formatting table.
    #[error("Attributes of the '{resource_type}' resource are not supported yet")]
    UnsupportedResourceType {
        /// The resource type string.
        resource_type: String,
    },

    /// The resource type is known but the attribute has no formatter.
    #[error("The '{attribute}' attribute of the '{resource_type}' resource is not supported yet")]
    UnsupportedAttribute {
        /// The resource type string.
        resource_type: String,
        /// The requested attribute.
        attribute: String,
    },

    /// No export with this name exists.
    #[error("Export '{name}' could not be found for evaluation")]
    ExportNotFound {
        /// Name of the export.
        name: String,
    },

    /// The export exists but carries no value.
    #[error("Export '{name}' exists without a value")]
    ExportHasNoValue {
        /// Name of the export.
        name: String,
    },

    /// An evaluated argument has the wrong JSON type.
    #[error("{name} expected {expected}, got {found}")]
    TypeMismatch {
        /// Name of the intrinsic or property.
        name: String,
        /// Expected type description.
        expected: String,
        /// Found value, rendered.
        found: String,
    },

    /// `Fn::Select` index past the end of the list.
    #[error("Fn::Select index {index} is out of range for a list of {len} elements")]
    SelectOutOfRange {
        /// Requested index.
        index: usize,
        /// Length of the evaluated list.
        len: usize,
    },

    /// Inline code cannot be packaged for this runtime.
    #[error("Runtime {runtime} is unsupported, only node.js and python runtimes are currently supported")]
    UnsupportedRuntime {
        /// The declared runtime.
        runtime: String,
    },

    /// A property required to build a patch is absent.
    #[error("Resource '{logical_id}' is missing required property '{property}'")]
    MissingProperty {
        /// Logical ID of the resource.
        logical_id: String,
        /// Name of the missing property.
        property: String,
    },
}

/// Errors from the environment query interface and apply-side service calls.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A service call failed.
    #[error("{service} {operation} failed: {message}")]
    CallFailed {
        /// Service name.
        service: String,
        /// Operation name.
        operation: String,
        /// Description of the failure.
        message: String,
    },

    /// The platform reported that an update did not succeed.
    #[error("Update of {resource} failed: {reason}")]
    UpdateFailed {
        /// Physical name of the resource.
        resource: String,
        /// Reason reported by the platform.
        reason: String,
    },

    /// Another update of the same resource was in flight.
    #[error("Concurrent modification of {resource}")]
    ConcurrentModification {
        /// Name of the contended resource.
        resource: String,
    },

    /// A response was missing a field needed to continue.
    #[error("Invalid response from {service}: {message}")]
    InvalidResponse {
        /// Service name.
        service: String,
        /// Description of the problem.
        message: String,
    },
}

/// Result type alias for hotswap operations.
pub type Result<T> = std::result::Result<T, HotswapError>;

impl HotswapError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error means a reference or attribute lookup could
    /// not be resolved against the current template and environment.
    #[must_use]
    pub const fn is_unresolvable(&self) -> bool {
        matches!(
            self,
            Self::Evaluation(
                EvaluationError::UnresolvableReference { .. }
                    | EvaluationError::AttributeNotFound { .. }
            )
        )
    }
}

impl EvaluationError {
    /// Creates a malformed-intrinsic error.
    #[must_use]
    pub fn malformed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedIntrinsic {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a type-mismatch error, rendering the offending value.
    #[must_use]
    pub fn type_mismatch(
        name: impl Into<String>,
        expected: impl Into<String>,
        found: &serde_json::Value,
    ) -> Self {
        Self::TypeMismatch {
            name: name.into(),
            expected: expected.into(),
            found: found.to_string(),
        }
    }
}

impl ServiceError {
    /// Creates a call-failed error.
    #[must_use]
    pub fn call_failed(
        service: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::CallFailed {
            service: service.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolvable_class() {
        let unresolved: HotswapError = EvaluationError::UnresolvableReference {
            logical_id: String::from("Bucket"),
        }
        .into();
        assert!(unresolved.is_unresolvable());

        let missing_attr: HotswapError = EvaluationError::AttributeNotFound {
            logical_id: String::from("Bucket"),
            attribute: String::from("Arn"),
        }
        .into();
        assert!(missing_attr.is_unresolvable());
    }

    #[test]
    fn test_table_gaps_are_not_unresolvable() {
        let err: HotswapError = EvaluationError::UnsupportedAttribute {
            resource_type: String::from("AWS::SQS::Queue"),
            attribute: String::from("Arn"),
        }
        .into();
        assert!(!err.is_unresolvable());

        let err: HotswapError = ServiceError::call_failed("lambda", "UpdateFunctionCode", "boom").into();
        assert!(!err.is_unresolvable());
    }

    #[test]
    fn test_error_messages() {
        let err = EvaluationError::ExportNotFound {
            name: String::from("SharedVpcId"),
        };
        assert_eq!(err.to_string(), "Export 'SharedVpcId' could not be found for evaluation");
    }
}
