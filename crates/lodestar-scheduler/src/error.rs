// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Scheduler error type. Every variant aborts the scheduling attempt; an
/// unschedulable pod is not an error (see `ScheduleOutcome`).
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// The node list handed to the algorithm was empty
    #[error("No nodes available to schedule pods")]
    #[diagnostic(
        code(scheduler::no_nodes_available),
        help("Register at least one node before scheduling")
    )]
    NoNodesAvailable,

    /// The snapshot has no entry for a candidate node
    #[error("No node info snapshot for node {node_name}")]
    #[diagnostic(
        code(scheduler::missing_node_info),
        help("Rebuild the node info map from the same node list passed to the scheduler")
    )]
    MissingNodeInfo { node_name: String },

    /// A predicate failed to evaluate (distinct from "does not fit")
    #[error("Predicate {predicate} failed on node {node_name}: {message}")]
    #[diagnostic(
        code(scheduler::predicate_error),
        help("The attempt is retried on the next scheduling cycle")
    )]
    PredicateError {
        predicate: String,
        node_name: String,
        message: String,
    },

    /// A priority function failed to evaluate
    #[error("Priority function {priority} failed: {message}")]
    #[diagnostic(
        code(scheduler::priority_error),
        help("The attempt is retried on the next scheduling cycle")
    )]
    PriorityError { priority: String, message: String },

    /// An extender call failed (transport, status, decode, timeout or reported error)
    #[error("Extender {extender} failed: {message}")]
    #[diagnostic(
        code(scheduler::extender_error),
        help("Check that the extender at {extender} is reachable and speaks the extender protocol")
    )]
    ExtenderError { extender: String, message: String },

    /// The attempt was cancelled by the caller
    #[error("Scheduling attempt cancelled")]
    #[diagnostic(code(scheduler::cancelled))]
    Cancelled,

    /// Policy failed validation
    #[error("Invalid policy: {reason}")]
    #[diagnostic(code(scheduler::invalid_policy), help("{suggestion}"))]
    InvalidPolicy { reason: String, suggestion: String },

    /// Policy references a predicate that is not registered
    #[error("Unknown predicate: {name}")]
    #[diagnostic(
        code(scheduler::unknown_predicate),
        help("Registered predicates are listed by AlgorithmRegistry::predicate_names")
    )]
    UnknownPredicate { name: String },

    /// Policy references a priority function that is not registered
    #[error("Unknown priority function: {name}")]
    #[diagnostic(
        code(scheduler::unknown_priority),
        help("Registered priorities are listed by AlgorithmRegistry::priority_names")
    )]
    UnknownPriority { name: String },

    /// The binder sink rejected the binding
    #[error("Failed to bind pod {pod} to node {node_name}: {message}")]
    #[diagnostic(
        code(scheduler::binding_failed),
        help("The pod stays pending and is retried on the next cycle")
    )]
    BindingFailed {
        pod: String,
        node_name: String,
        message: String,
    },

    /// Listing nodes or pods failed
    #[error("Cluster source error: {message}")]
    #[diagnostic(
        code(scheduler::source_error),
        help("Check connectivity to the API server")
    )]
    SourceError { message: String },

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(
        code(scheduler::core_error),
        help("A node or pod in the snapshot carries a malformed field")
    )]
    CoreError(#[from] lodestar_core::CoreError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(scheduler::internal_error),
        help("This is likely a bug. Please report it")
    )]
    InternalError { message: String },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Create a MissingNodeInfo error
    pub fn missing_node_info(node_name: impl Into<String>) -> Self {
        Self::MissingNodeInfo {
            node_name: node_name.into(),
        }
    }

    /// Create a PredicateError
    pub fn predicate_error(
        predicate: impl Into<String>,
        node_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::PredicateError {
            predicate: predicate.into(),
            node_name: node_name.into(),
            message: message.into(),
        }
    }

    /// Create a PriorityError
    pub fn priority_error(priority: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PriorityError {
            priority: priority.into(),
            message: message.into(),
        }
    }

    /// Create an ExtenderError
    pub fn extender_error(extender: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExtenderError {
            extender: extender.into(),
            message: message.into(),
        }
    }

    /// Create an InvalidPolicy error
    pub fn invalid_policy(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a BindingFailed error
    pub fn binding_failed(
        pod: impl Into<String>,
        node_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::BindingFailed {
            pod: pod.into(),
            node_name: node_name.into(),
            message: message.into(),
        }
    }

    /// Create a SourceError
    pub fn source_error(message: impl Into<String>) -> Self {
        Self::SourceError {
            message: message.into(),
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
