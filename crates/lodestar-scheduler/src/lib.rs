//! Lodestar Scheduler - Pod to Node scheduling
//!
//! This crate provides:
//! - Fit predicates and priority functions, registered by name
//! - HTTP scheduler extenders (full-object and node-name wire modes)
//! - The generic filter / score / select algorithm
//! - A polling scheduling loop over pluggable cluster sources and binders

pub mod api_client;
pub mod error;
pub mod extender;
pub mod filter;
pub mod generic_scheduler;
pub mod metadata;
pub mod policy;
pub mod registry;
pub mod scheduler;
pub mod score;
pub mod source;
pub mod types;

// Re-export commonly used types
pub use api_client::ApiClient;
pub use error::{Result, SchedulerError};
pub use extender::{ExtenderArgs, ExtenderFilterResult, HttpExtender, NodeList, SchedulerExtender};
pub use filter::FitPredicate;
pub use generic_scheduler::{GenericScheduler, TieBreak};
pub use metadata::{PredicateMetadata, PriorityMetadata};
pub use policy::{ExtenderConfig, Policy, PredicatePolicy, PriorityPolicy};
pub use registry::AlgorithmRegistry;
pub use scheduler::{PodResult, Scheduler, SchedulerConfig};
pub use score::{PriorityConfig, PriorityFunction};
pub use source::{ClusterSource, InMemoryCluster, PodBinder};
pub use types::{
    FailedNodesMap, FitError, FitResult, HostPriority, HostPriorityList,
    PredicateFailureReason, ScheduleOutcome, MAX_PRIORITY,
};
