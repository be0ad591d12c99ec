use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Highest score a priority function may give a node
pub const MAX_PRIORITY: i64 = 10;

/// Node name -> reason the node was excluded
pub type FailedNodesMap = BTreeMap<String, String>;

/// Score of one node from one contributor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPriority {
    /// Node name
    #[serde(alias = "Host")]
    pub host: String,
    /// Score (0-10 for internal priority functions)
    #[serde(alias = "Score")]
    pub score: i64,
}

impl HostPriority {
    pub fn new(host: impl Into<String>, score: i64) -> Self {
        Self {
            host: host.into(),
            score,
        }
    }
}

pub type HostPriorityList = Vec<HostPriority>;

/// Why a predicate rejected a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateFailureReason {
    InsufficientResource {
        resource: String,
        requested: i64,
        used: i64,
        capacity: i64,
    },
    NodeNotReady,
    NodeUnschedulable,
    NodeUnderMemoryPressure,
    NodeUnderDiskPressure,
    HostNameMismatch,
    HostPortConflict,
    NodeSelectorMismatch,
    TaintsNotTolerated,
    AffinityRulesNotMatch,
    AntiAffinityRulesNotMatch,
    ExistingPodsAntiAffinityRulesNotMatch,
    Other(String),
}

impl fmt::Display for PredicateFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientResource { resource, .. } => write!(f, "Insufficient {}", resource),
            Self::NodeNotReady => write!(f, "node(s) were not ready"),
            Self::NodeUnschedulable => write!(f, "node(s) were unschedulable"),
            Self::NodeUnderMemoryPressure => write!(f, "node(s) had memory pressure"),
            Self::NodeUnderDiskPressure => write!(f, "node(s) had disk pressure"),
            Self::HostNameMismatch => write!(f, "node(s) didn't match the requested hostname"),
            Self::HostPortConflict => write!(f, "node(s) didn't have free ports for the requested pod ports"),
            Self::NodeSelectorMismatch => write!(f, "node(s) didn't match node selector"),
            Self::TaintsNotTolerated => write!(f, "node(s) had taints that the pod didn't tolerate"),
            Self::AffinityRulesNotMatch => write!(f, "node(s) didn't match pod affinity rules"),
            Self::AntiAffinityRulesNotMatch => {
                write!(f, "node(s) didn't match pod anti-affinity rules")
            }
            Self::ExistingPodsAntiAffinityRulesNotMatch => {
                write!(f, "node(s) didn't satisfy existing pods anti-affinity rules")
            }
            Self::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// Result of running one predicate against one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FitResult {
    pub fits: bool,
    pub reasons: Vec<PredicateFailureReason>,
}

impl FitResult {
    /// Create a passing result
    pub fn fit() -> Self {
        Self {
            fits: true,
            reasons: Vec::new(),
        }
    }

    /// Create a failing result with one reason
    pub fn unfit(reason: PredicateFailureReason) -> Self {
        Self {
            fits: false,
            reasons: vec![reason],
        }
    }

    /// Failing unless `reasons` is empty
    pub fn from_reasons(reasons: Vec<PredicateFailureReason>) -> Self {
        Self {
            fits: reasons.is_empty(),
            reasons,
        }
    }
}

/// Every node was rejected; carries the reason for each
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitError {
    pub pod: String,
    pub num_all_nodes: usize,
    pub failed_nodes: FailedNodesMap,
}

impl fmt::Display for FitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for reason in self.failed_nodes.values() {
            *counts.entry(reason.as_str()).or_default() += 1;
        }
        let mut summary: Vec<(&str, usize)> = counts.into_iter().collect();
        summary.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

        write!(f, "0/{} nodes are available", self.num_all_nodes)?;
        for (i, (reason, count)) in summary.iter().enumerate() {
            let sep = if i == 0 { ": " } else { ", " };
            write!(f, "{}{} {}", sep, count, reason)?;
        }
        write!(f, ".")
    }
}

/// Non-error result of a scheduling attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The pod should be bound to `node_name`
    Scheduled { node_name: String, score: i64 },
    /// No node passed filtering
    Unschedulable(FitError),
}

impl ScheduleOutcome {
    pub fn node_name(&self) -> Option<&str> {
        match self {
            Self::Scheduled { node_name, .. } => Some(node_name),
            Self::Unschedulable(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_result() {
        let pass = FitResult::fit();
        assert!(pass.fits);
        assert!(pass.reasons.is_empty());

        let fail = FitResult::unfit(PredicateFailureReason::NodeNotReady);
        assert!(!fail.fits);
        assert_eq!(fail.reasons[0].to_string(), "node(s) were not ready");

        assert!(FitResult::from_reasons(vec![]).fits);
    }

    #[test]
    fn test_fit_error_message_counts_reasons() {
        let mut failed = FailedNodesMap::new();
        failed.insert("a".to_string(), "Insufficient cpu".to_string());
        failed.insert("b".to_string(), "Insufficient cpu".to_string());
        failed.insert("c".to_string(), "node(s) were not ready".to_string());

        let err = FitError {
            pod: "default/web".to_string(),
            num_all_nodes: 3,
            failed_nodes: failed,
        };
        assert_eq!(
            err.to_string(),
            "0/3 nodes are available: 2 Insufficient cpu, 1 node(s) were not ready."
        );
    }

    #[test]
    fn test_host_priority_accepts_both_casings() {
        let lower: HostPriority = serde_json::from_str(r#"{"host":"m1","score":3}"#).unwrap();
        let upper: HostPriority = serde_json::from_str(r#"{"Host":"m1","Score":3}"#).unwrap();
        assert_eq!(lower, upper);
        assert_eq!(
            serde_json::to_string(&lower).unwrap(),
            r#"{"host":"m1","score":3}"#
        );
    }
}
