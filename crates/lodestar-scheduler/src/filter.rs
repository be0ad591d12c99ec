use crate::error::Result;
use crate::metadata::PredicateMetadata;
use crate::types::{FitResult, PredicateFailureReason};
use k8s_openapi::api::core::v1::{Node, Pod, Taint, Toleration};
use lodestar_core::labels::{labels_match_map, node_selector_terms_match};
use lodestar_core::resources::{RESOURCE_CPU, RESOURCE_MEMORY, RESOURCE_PODS};
use lodestar_core::NodeInfo;
use tracing::debug;

pub const CHECK_NODE_CONDITION: &str = "CheckNodeCondition";
pub const CHECK_NODE_MEMORY_PRESSURE: &str = "CheckNodeMemoryPressure";
pub const CHECK_NODE_DISK_PRESSURE: &str = "CheckNodeDiskPressure";
pub const HOST_NAME: &str = "HostName";
pub const POD_FITS_HOST_PORTS: &str = "PodFitsHostPorts";
pub const MATCH_NODE_SELECTOR: &str = "MatchNodeSelector";
pub const POD_FITS_RESOURCES: &str = "PodFitsResources";
pub const POD_TOLERATES_NODE_TAINTS: &str = "PodToleratesNodeTaints";
pub const MATCH_INTER_POD_AFFINITY: &str = "MatchInterPodAffinity";

/// Hard filtering rule evaluated once per (pod, node) pair.
///
/// `Ok` with `fits == false` removes the node; `Err` aborts the whole attempt.
pub trait FitPredicate: Send + Sync {
    /// Check whether the pod fits on the node described by `node_info`
    fn predicate(
        &self,
        pod: &Pod,
        meta: &PredicateMetadata,
        node_info: &NodeInfo,
    ) -> Result<FitResult>;

    /// Name of the predicate
    fn name(&self) -> &str;
}

fn condition_is_true(node: &Node, condition: &str) -> Option<bool> {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|c| c.iter().find(|c| c.type_ == condition))
        .map(|c| c.status == "True")
}

/// Whether `toleration` tolerates `taint`. An empty toleration key with
/// operator `Exists` tolerates every taint; an empty effect matches all effects.
pub fn toleration_tolerates_taint(toleration: &Toleration, taint: &Taint) -> bool {
    if let Some(effect) = toleration.effect.as_deref().filter(|e| !e.is_empty()) {
        if effect != taint.effect {
            return false;
        }
    }

    let operator = toleration.operator.as_deref().unwrap_or("Equal");
    match toleration.key.as_deref().filter(|k| !k.is_empty()) {
        None => return operator == "Exists",
        Some(key) if key != taint.key => return false,
        Some(_) => {}
    }

    match operator {
        "Exists" => true,
        "Equal" | "" => {
            toleration.value.as_deref().unwrap_or_default()
                == taint.value.as_deref().unwrap_or_default()
        }
        _ => false,
    }
}

pub fn taint_tolerated(taint: &Taint, tolerations: &[Toleration]) -> bool {
    tolerations
        .iter()
        .any(|t| toleration_tolerates_taint(t, taint))
}

/// Filter out nodes that are not ready or are cordoned
pub struct CheckNodeCondition;

impl FitPredicate for CheckNodeCondition {
    fn predicate(&self, _pod: &Pod, _meta: &PredicateMetadata, node_info: &NodeInfo) -> Result<FitResult> {
        let node = node_info.node();
        let mut reasons = Vec::new();

        if condition_is_true(node, "Ready") == Some(false) {
            reasons.push(PredicateFailureReason::NodeNotReady);
        }
        if node.spec.as_ref().and_then(|s| s.unschedulable) == Some(true) {
            reasons.push(PredicateFailureReason::NodeUnschedulable);
        }

        Ok(FitResult::from_reasons(reasons))
    }

    fn name(&self) -> &str {
        CHECK_NODE_CONDITION
    }
}

/// Keep best-effort pods off nodes reporting memory pressure
pub struct CheckNodeMemoryPressure;

impl FitPredicate for CheckNodeMemoryPressure {
    fn predicate(&self, _pod: &Pod, meta: &PredicateMetadata, node_info: &NodeInfo) -> Result<FitResult> {
        if meta.best_effort && condition_is_true(node_info.node(), "MemoryPressure") == Some(true) {
            return Ok(FitResult::unfit(PredicateFailureReason::NodeUnderMemoryPressure));
        }
        Ok(FitResult::fit())
    }

    fn name(&self) -> &str {
        CHECK_NODE_MEMORY_PRESSURE
    }
}

/// Keep every pod off nodes reporting disk pressure
pub struct CheckNodeDiskPressure;

impl FitPredicate for CheckNodeDiskPressure {
    fn predicate(&self, _pod: &Pod, _meta: &PredicateMetadata, node_info: &NodeInfo) -> Result<FitResult> {
        if condition_is_true(node_info.node(), "DiskPressure") == Some(true) {
            return Ok(FitResult::unfit(PredicateFailureReason::NodeUnderDiskPressure));
        }
        Ok(FitResult::fit())
    }

    fn name(&self) -> &str {
        CHECK_NODE_DISK_PRESSURE
    }
}

/// A pod that already names a node only fits that node
pub struct HostName;

impl FitPredicate for HostName {
    fn predicate(&self, pod: &Pod, _meta: &PredicateMetadata, node_info: &NodeInfo) -> Result<FitResult> {
        let wanted = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.as_deref())
            .filter(|n| !n.is_empty());

        match wanted {
            Some(name) if name != node_info.node_name() => {
                Ok(FitResult::unfit(PredicateFailureReason::HostNameMismatch))
            }
            _ => Ok(FitResult::fit()),
        }
    }

    fn name(&self) -> &str {
        HOST_NAME
    }
}

/// Host ports the pod wants must not already be taken on the node
pub struct PodFitsHostPorts;

impl FitPredicate for PodFitsHostPorts {
    fn predicate(&self, _pod: &Pod, meta: &PredicateMetadata, node_info: &NodeInfo) -> Result<FitResult> {
        let conflict = meta.pod_ports.iter().any(|wanted| {
            node_info
                .used_ports()
                .iter()
                .any(|used| used.conflicts_with(wanted))
        });

        if conflict {
            return Ok(FitResult::unfit(PredicateFailureReason::HostPortConflict));
        }
        Ok(FitResult::fit())
    }

    fn name(&self) -> &str {
        POD_FITS_HOST_PORTS
    }
}

/// Node selector labels and required node affinity
pub struct MatchNodeSelector;

impl FitPredicate for MatchNodeSelector {
    fn predicate(&self, pod: &Pod, _meta: &PredicateMetadata, node_info: &NodeInfo) -> Result<FitResult> {
        let Some(spec) = &pod.spec else {
            return Ok(FitResult::fit());
        };
        let node_labels = node_info.node().metadata.labels.as_ref();

        if let Some(selector) = &spec.node_selector {
            if !labels_match_map(selector, node_labels) {
                debug!(
                    "Node {} does not match node selector {:?}",
                    node_info.node_name(),
                    selector
                );
                return Ok(FitResult::unfit(PredicateFailureReason::NodeSelectorMismatch));
            }
        }

        let required = spec
            .affinity
            .as_ref()
            .and_then(|a| a.node_affinity.as_ref())
            .and_then(|a| a.required_during_scheduling_ignored_during_execution.as_ref());

        if let Some(required) = required {
            if !node_selector_terms_match(&required.node_selector_terms, node_labels) {
                return Ok(FitResult::unfit(PredicateFailureReason::NodeSelectorMismatch));
            }
        }

        Ok(FitResult::fit())
    }

    fn name(&self) -> &str {
        MATCH_NODE_SELECTOR
    }
}

/// Filter for pod resource requirements against what is left on the node
pub struct PodFitsResources;

impl FitPredicate for PodFitsResources {
    fn predicate(&self, _pod: &Pod, meta: &PredicateMetadata, node_info: &NodeInfo) -> Result<FitResult> {
        let allocatable = node_info.allocatable_resource();
        let requested = node_info.requested_resource();
        let mut reasons = Vec::new();

        let pod_count = node_info.pods().len() as i64;
        if pod_count + 1 > allocatable.allowed_pod_number {
            reasons.push(PredicateFailureReason::InsufficientResource {
                resource: RESOURCE_PODS.to_string(),
                requested: 1,
                used: pod_count,
                capacity: allocatable.allowed_pod_number,
            });
        }

        let wanted = &meta.pod_request;
        if wanted.is_zero() {
            return Ok(FitResult::from_reasons(reasons));
        }

        debug!(
            "Node {} has CPU: {}/{} milli, Memory: {}/{} bytes; pod requests {} milli, {} bytes",
            node_info.node_name(),
            requested.milli_cpu,
            allocatable.milli_cpu,
            requested.memory,
            allocatable.memory,
            wanted.milli_cpu,
            wanted.memory
        );

        if allocatable.milli_cpu < wanted.milli_cpu.saturating_add(requested.milli_cpu) {
            reasons.push(PredicateFailureReason::InsufficientResource {
                resource: RESOURCE_CPU.to_string(),
                requested: wanted.milli_cpu,
                used: requested.milli_cpu,
                capacity: allocatable.milli_cpu,
            });
        }
        if allocatable.memory < wanted.memory.saturating_add(requested.memory) {
            reasons.push(PredicateFailureReason::InsufficientResource {
                resource: RESOURCE_MEMORY.to_string(),
                requested: wanted.memory,
                used: requested.memory,
                capacity: allocatable.memory,
            });
        }

        Ok(FitResult::from_reasons(reasons))
    }

    fn name(&self) -> &str {
        POD_FITS_RESOURCES
    }
}

/// Every NoSchedule / NoExecute taint must be tolerated
pub struct PodToleratesNodeTaints;

impl FitPredicate for PodToleratesNodeTaints {
    fn predicate(&self, pod: &Pod, _meta: &PredicateMetadata, node_info: &NodeInfo) -> Result<FitResult> {
        let taints = node_info
            .node()
            .spec
            .as_ref()
            .and_then(|s| s.taints.as_deref())
            .unwrap_or_default();
        let tolerations = pod
            .spec
            .as_ref()
            .and_then(|s| s.tolerations.as_deref())
            .unwrap_or_default();

        let untolerated = taints
            .iter()
            .filter(|t| t.effect == "NoSchedule" || t.effect == "NoExecute")
            .find(|t| !taint_tolerated(t, tolerations));

        if let Some(taint) = untolerated {
            debug!(
                "Pod does not tolerate taint {}={} on node {}",
                taint.key,
                taint.effect,
                node_info.node_name()
            );
            return Ok(FitResult::unfit(PredicateFailureReason::TaintsNotTolerated));
        }

        Ok(FitResult::fit())
    }

    fn name(&self) -> &str {
        POD_TOLERATES_NODE_TAINTS
    }
}

/// Required inter-pod affinity and anti-affinity, both the pod's own terms and
/// the anti-affinity of pods already running
pub struct MatchInterPodAffinity;

impl FitPredicate for MatchInterPodAffinity {
    fn predicate(&self, _pod: &Pod, meta: &PredicateMetadata, node_info: &NodeInfo) -> Result<FitResult> {
        let labels = node_info.node().metadata.labels.as_ref();

        let barred = meta.existing_anti_affinity.iter().any(|(key, value)| {
            labels.and_then(|l| l.get(key)) == Some(value)
        });
        if barred {
            return Ok(FitResult::unfit(
                PredicateFailureReason::ExistingPodsAntiAffinityRulesNotMatch,
            ));
        }

        for term in &meta.affinity_terms {
            // The first pod of a group may land anywhere if it matches its own term
            let first_of_group = term.values.is_empty() && term.matches_self;
            if !term.contains(labels) && !first_of_group {
                return Ok(FitResult::unfit(PredicateFailureReason::AffinityRulesNotMatch));
            }
        }

        if meta.anti_affinity_terms.iter().any(|term| term.contains(labels)) {
            return Ok(FitResult::unfit(
                PredicateFailureReason::AntiAffinityRulesNotMatch,
            ));
        }

        Ok(FitResult::fit())
    }

    fn name(&self) -> &str {
        MATCH_INTER_POD_AFFINITY
    }
}
