use crate::error::{Result, SchedulerError};
use crate::filter::taint_tolerated;
use crate::metadata::PriorityMetadata;
use crate::types::{HostPriority, HostPriorityList, MAX_PRIORITY};
use k8s_openapi::api::core::v1::{Node, Pod};
use lodestar_core::labels::node_selector_term_matches;
use lodestar_core::{NodeInfo, NodeInfoMap, Resource};
use std::sync::Arc;
use tracing::debug;

pub const LEAST_REQUESTED_PRIORITY: &str = "LeastRequestedPriority";
pub const MOST_REQUESTED_PRIORITY: &str = "MostRequestedPriority";
pub const BALANCED_RESOURCE_ALLOCATION: &str = "BalancedResourceAllocation";
pub const NODE_AFFINITY_PRIORITY: &str = "NodeAffinityPriority";
pub const TAINT_TOLERATION_PRIORITY: &str = "TaintTolerationPriority";
pub const EQUAL_PRIORITY: &str = "EqualPriority";

/// Soft preference evaluated over the whole filtered node set at once
pub trait PriorityFunction: Send + Sync {
    /// Score every node in `nodes` (0-10, higher is better), one entry per node
    fn prioritize(
        &self,
        pod: &Pod,
        meta: &PriorityMetadata,
        node_infos: &NodeInfoMap,
        nodes: &[Node],
    ) -> Result<HostPriorityList>;

    /// Name of the priority function
    fn name(&self) -> &str;
}

/// A priority function together with the weight its scores are multiplied by
#[derive(Clone)]
pub struct PriorityConfig {
    pub function: Arc<dyn PriorityFunction>,
    pub weight: i64,
}

impl PriorityConfig {
    pub fn new(function: Arc<dyn PriorityFunction>, weight: i64) -> Self {
        Self { function, weight }
    }

    pub fn name(&self) -> &str {
        self.function.name()
    }
}

impl std::fmt::Debug for PriorityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityConfig")
            .field("name", &self.name())
            .field("weight", &self.weight)
            .finish()
    }
}

fn lookup<'a>(node_infos: &'a NodeInfoMap, node: &Node) -> Result<&'a NodeInfo> {
    let name = lodestar_core::node_name(node);
    node_infos
        .get(name)
        .ok_or_else(|| SchedulerError::missing_node_info(name))
}

/// Node's requested resources if the pod were placed on it, with container
/// defaults applied so empty pods still spread
fn requested_with_pod(info: &NodeInfo, meta: &PriorityMetadata) -> Resource {
    let mut total = *info.non_zero_requested();
    total += meta.non_zero_request;
    total
}

/// `part * MAX_PRIORITY / capacity` in i128 so exabyte-sized nodes do not
/// overflow, clamped to the priority scale
fn scaled(part: i128, capacity: i64) -> i64 {
    let score = part * i128::from(MAX_PRIORITY) / i128::from(capacity);
    score.clamp(0, i128::from(MAX_PRIORITY)) as i64
}

fn unused_score(requested: i64, capacity: i64) -> i64 {
    if capacity <= 0 || requested > capacity {
        return 0;
    }
    scaled(i128::from(capacity) - i128::from(requested), capacity)
}

fn used_score(requested: i64, capacity: i64) -> i64 {
    if capacity <= 0 || requested > capacity {
        return 0;
    }
    scaled(i128::from(requested), capacity)
}

/// Favor nodes with the most unrequested CPU and memory
pub struct LeastRequestedPriority;

impl PriorityFunction for LeastRequestedPriority {
    fn prioritize(
        &self,
        _pod: &Pod,
        meta: &PriorityMetadata,
        node_infos: &NodeInfoMap,
        nodes: &[Node],
    ) -> Result<HostPriorityList> {
        nodes
            .iter()
            .map(|node| {
                let info = lookup(node_infos, node)?;
                let allocatable = info.allocatable_resource();
                let requested = requested_with_pod(info, meta);

                let cpu = unused_score(requested.milli_cpu, allocatable.milli_cpu);
                let memory = unused_score(requested.memory, allocatable.memory);
                let score = (cpu + memory) / 2;

                debug!(
                    "Node {} least-requested score: {} (CPU: {}, Memory: {})",
                    info.node_name(),
                    score,
                    cpu,
                    memory
                );
                Ok(HostPriority::new(info.node_name(), score))
            })
            .collect()
    }

    fn name(&self) -> &str {
        LEAST_REQUESTED_PRIORITY
    }
}

/// Favor nodes that are already the most requested, packing pods tightly
pub struct MostRequestedPriority;

impl PriorityFunction for MostRequestedPriority {
    fn prioritize(
        &self,
        _pod: &Pod,
        meta: &PriorityMetadata,
        node_infos: &NodeInfoMap,
        nodes: &[Node],
    ) -> Result<HostPriorityList> {
        nodes
            .iter()
            .map(|node| {
                let info = lookup(node_infos, node)?;
                let allocatable = info.allocatable_resource();
                let requested = requested_with_pod(info, meta);

                let cpu = used_score(requested.milli_cpu, allocatable.milli_cpu);
                let memory = used_score(requested.memory, allocatable.memory);
                Ok(HostPriority::new(info.node_name(), (cpu + memory) / 2))
            })
            .collect()
    }

    fn name(&self) -> &str {
        MOST_REQUESTED_PRIORITY
    }
}

/// Favor nodes whose CPU and memory utilisation stay close to each other
pub struct BalancedResourceAllocation;

impl PriorityFunction for BalancedResourceAllocation {
    fn prioritize(
        &self,
        _pod: &Pod,
        meta: &PriorityMetadata,
        node_infos: &NodeInfoMap,
        nodes: &[Node],
    ) -> Result<HostPriorityList> {
        nodes
            .iter()
            .map(|node| {
                let info = lookup(node_infos, node)?;
                let allocatable = info.allocatable_resource();
                let requested = requested_with_pod(info, meta);

                let cpu_fraction = fraction(requested.milli_cpu, allocatable.milli_cpu);
                let memory_fraction = fraction(requested.memory, allocatable.memory);

                // Over-committed on either resource
                let score = if cpu_fraction >= 1.0 || memory_fraction >= 1.0 {
                    0
                } else {
                    let diff = (cpu_fraction - memory_fraction).abs();
                    (MAX_PRIORITY as f64 - diff * MAX_PRIORITY as f64) as i64
                };

                debug!(
                    "Node {} balanced allocation score: {} (CPU: {:.3}, Memory: {:.3})",
                    info.node_name(),
                    score,
                    cpu_fraction,
                    memory_fraction
                );
                Ok(HostPriority::new(info.node_name(), score))
            })
            .collect()
    }

    fn name(&self) -> &str {
        BALANCED_RESOURCE_ALLOCATION
    }
}

fn fraction(requested: i64, capacity: i64) -> f64 {
    if capacity == 0 {
        return 1.0;
    }
    requested as f64 / capacity as f64
}

/// Scale raw counts to 0..=MAX_PRIORITY relative to the largest count.
/// `invert` gives the highest score to the smallest count.
fn normalize(counts: Vec<(String, i64)>, invert: bool) -> HostPriorityList {
    let max = counts.iter().map(|(_, c)| *c).max().unwrap_or(0);

    counts
        .into_iter()
        .map(|(host, count)| {
            let score = match (max > 0, invert) {
                (false, false) => 0,
                (false, true) => MAX_PRIORITY,
                (true, false) => MAX_PRIORITY * count / max,
                (true, true) => MAX_PRIORITY - MAX_PRIORITY * count / max,
            };
            HostPriority::new(host, score)
        })
        .collect()
}

/// Sum of the weights of the pod's preferred node affinity terms a node
/// matches, normalised so the best node scores 10
pub struct NodeAffinityPriority;

impl PriorityFunction for NodeAffinityPriority {
    fn prioritize(
        &self,
        _pod: &Pod,
        meta: &PriorityMetadata,
        _node_infos: &NodeInfoMap,
        nodes: &[Node],
    ) -> Result<HostPriorityList> {
        let preferred = meta
            .affinity
            .as_ref()
            .and_then(|a| a.node_affinity.as_ref())
            .and_then(|a| a.preferred_during_scheduling_ignored_during_execution.as_deref())
            .unwrap_or_default();

        let counts = nodes
            .iter()
            .map(|node| {
                let labels = node.metadata.labels.as_ref();
                let count: i64 = preferred
                    .iter()
                    .filter(|term| term.weight != 0)
                    .filter(|term| node_selector_term_matches(&term.preference, labels))
                    .map(|term| i64::from(term.weight))
                    .sum();
                (lodestar_core::node_name(node).to_string(), count)
            })
            .collect();

        Ok(normalize(counts, false))
    }

    fn name(&self) -> &str {
        NODE_AFFINITY_PRIORITY
    }
}

/// Favor nodes with fewer `PreferNoSchedule` taints the pod does not tolerate
pub struct TaintTolerationPriority;

impl PriorityFunction for TaintTolerationPriority {
    fn prioritize(
        &self,
        _pod: &Pod,
        meta: &PriorityMetadata,
        _node_infos: &NodeInfoMap,
        nodes: &[Node],
    ) -> Result<HostPriorityList> {
        let counts = nodes
            .iter()
            .map(|node| {
                let intolerable = node
                    .spec
                    .as_ref()
                    .and_then(|s| s.taints.as_deref())
                    .unwrap_or_default()
                    .iter()
                    .filter(|t| t.effect == "PreferNoSchedule")
                    .filter(|t| !taint_tolerated(t, &meta.prefer_no_schedule_tolerations))
                    .count() as i64;
                (lodestar_core::node_name(node).to_string(), intolerable)
            })
            .collect();

        Ok(normalize(counts, true))
    }

    fn name(&self) -> &str {
        TAINT_TOLERATION_PRIORITY
    }
}

/// Gives every node the same score of 1
pub struct EqualPriority;

impl PriorityFunction for EqualPriority {
    fn prioritize(
        &self,
        _pod: &Pod,
        _meta: &PriorityMetadata,
        _node_infos: &NodeInfoMap,
        nodes: &[Node],
    ) -> Result<HostPriorityList> {
        Ok(nodes
            .iter()
            .map(|node| HostPriority::new(lodestar_core::node_name(node), 1))
            .collect())
    }

    fn name(&self) -> &str {
        EQUAL_PRIORITY
    }
}
