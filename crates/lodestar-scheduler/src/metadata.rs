//! Pod-level data derived once per scheduling attempt and shared by every
//! predicate and priority evaluation in that attempt.

use k8s_openapi::api::core::v1::{Affinity, Pod, PodAffinityTerm, Toleration};
use lodestar_core::labels::label_selector_matches;
use lodestar_core::node_info::pod_host_ports;
use lodestar_core::resources::is_best_effort;
use lodestar_core::{pod_namespace, pod_non_zero_requests, pod_requests};
use lodestar_core::{HostPort, NodeInfoMap, Resource};
use std::collections::HashSet;

/// Topology domains in which pods matching one affinity term were found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermTopology {
    pub topology_key: String,
    /// Values of `topology_key` on nodes hosting a matching pod
    pub values: HashSet<String>,
    /// Whether the pod being scheduled matches its own term
    pub matches_self: bool,
}

impl TermTopology {
    /// Whether a node with the given labels lies in one of the matched domains
    pub fn contains(&self, labels: Option<&std::collections::BTreeMap<String, String>>) -> bool {
        labels
            .and_then(|l| l.get(&self.topology_key))
            .is_some_and(|v| self.values.contains(v))
    }
}

/// Shared predicate inputs
#[derive(Debug, Clone, Default)]
pub struct PredicateMetadata {
    pub pod_request: Resource,
    pub pod_ports: Vec<HostPort>,
    pub best_effort: bool,
    /// One entry per required pod affinity term
    pub affinity_terms: Vec<TermTopology>,
    /// One entry per required pod anti-affinity term
    pub anti_affinity_terms: Vec<TermTopology>,
    /// (topology key, value) domains the pod is barred from by existing pods' anti-affinity
    pub existing_anti_affinity: Vec<(String, String)>,
}

fn required_affinity_terms(pod: &Pod) -> &[PodAffinityTerm] {
    pod.spec
        .as_ref()
        .and_then(|s| s.affinity.as_ref())
        .and_then(|a| a.pod_affinity.as_ref())
        .and_then(|a| a.required_during_scheduling_ignored_during_execution.as_deref())
        .unwrap_or_default()
}

fn required_anti_affinity_terms(pod: &Pod) -> &[PodAffinityTerm] {
    pod.spec
        .as_ref()
        .and_then(|s| s.affinity.as_ref())
        .and_then(|a| a.pod_anti_affinity.as_ref())
        .and_then(|a| a.required_during_scheduling_ignored_during_execution.as_deref())
        .unwrap_or_default()
}

/// Whether `candidate` is selected by a term owned by a pod in `owner_namespace`.
/// A term without a label selector selects nothing.
pub fn pod_matches_term(candidate: &Pod, term: &PodAffinityTerm, owner_namespace: &str) -> bool {
    let namespace = pod_namespace(candidate);
    let in_namespace = match term.namespaces.as_deref() {
        None | Some([]) => namespace == owner_namespace,
        Some(namespaces) => namespaces.iter().any(|n| n == namespace),
    };

    in_namespace
        && term
            .label_selector
            .as_ref()
            .is_some_and(|s| label_selector_matches(s, candidate.metadata.labels.as_ref()))
}

impl PredicateMetadata {
    pub fn new(pod: &Pod, node_infos: &NodeInfoMap) -> Self {
        let namespace = pod_namespace(pod);
        let term_topology = |term: &PodAffinityTerm| TermTopology {
            topology_key: term.topology_key.clone(),
            values: HashSet::new(),
            matches_self: pod_matches_term(pod, term, namespace),
        };

        let affinity = required_affinity_terms(pod);
        let anti_affinity = required_anti_affinity_terms(pod);
        let mut affinity_terms: Vec<TermTopology> = affinity.iter().map(term_topology).collect();
        let mut anti_affinity_terms: Vec<TermTopology> =
            anti_affinity.iter().map(term_topology).collect();
        let mut existing_anti_affinity = Vec::new();

        for info in node_infos.values() {
            let node_labels = info.node().metadata.labels.as_ref();
            let domain = |key: &str| node_labels.and_then(|l| l.get(key)).cloned();

            for existing in info.pods() {
                for (term, topology) in affinity.iter().zip(affinity_terms.iter_mut()) {
                    if pod_matches_term(existing, term, namespace) {
                        if let Some(value) = domain(&term.topology_key) {
                            topology.values.insert(value);
                        }
                    }
                }
                for (term, topology) in anti_affinity.iter().zip(anti_affinity_terms.iter_mut()) {
                    if pod_matches_term(existing, term, namespace) {
                        if let Some(value) = domain(&term.topology_key) {
                            topology.values.insert(value);
                        }
                    }
                }
                for term in required_anti_affinity_terms(existing) {
                    if pod_matches_term(pod, term, pod_namespace(existing)) {
                        if let Some(value) = domain(&term.topology_key) {
                            existing_anti_affinity.push((term.topology_key.clone(), value));
                        }
                    }
                }
            }
        }

        Self {
            pod_request: pod_requests(pod),
            pod_ports: pod_host_ports(pod),
            best_effort: is_best_effort(pod),
            affinity_terms,
            anti_affinity_terms,
            existing_anti_affinity,
        }
    }
}

/// Shared priority inputs
#[derive(Debug, Clone, Default)]
pub struct PriorityMetadata {
    pub non_zero_request: Resource,
    /// Tolerations that apply to `PreferNoSchedule` taints
    pub prefer_no_schedule_tolerations: Vec<Toleration>,
    pub affinity: Option<Affinity>,
}

impl PriorityMetadata {
    pub fn new(pod: &Pod) -> Self {
        let spec = pod.spec.as_ref();
        let prefer_no_schedule_tolerations = spec
            .and_then(|s| s.tolerations.as_ref())
            .map(|tolerations| {
                tolerations
                    .iter()
                    .filter(|t| matches!(t.effect.as_deref(), None | Some("") | Some("PreferNoSchedule")))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Self {
            non_zero_request: pod_non_zero_requests(pod),
            prefer_no_schedule_tolerations,
            affinity: spec.and_then(|s| s.affinity.clone()),
        }
    }
}
