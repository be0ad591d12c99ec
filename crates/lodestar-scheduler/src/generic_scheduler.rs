use crate::error::{Result, SchedulerError};
use crate::extender::{HttpExtender, SchedulerExtender};
use crate::filter::FitPredicate;
use crate::metadata::{PredicateMetadata, PriorityMetadata};
use crate::policy::Policy;
use crate::registry::AlgorithmRegistry;
use crate::score::PriorityConfig;
use crate::types::{FailedNodesMap, FitError, HostPriority, HostPriorityList, ScheduleOutcome};
use k8s_openapi::api::core::v1::{Node, Pod};
use lodestar_core::{node_name, pod_key, NodeInfo, NodeInfoMap};
use rand::seq::IndexedRandom;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How to choose among nodes sharing the highest score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TieBreak {
    /// Uniformly at random, so repeated attempts spread over equal nodes
    #[default]
    Random,
    /// Smallest node name; deterministic, but always favors the same node
    Lexicographic,
}

impl fmt::Display for TieBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => write!(f, "random"),
            Self::Lexicographic => write!(f, "lexicographic"),
        }
    }
}

impl FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "lexicographic" => Ok(Self::Lexicographic),
            other => Err(format!(
                "unknown tie-break '{}', expected 'random' or 'lexicographic'",
                other
            )),
        }
    }
}

/// Filter → score → select pipeline for a single pod.
///
/// Holds only immutable configuration, so one instance can serve concurrent
/// attempts as long as each brings its own node snapshot.
pub struct GenericScheduler {
    predicates: Vec<Arc<dyn FitPredicate>>,
    priorities: Vec<PriorityConfig>,
    extenders: Vec<Arc<dyn SchedulerExtender>>,
    tie_break: TieBreak,
}

impl GenericScheduler {
    pub fn new(
        predicates: Vec<Arc<dyn FitPredicate>>,
        priorities: Vec<PriorityConfig>,
        extenders: Vec<Arc<dyn SchedulerExtender>>,
    ) -> Self {
        Self {
            predicates,
            priorities,
            extenders,
            tie_break: TieBreak::default(),
        }
    }

    /// Build from a policy, resolving names against `registry` and creating
    /// one HTTP client per extender
    pub fn from_policy(policy: &Policy, registry: &AlgorithmRegistry) -> Result<Self> {
        policy.validate()?;

        let predicates = registry.predicates_for(policy.predicates.as_deref())?;
        let priorities = registry.priorities_for(policy.priorities.as_deref())?;
        let extenders = policy
            .extenders
            .iter()
            .map(|config| {
                HttpExtender::new(config.clone())
                    .map(|e| Arc::new(e) as Arc<dyn SchedulerExtender>)
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Built scheduler with {} predicates, {} priorities, {} extenders",
            predicates.len(),
            priorities.len(),
            extenders.len()
        );

        Ok(Self::new(predicates, priorities, extenders))
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }

    /// Pick a node for `pod` among `nodes`.
    ///
    /// `Ok(Unschedulable)` when every node was filtered out; `Err` when a
    /// predicate or filter extender failed, or the attempt was cancelled.
    pub async fn schedule(
        &self,
        pod: &Pod,
        nodes: &[Node],
        node_infos: &NodeInfoMap,
        cancel: &CancellationToken,
    ) -> Result<ScheduleOutcome> {
        if nodes.is_empty() {
            return Err(SchedulerError::NoNodesAvailable);
        }
        if cancel.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }

        let (filtered, failed_nodes) = self
            .find_nodes_that_fit(pod, nodes, node_infos, cancel)
            .await?;

        if filtered.is_empty() {
            let error = FitError {
                pod: pod_key(pod),
                num_all_nodes: nodes.len(),
                failed_nodes,
            };
            debug!("Pod {} is unschedulable: {}", error.pod, error);
            return Ok(ScheduleOutcome::Unschedulable(error));
        }

        debug!(
            "Pod {} has {} feasible nodes",
            pod_key(pod),
            filtered.len()
        );

        let priority_list = self
            .prioritize_nodes(pod, node_infos, &filtered, cancel)
            .await?;
        let (node_name, score) = self.select_host(&priority_list)?;

        info!(
            "Selected node {} for pod {} with score {}",
            node_name,
            pod_key(pod),
            score
        );

        Ok(ScheduleOutcome::Scheduled { node_name, score })
    }

    /// Run every predicate, then every filter extender in order, over the
    /// shrinking candidate set
    pub async fn find_nodes_that_fit(
        &self,
        pod: &Pod,
        nodes: &[Node],
        node_infos: &NodeInfoMap,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Node>, FailedNodesMap)> {
        let meta = PredicateMetadata::new(pod, node_infos);
        let mut failed = FailedNodesMap::new();
        let mut filtered = Vec::with_capacity(nodes.len());

        for node in nodes {
            let name = node_name(node);
            let info = node_infos
                .get(name)
                .ok_or_else(|| SchedulerError::missing_node_info(name))?;

            match self.pod_fits_on_node(pod, &meta, info)? {
                None => filtered.push(node.clone()),
                Some(reason) => {
                    failed.insert(name.to_string(), reason);
                }
            }
        }

        for extender in self.extenders.iter().filter(|e| e.is_filter()) {
            if filtered.is_empty() {
                break;
            }
            if cancel.is_cancelled() {
                return Err(SchedulerError::Cancelled);
            }

            let offered: HashSet<String> =
                filtered.iter().map(|n| node_name(n).to_string()).collect();
            let (mut kept, extender_failed) = extender.filter(pod, filtered, cancel).await?;

            let before = kept.len();
            kept.retain(|n| offered.contains(node_name(n)));
            if kept.len() != before {
                warn!(
                    "Extender {} returned nodes it was not offered; ignoring them",
                    extender.name()
                );
            }

            {
                let kept_names: HashSet<&str> = kept.iter().map(node_name).collect();
                let rejected = |name: &str| offered.contains(name) && !kept_names.contains(name);

                failed.extend(
                    extender_failed
                        .into_iter()
                        .filter(|(name, reason)| rejected(name) && !reason.trim().is_empty()),
                );
                for name in offered.iter().filter(|n| rejected(n)) {
                    failed
                        .entry(name.clone())
                        .or_insert_with(|| format!("rejected by extender {}", extender.name()));
                }
            }
            filtered = kept;
        }

        Ok((filtered, failed))
    }

    /// `None` if every predicate passes, otherwise the reason from the first failure
    fn pod_fits_on_node(
        &self,
        pod: &Pod,
        meta: &PredicateMetadata,
        info: &NodeInfo,
    ) -> Result<Option<String>> {
        for predicate in &self.predicates {
            let result = predicate
                .predicate(pod, meta, info)
                .map_err(|e| match e {
                    SchedulerError::PredicateError { .. } => e,
                    other => SchedulerError::predicate_error(
                        predicate.name(),
                        info.node_name(),
                        other.to_string(),
                    ),
                })?;

            if !result.fits {
                let reason = if result.reasons.is_empty() {
                    predicate.name().to_string()
                } else {
                    result
                        .reasons
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                debug!(
                    "Node {} filtered out by {}: {}",
                    info.node_name(),
                    predicate.name(),
                    reason
                );
                return Ok(Some(reason));
            }
        }

        Ok(None)
    }

    /// Weighted sum of every priority function and prioritize extender, one
    /// entry per node in `nodes` order. Nodes nobody scored keep 0.
    pub async fn prioritize_nodes(
        &self,
        pod: &Pod,
        node_infos: &NodeInfoMap,
        nodes: &[Node],
        cancel: &CancellationToken,
    ) -> Result<HostPriorityList> {
        let index: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (node_name(n), i))
            .collect();
        let mut totals: HostPriorityList = nodes
            .iter()
            .map(|n| HostPriority::new(node_name(n), 0))
            .collect();

        let meta = PriorityMetadata::new(pod);
        for config in &self.priorities {
            let scores = config
                .function
                .prioritize(pod, &meta, node_infos, nodes)
                .map_err(|e| match e {
                    SchedulerError::PriorityError { .. }
                    | SchedulerError::MissingNodeInfo { .. } => e,
                    other => SchedulerError::priority_error(config.name(), other.to_string()),
                })?;
            add_scores(&mut totals, &index, &scores, config.weight, config.name());
        }

        for extender in self.extenders.iter().filter(|e| e.is_prioritizer()) {
            if cancel.is_cancelled() {
                return Err(SchedulerError::Cancelled);
            }

            match extender.prioritize(pod, nodes, cancel).await {
                Ok(scores) => {
                    add_scores(&mut totals, &index, &scores, extender.weight(), extender.name())
                }
                Err(SchedulerError::Cancelled) => return Err(SchedulerError::Cancelled),
                Err(e) => warn!(
                    "Ignoring prioritize failure from extender {}: {}",
                    extender.name(),
                    e
                ),
            }
        }

        Ok(totals)
    }

    /// Highest total wins; ties go through the configured [`TieBreak`]
    pub fn select_host(&self, priority_list: &HostPriorityList) -> Result<(String, i64)> {
        let max = priority_list
            .iter()
            .map(|h| h.score)
            .max()
            .ok_or_else(|| SchedulerError::internal_error("Empty priority list"))?;

        let tied: Vec<&HostPriority> = priority_list.iter().filter(|h| h.score == max).collect();
        let chosen = match self.tie_break {
            TieBreak::Lexicographic => tied.iter().min_by(|a, b| a.host.cmp(&b.host)),
            TieBreak::Random => tied.choose(&mut rand::rng()),
        }
        .ok_or_else(|| SchedulerError::internal_error("No node with the maximum score"))?;

        Ok((chosen.host.clone(), chosen.score))
    }
}

/// Add one contributor's weighted scores. Unknown hosts and repeated entries
/// for the same host are skipped.
fn add_scores(
    totals: &mut HostPriorityList,
    index: &HashMap<&str, usize>,
    scores: &[HostPriority],
    weight: i64,
    contributor: &str,
) {
    let mut seen = HashSet::new();
    for entry in scores {
        let Some(&i) = index.get(entry.host.as_str()) else {
            debug!("{} scored unknown node {}", contributor, entry.host);
            continue;
        };
        if !seen.insert(i) {
            debug!("{} scored node {} more than once", contributor, entry.host);
            continue;
        }
        totals[i].score = totals[i]
            .score
            .saturating_add(entry.score.saturating_mul(weight));
    }
}
