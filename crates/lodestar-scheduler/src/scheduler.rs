use crate::error::{Result, SchedulerError};
use crate::generic_scheduler::{GenericScheduler, TieBreak};
use crate::source::{ClusterSource, PodBinder};
use crate::types::ScheduleOutcome;
use k8s_openapi::api::core::v1::{Node, Pod};
use lodestar_core::node_info::is_terminated;
use lodestar_core::{node_info_map, pod_key, NodeInfoMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_SCHEDULER_NAME: &str = "default-scheduler";

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between scheduling cycles
    pub schedule_interval: Duration,
    /// Only pods naming this scheduler (or none, for the default) are picked up
    pub scheduler_name: String,
    pub tie_break: TieBreak,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule_interval: Duration::from_secs(1),
            scheduler_name: DEFAULT_SCHEDULER_NAME.to_string(),
            tie_break: TieBreak::Random,
        }
    }
}

/// Result of one pod's attempt within a cycle
#[derive(Debug)]
pub struct PodResult {
    /// namespace/name
    pub pod: String,
    pub outcome: Result<ScheduleOutcome>,
}

/// Pod scheduler: polls the cluster source and binds pending pods
pub struct Scheduler {
    algorithm: GenericScheduler,
    source: Arc<dyn ClusterSource>,
    binder: Arc<dyn PodBinder>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a new scheduler. The config's tie-break overrides the algorithm's.
    pub fn new(
        algorithm: GenericScheduler,
        source: Arc<dyn ClusterSource>,
        binder: Arc<dyn PodBinder>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            algorithm: algorithm.with_tie_break(config.tie_break),
            source,
            binder,
            config,
        }
    }

    /// Run the scheduler loop until `token` is cancelled
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!(
            "Starting scheduler {} (interval: {:?}, tie-break: {})",
            self.config.scheduler_name,
            self.config.schedule_interval,
            self.config.tie_break
        );

        let mut interval = tokio::time::interval(self.config.schedule_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Scheduler shutting down");
                    return Ok(());
                }
                _ = interval.tick() => {
                    match self.schedule_cycle(&token).await {
                        Ok(_) => {}
                        Err(SchedulerError::Cancelled) => {
                            info!("Scheduler shutting down");
                            return Ok(());
                        }
                        Err(e) => error!("Scheduling cycle failed: {}", e),
                    }
                }
            }
        }
    }

    /// Whether this scheduler is responsible for `pod`
    pub fn is_pending(&self, pod: &Pod) -> bool {
        let Some(spec) = &pod.spec else {
            return false;
        };

        let unbound = spec.node_name.as_deref().is_none_or(str::is_empty);
        let ours = spec
            .scheduler_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_SCHEDULER_NAME)
            == self.config.scheduler_name;

        unbound && ours && !is_terminated(pod) && pod.metadata.deletion_timestamp.is_none()
    }

    /// Run a single scheduling cycle over every pending pod
    pub async fn schedule_cycle(&self, cancel: &CancellationToken) -> Result<Vec<PodResult>> {
        debug!("Running scheduling cycle");

        let pods = self.source.list_pods().await?;
        let pending: Vec<Pod> = pods.iter().filter(|p| self.is_pending(p)).cloned().collect();

        if pending.is_empty() {
            debug!("No unscheduled pods found");
            return Ok(Vec::new());
        }

        info!("Found {} unscheduled pods", pending.len());

        let nodes = self.source.list_nodes().await?;
        if nodes.is_empty() {
            warn!("No nodes available for scheduling");
            return Ok(Vec::new());
        }

        let mut node_infos = node_info_map(&nodes, &pods);
        let mut results = Vec::with_capacity(pending.len());

        for pod in pending {
            if cancel.is_cancelled() {
                return Err(SchedulerError::Cancelled);
            }

            let key = pod_key(&pod);
            let outcome = self.schedule_one(pod, &nodes, &mut node_infos, cancel).await;

            match &outcome {
                Ok(ScheduleOutcome::Scheduled { node_name, .. }) => {
                    info!("Scheduled pod {} to node {}", key, node_name);
                }
                Ok(ScheduleOutcome::Unschedulable(fit_error)) => {
                    warn!("Pod {} is unschedulable: {}", key, fit_error);
                }
                Err(SchedulerError::Cancelled) => return Err(SchedulerError::Cancelled),
                Err(e) => {
                    error!("Failed to schedule pod {}: {}", key, e);
                }
            }

            results.push(PodResult { pod: key, outcome });
        }

        Ok(results)
    }

    /// Schedule and bind one pod, then account it in `node_infos` so later
    /// pods in the same cycle see its requests
    pub async fn schedule_one(
        &self,
        mut pod: Pod,
        nodes: &[Node],
        node_infos: &mut NodeInfoMap,
        cancel: &CancellationToken,
    ) -> Result<ScheduleOutcome> {
        let outcome = self.algorithm.schedule(&pod, nodes, node_infos, cancel).await?;

        if let ScheduleOutcome::Scheduled { node_name, .. } = &outcome {
            if cancel.is_cancelled() {
                return Err(SchedulerError::Cancelled);
            }

            pod.spec.get_or_insert_with(Default::default).node_name = Some(node_name.clone());
            self.binder.bind(&pod, node_name).await?;

            if let Some(info) = node_infos.get_mut(node_name) {
                info.add_pod(pod);
            }
        }

        Ok(outcome)
    }
}
