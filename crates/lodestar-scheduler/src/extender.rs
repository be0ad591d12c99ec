//! Scheduler extenders: out-of-process services that veto nodes and add
//! weighted scores over HTTP + JSON.

use crate::error::{Result, SchedulerError};
use crate::policy::ExtenderConfig;
use crate::types::{FailedNodesMap, HostPriorityList};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use lodestar_core::node_name;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Node list as sent to full-object extenders
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeList {
    #[serde(default)]
    pub items: Vec<Node>,
}

/// Request body for both filter and prioritize calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtenderArgs {
    #[serde(alias = "Pod")]
    pub pod: Pod,
    /// Set only for full-object extenders
    #[serde(default, alias = "Nodes", skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodeList>,
    /// Set only for node-cache-capable extenders
    #[serde(
        default,
        rename = "nodenames",
        alias = "NodeNames",
        skip_serializing_if = "Option::is_none"
    )]
    pub node_names: Option<Vec<String>>,
}

/// Response body of a filter call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtenderFilterResult {
    #[serde(default, alias = "Nodes", skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodeList>,
    #[serde(
        default,
        rename = "nodenames",
        alias = "NodeNames",
        skip_serializing_if = "Option::is_none"
    )]
    pub node_names: Option<Vec<String>>,
    #[serde(default, rename = "failedNodes", alias = "FailedNodes")]
    pub failed_nodes: Option<FailedNodesMap>,
    #[serde(default, alias = "Error")]
    pub error: Option<String>,
}

/// An external filter and/or prioritizer consulted by the generic scheduler
#[async_trait]
pub trait SchedulerExtender: Send + Sync {
    /// Identifies the extender in logs, errors and failure reasons
    fn name(&self) -> &str;

    /// Whether `filter` should be called
    fn is_filter(&self) -> bool;

    /// Whether `prioritize` should be called
    fn is_prioritizer(&self) -> bool;

    /// Multiplier for the scores returned by `prioritize`
    fn weight(&self) -> i64;

    /// Narrow `nodes` down. Returns the surviving nodes, always a subset of
    /// `nodes` in the same order, and the reasons for every node dropped.
    async fn filter(
        &self,
        pod: &Pod,
        nodes: Vec<Node>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Node>, FailedNodesMap)>;

    /// Unweighted scores for `nodes`
    async fn prioritize(
        &self,
        pod: &Pod,
        nodes: &[Node],
        cancel: &CancellationToken,
    ) -> Result<HostPriorityList>;
}

/// Extender reached over HTTP as described by an [`ExtenderConfig`]
pub struct HttpExtender {
    config: ExtenderConfig,
    name: String,
    client: Client,
}

impl HttpExtender {
    pub fn new(config: ExtenderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                SchedulerError::extender_error(
                    &config.url_prefix,
                    format!("Failed to build HTTP client: {}", e),
                )
            })?;

        Ok(Self {
            name: config.base_url(),
            config,
            client,
        })
    }

    pub fn config(&self) -> &ExtenderConfig {
        &self.config
    }

    fn args(&self, pod: &Pod, nodes: &[Node]) -> ExtenderArgs {
        if self.config.node_cache_capable {
            ExtenderArgs {
                pod: pod.clone(),
                nodes: None,
                node_names: Some(nodes.iter().map(|n| node_name(n).to_string()).collect()),
            }
        } else {
            ExtenderArgs {
                pod: pod.clone(),
                nodes: Some(NodeList {
                    items: nodes.to_vec(),
                }),
                node_names: None,
            }
        }
    }

    /// POST {urlPrefix}/{verb}
    async fn send<T: DeserializeOwned>(
        &self,
        verb: &str,
        args: &ExtenderArgs,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let url = self.config.verb_url(verb);
        debug!("POST {}", url);

        let call = async {
            let resp = self.client.post(&url).json(args).send().await.map_err(|e| {
                let cause = if e.is_timeout() {
                    format!("request timed out after {:?}", self.config.timeout())
                } else {
                    format!("HTTP request failed: {}", e)
                };
                SchedulerError::extender_error(&self.name, cause)
            })?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(SchedulerError::extender_error(
                    &self.name,
                    format!("POST {} failed with status {}: {}", verb, status, body),
                ));
            }

            resp.json::<T>().await.map_err(|e| {
                SchedulerError::extender_error(
                    &self.name,
                    format!("Failed to parse {} response: {}", verb, e),
                )
            })
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(SchedulerError::Cancelled),
            result = call => result,
        }
    }

    /// Names the extender kept, read from the field matching the request mode
    fn kept_names(&self, result: &mut ExtenderFilterResult) -> Vec<String> {
        if self.config.node_cache_capable {
            result.node_names.take().unwrap_or_default()
        } else {
            result
                .nodes
                .take()
                .map(|list| {
                    list.items
                        .iter()
                        .map(|n| node_name(n).to_string())
                        .collect()
                })
                .unwrap_or_default()
        }
    }
}

#[async_trait]
impl SchedulerExtender for HttpExtender {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_filter(&self) -> bool {
        self.config.is_filter()
    }

    fn is_prioritizer(&self) -> bool {
        self.config.is_prioritizer()
    }

    fn weight(&self) -> i64 {
        self.config.weight
    }

    async fn filter(
        &self,
        pod: &Pod,
        nodes: Vec<Node>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Node>, FailedNodesMap)> {
        let args = self.args(pod, &nodes);
        let mut result: ExtenderFilterResult =
            self.send(&self.config.filter_verb, &args, cancel).await?;

        if let Some(error) = result.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(SchedulerError::extender_error(&self.name, error));
        }

        let requested: HashSet<&str> = nodes.iter().map(node_name).collect();
        let mut kept = HashSet::new();
        for name in self.kept_names(&mut result) {
            if !requested.contains(name.as_str()) {
                return Err(SchedulerError::extender_error(
                    &self.name,
                    format!("filter returned node {} that was not in the request", name),
                ));
            }
            kept.insert(name);
        }

        let mut failed: FailedNodesMap = result
            .failed_nodes
            .unwrap_or_default()
            .into_iter()
            .filter(|(name, reason)| {
                requested.contains(name.as_str())
                    && !kept.contains(name)
                    && !reason.trim().is_empty()
            })
            .collect();

        let (survivors, dropped): (Vec<Node>, Vec<Node>) = nodes
            .into_iter()
            .partition(|n| kept.contains(node_name(n)));

        for node in &dropped {
            failed
                .entry(node_name(node).to_string())
                .or_insert_with(|| format!("rejected by extender {}", self.name));
        }

        debug!(
            "Extender {} kept {} node(s), rejected {}",
            self.name,
            survivors.len(),
            dropped.len()
        );

        Ok((survivors, failed))
    }

    async fn prioritize(
        &self,
        pod: &Pod,
        nodes: &[Node],
        cancel: &CancellationToken,
    ) -> Result<HostPriorityList> {
        let args = self.args(pod, nodes);
        let scores: HostPriorityList = self
            .send(&self.config.prioritize_verb, &args, cancel)
            .await?;

        if scores.len() > nodes.len() {
            warn!(
                "Extender {} returned {} scores for {} nodes",
                self.name,
                scores.len(),
                nodes.len()
            );
        }

        Ok(scores)
    }
}
