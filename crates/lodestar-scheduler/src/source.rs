use crate::error::{Result, SchedulerError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use lodestar_core::{pod_key, pod_name, pod_namespace};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Where the scheduling loop reads cluster state from
#[async_trait]
pub trait ClusterSource: Send + Sync {
    /// All nodes, schedulable or not
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// All pods, bound and pending
    async fn list_pods(&self) -> Result<Vec<Pod>>;
}

/// Where scheduling decisions are committed
#[async_trait]
pub trait PodBinder: Send + Sync {
    /// Bind `pod` to `node_name`. The pod already carries `spec.nodeName`.
    async fn bind(&self, pod: &Pod, node_name: &str) -> Result<()>;
}

/// Cluster state held in memory. Binding updates the stored pod in place.
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    nodes: Arc<RwLock<Vec<Node>>>,
    pods: Arc<RwLock<Vec<Pod>>>,
}

impl InMemoryCluster {
    pub fn new(nodes: Vec<Node>, pods: Vec<Pod>) -> Self {
        Self {
            nodes: Arc::new(RwLock::new(nodes)),
            pods: Arc::new(RwLock::new(pods)),
        }
    }

    pub async fn add_node(&self, node: Node) {
        self.nodes.write().await.push(node);
    }

    pub async fn add_pod(&self, pod: Pod) {
        self.pods.write().await.push(pod);
    }

    /// Node the pod with this namespace/name is bound to
    pub async fn bound_node(&self, namespace: &str, name: &str) -> Option<String> {
        self.pods
            .read()
            .await
            .iter()
            .find(|p| pod_namespace(p) == namespace && pod_name(p) == name)
            .and_then(|p| p.spec.as_ref())
            .and_then(|s| s.node_name.clone())
    }
}

#[async_trait]
impl ClusterSource for InMemoryCluster {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.nodes.read().await.clone())
    }

    async fn list_pods(&self) -> Result<Vec<Pod>> {
        Ok(self.pods.read().await.clone())
    }
}

#[async_trait]
impl PodBinder for InMemoryCluster {
    async fn bind(&self, pod: &Pod, node_name: &str) -> Result<()> {
        let key = pod_key(pod);
        let mut pods = self.pods.write().await;
        let stored = pods
            .iter_mut()
            .find(|p| pod_key(p) == key)
            .ok_or_else(|| SchedulerError::binding_failed(&key, node_name, "pod not found"))?;

        let spec = stored.spec.get_or_insert_with(Default::default);
        if let Some(existing) = spec.node_name.as_deref() {
            return Err(SchedulerError::binding_failed(
                &key,
                node_name,
                format!("pod is already bound to {}", existing),
            ));
        }
        spec.node_name = Some(node_name.to_string());

        debug!("Bound pod {} to node {}", key, node_name);
        Ok(())
    }
}
