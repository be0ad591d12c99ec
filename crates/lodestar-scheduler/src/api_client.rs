use crate::error::{Result, SchedulerError};
use crate::source::{ClusterSource, PodBinder};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Binding, Node, ObjectReference, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use lodestar_core::{pod_key, pod_name, pod_namespace};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

/// HTTP client for a Kubernetes-style API server
pub struct ApiClient {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SchedulerError::source_error(format!("HTTP request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SchedulerError::source_error(format!(
                "GET {} failed with status {}: {}",
                path, status, body
            )));
        }

        resp.json::<ItemList<T>>()
            .await
            .map(|list| list.items)
            .map_err(|e| SchedulerError::source_error(format!("Failed to parse {}: {}", path, e)))
    }
}

#[async_trait]
impl ClusterSource for ApiClient {
    /// GET /api/v1/nodes
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        self.list("/api/v1/nodes").await
    }

    /// GET /api/v1/pods
    async fn list_pods(&self) -> Result<Vec<Pod>> {
        self.list("/api/v1/pods").await
    }
}

#[async_trait]
impl PodBinder for ApiClient {
    /// POST /api/v1/namespaces/{namespace}/pods/{name}/binding
    async fn bind(&self, pod: &Pod, node_name: &str) -> Result<()> {
        let namespace = pod_namespace(pod);
        let name = pod_name(pod);
        let url = format!(
            "{}/api/v1/namespaces/{}/pods/{}/binding",
            self.base_url, namespace, name
        );
        debug!("POST {}", url);

        let binding = Binding {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                uid: pod.metadata.uid.clone(),
                ..Default::default()
            },
            target: ObjectReference {
                api_version: Some("v1".to_string()),
                kind: Some("Node".to_string()),
                name: Some(node_name.to_string()),
                ..Default::default()
            },
        };

        let resp = self
            .client
            .post(&url)
            .json(&binding)
            .send()
            .await
            .map_err(|e| {
                SchedulerError::binding_failed(
                    pod_key(pod),
                    node_name,
                    format!("HTTP request failed: {}", e),
                )
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SchedulerError::binding_failed(
                pod_key(pod),
                node_name,
                format!("status {}: {}", status, body),
            ));
        }

        Ok(())
    }
}
