//! Lodestar Core - Node and Pod snapshot model for the Lodestar scheduler
//!
//! This crate provides:
//! - Resource quantity parsing and request accounting
//! - Per-cycle node snapshots (`NodeInfo`)
//! - Label, node selector and label selector matching
//! - Error types with miette diagnostics
//! - JSON / YAML decoding helpers

pub mod error;
pub mod labels;
pub mod node_info;
pub mod resources;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use node_info::{node_info_map, HostPort, NodeInfo, NodeInfoMap};
pub use resources::{pod_non_zero_requests, pod_requests, Resource};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{Node, Pod};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Name of a node, or "<unknown>" if unset
pub fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or("<unknown>")
}

/// Name of a pod, or "<unknown>" if unset
pub fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or("<unknown>")
}

/// Namespace of a pod, defaulting to "default"
pub fn pod_namespace(pod: &Pod) -> &str {
    pod.metadata.namespace.as_deref().unwrap_or("default")
}

/// "namespace/name" key of a pod
pub fn pod_key(pod: &Pod) -> String {
    format!("{}/{}", pod_namespace(pod), pod_name(pod))
}

/// Decode a Kubernetes object (or any serde type) from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| CoreError::malformed_document("JSON", e))
}

/// Decode from YAML. JSON input is accepted too, being a subset of YAML.
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| CoreError::malformed_document("YAML", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_pod_deserialization() {
        let json = r#"{"metadata": {"name": "nginx"}, "spec": {"containers": []}}"#;
        let pod: Pod = from_json(json).unwrap();
        assert_eq!(pod_name(&pod), "nginx");
        assert!(matches!(
            from_json::<Pod>("{"),
            Err(CoreError::MalformedDocument { format: "JSON", .. })
        ));
    }

    #[test]
    fn test_yaml_node_deserialization() {
        let yaml = "metadata:\n  name: node-a\n  labels:\n    zone: a\n";
        let node: Node = from_yaml(yaml).unwrap();
        assert_eq!(node_name(&node), "node-a");
        assert!(from_yaml::<Node>("metadata: [").is_err());
    }

    #[test]
    fn test_pod_key_defaults_namespace() {
        let mut pod = Pod::default();
        pod.metadata.name = Some("web-0".to_string());
        assert_eq!(pod_key(&pod), "default/web-0");

        pod.metadata.namespace = Some("prod".to_string());
        assert_eq!(pod_key(&pod), "prod/web-0");
        assert_eq!(pod_name(&Pod::default()), "<unknown>");
    }
}
