use crate::resources::{pod_non_zero_requests, pod_requests, Resource};
use crate::node_name;
use k8s_openapi::api::core::v1::{Node, Pod};
use std::collections::HashMap;

/// Node name -> snapshot, rebuilt by the caller before each scheduling pass
pub type NodeInfoMap = HashMap<String, NodeInfo>;

/// A host port claimed by a container
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    pub ip: String,
    pub protocol: String,
    pub port: i32,
}

impl HostPort {
    /// Two claims conflict on the same port and protocol unless they bind different specific IPs
    pub fn conflicts_with(&self, other: &HostPort) -> bool {
        if self.port != other.port || self.protocol != other.protocol {
            return false;
        }
        let wildcard = |ip: &str| ip.is_empty() || ip == "0.0.0.0";
        wildcard(&self.ip) || wildcard(&other.ip) || self.ip == other.ip
    }
}

/// Host ports requested by a pod's containers
pub fn pod_host_ports(pod: &Pod) -> Vec<HostPort> {
    let Some(spec) = &pod.spec else {
        return Vec::new();
    };

    spec.containers
        .iter()
        .flat_map(|c| c.ports.iter().flatten())
        .filter_map(|p| {
            let port = p.host_port.filter(|port| *port > 0)?;
            Some(HostPort {
                ip: p.host_ip.clone().unwrap_or_default(),
                protocol: p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
                port,
            })
        })
        .collect()
}

/// Aggregated, point-in-time view of one node and the pods bound to it
#[derive(Debug, Clone)]
pub struct NodeInfo {
    node: Node,
    pods: Vec<Pod>,
    requested: Resource,
    non_zero_requested: Resource,
    allocatable: Resource,
    used_ports: Vec<HostPort>,
}

impl NodeInfo {
    /// Snapshot of a node with no pods. Allocatable falls back to capacity.
    pub fn new(node: Node) -> Self {
        let allocatable = node
            .status
            .as_ref()
            .and_then(|s| s.allocatable.as_ref().or(s.capacity.as_ref()))
            .map(Resource::from_resource_list)
            .unwrap_or_default();

        Self {
            node,
            pods: Vec::new(),
            requested: Resource::default(),
            non_zero_requested: Resource::default(),
            allocatable,
            used_ports: Vec::new(),
        }
    }

    pub fn with_pods(node: Node, pods: impl IntoIterator<Item = Pod>) -> Self {
        let mut info = Self::new(node);
        for pod in pods {
            info.add_pod(pod);
        }
        info
    }

    /// Account a pod against this node
    pub fn add_pod(&mut self, pod: Pod) {
        self.requested += pod_requests(&pod);
        self.non_zero_requested += pod_non_zero_requests(&pod);
        self.used_ports.extend(pod_host_ports(&pod));
        self.pods.push(pod);
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn node_name(&self) -> &str {
        node_name(&self.node)
    }

    pub fn pods(&self) -> &[Pod] {
        &self.pods
    }

    pub fn requested_resource(&self) -> &Resource {
        &self.requested
    }

    pub fn non_zero_requested(&self) -> &Resource {
        &self.non_zero_requested
    }

    pub fn allocatable_resource(&self) -> &Resource {
        &self.allocatable
    }

    pub fn used_ports(&self) -> &[HostPort] {
        &self.used_ports
    }
}

/// Whether a pod has finished and no longer holds node resources
pub fn is_terminated(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}

/// Build a snapshot for every node from the pods bound to it. Pods bound to
/// unknown nodes and terminated pods are skipped.
pub fn node_info_map(nodes: &[Node], pods: &[Pod]) -> NodeInfoMap {
    let mut map: NodeInfoMap = nodes
        .iter()
        .map(|n| (node_name(n).to_string(), NodeInfo::new(n.clone())))
        .collect();

    for pod in pods {
        if is_terminated(pod) {
            continue;
        }
        let Some(bound_to) = pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) else {
            continue;
        };
        if let Some(info) = map.get_mut(bound_to) {
            info.add_pod(pod.clone());
        }
    }

    map
}
