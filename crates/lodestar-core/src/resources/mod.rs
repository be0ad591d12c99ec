pub mod quantities;

pub use quantities::{parse_milli_quantity, parse_quantity};

use k8s_openapi::api::core::v1::{Container, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use std::ops::AddAssign;

pub const RESOURCE_CPU: &str = "cpu";
pub const RESOURCE_MEMORY: &str = "memory";
pub const RESOURCE_PODS: &str = "pods";

/// CPU assumed for a container that requests none, when spreading load (0.1 core)
pub const DEFAULT_MILLI_CPU_REQUEST: i64 = 100;
/// Memory assumed for a container that requests none, when spreading load (200 MiB)
pub const DEFAULT_MEMORY_REQUEST: i64 = 200 * 1024 * 1024;

/// Compute resources tracked by the scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resource {
    /// CPU in millicores (1000 = 1 core)
    pub milli_cpu: i64,
    /// Memory in bytes
    pub memory: i64,
    /// Maximum number of pods (only meaningful for allocatable)
    pub allowed_pod_number: i64,
}

impl Resource {
    pub fn new(milli_cpu: i64, memory: i64) -> Self {
        Self {
            milli_cpu,
            memory,
            allowed_pod_number: 0,
        }
    }

    /// Read cpu, memory and pods from a k8s resource list. Unparseable entries count as zero.
    pub fn from_resource_list(list: &BTreeMap<String, Quantity>) -> Self {
        let milli_cpu = list
            .get(RESOURCE_CPU)
            .and_then(|q| parse_milli_quantity(&q.0).ok())
            .unwrap_or(0);
        let memory = list
            .get(RESOURCE_MEMORY)
            .and_then(|q| parse_quantity(&q.0).ok())
            .unwrap_or(0);
        let allowed_pod_number = list
            .get(RESOURCE_PODS)
            .and_then(|q| parse_quantity(&q.0).ok())
            .unwrap_or(0);

        Self {
            milli_cpu,
            memory,
            allowed_pod_number,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.milli_cpu == 0 && self.memory == 0
    }

    /// Component-wise maximum of cpu and memory
    fn max_with(&mut self, other: &Resource) {
        self.milli_cpu = self.milli_cpu.max(other.milli_cpu);
        self.memory = self.memory.max(other.memory);
    }
}

impl AddAssign for Resource {
    fn add_assign(&mut self, rhs: Self) {
        self.milli_cpu = self.milli_cpu.saturating_add(rhs.milli_cpu);
        self.memory = self.memory.saturating_add(rhs.memory);
        self.allowed_pod_number = self.allowed_pod_number.saturating_add(rhs.allowed_pod_number);
    }
}

fn container_requests(container: &Container) -> Resource {
    container
        .resources
        .as_ref()
        .and_then(|r| r.requests.as_ref())
        .map(Resource::from_resource_list)
        .unwrap_or_default()
}

/// Resources a pod requests: the sum over its containers, or the largest init
/// container if that is bigger.
pub fn pod_requests(pod: &Pod) -> Resource {
    let mut total = Resource::default();
    let Some(spec) = &pod.spec else {
        return total;
    };

    for container in &spec.containers {
        total += container_requests(container);
    }
    for init in spec.init_containers.iter().flatten() {
        total.max_with(&container_requests(init));
    }

    total
}

/// Like [`pod_requests`], but containers without a cpu or memory request count
/// with the scheduler defaults. Used for spreading, never for fit checks.
pub fn pod_non_zero_requests(pod: &Pod) -> Resource {
    let mut total = Resource::default();
    let Some(spec) = &pod.spec else {
        return total;
    };

    for container in &spec.containers {
        let req = container_requests(container);
        total += Resource {
            milli_cpu: if req.milli_cpu == 0 {
                DEFAULT_MILLI_CPU_REQUEST
            } else {
                req.milli_cpu
            },
            memory: if req.memory == 0 {
                DEFAULT_MEMORY_REQUEST
            } else {
                req.memory
            },
            allowed_pod_number: 0,
        };
    }

    total
}

/// A pod is best-effort when none of its containers set cpu or memory requests or limits
pub fn is_best_effort(pod: &Pod) -> bool {
    let Some(spec) = &pod.spec else {
        return true;
    };

    spec.containers
        .iter()
        .chain(spec.init_containers.iter().flatten())
        .all(|c| {
            let Some(resources) = &c.resources else {
                return true;
            };
            [&resources.requests, &resources.limits]
                .into_iter()
                .flatten()
                .all(|list| {
                    !list.contains_key(RESOURCE_CPU) && !list.contains_key(RESOURCE_MEMORY)
                })
        })
}
