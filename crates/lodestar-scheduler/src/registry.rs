use crate::error::{Result, SchedulerError};
use crate::filter::{self, FitPredicate};
use crate::policy::{PredicatePolicy, PriorityPolicy};
use crate::score::{self, PriorityConfig, PriorityFunction};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Named predicates and priority functions a [`Policy`](crate::Policy) can refer to,
/// plus the sets used when a policy does not choose.
pub struct AlgorithmRegistry {
    predicates: BTreeMap<String, Arc<dyn FitPredicate>>,
    priorities: BTreeMap<String, Arc<dyn PriorityFunction>>,
    default_predicates: Vec<String>,
    default_priorities: Vec<(String, i64)>,
}

impl AlgorithmRegistry {
    /// An empty registry with an empty default provider
    pub fn empty() -> Self {
        Self {
            predicates: BTreeMap::new(),
            priorities: BTreeMap::new(),
            default_predicates: Vec::new(),
            default_priorities: Vec::new(),
        }
    }

    /// Every built-in predicate and priority, with the default provider set
    pub fn new() -> Self {
        let mut registry = Self::empty();

        let predicates: Vec<Arc<dyn FitPredicate>> = vec![
            Arc::new(filter::CheckNodeCondition),
            Arc::new(filter::CheckNodeMemoryPressure),
            Arc::new(filter::CheckNodeDiskPressure),
            Arc::new(filter::HostName),
            Arc::new(filter::PodFitsHostPorts),
            Arc::new(filter::MatchNodeSelector),
            Arc::new(filter::PodFitsResources),
            Arc::new(filter::PodToleratesNodeTaints),
            Arc::new(filter::MatchInterPodAffinity),
        ];
        for predicate in predicates {
            registry.register_fit_predicate(predicate);
        }

        let priorities: Vec<Arc<dyn PriorityFunction>> = vec![
            Arc::new(score::LeastRequestedPriority),
            Arc::new(score::MostRequestedPriority),
            Arc::new(score::BalancedResourceAllocation),
            Arc::new(score::NodeAffinityPriority),
            Arc::new(score::TaintTolerationPriority),
            Arc::new(score::EqualPriority),
        ];
        for priority in priorities {
            registry.register_priority(priority);
        }

        // Cheap checks first
        registry.default_predicates = [
            filter::CHECK_NODE_CONDITION,
            filter::CHECK_NODE_MEMORY_PRESSURE,
            filter::CHECK_NODE_DISK_PRESSURE,
            filter::HOST_NAME,
            filter::POD_FITS_HOST_PORTS,
            filter::MATCH_NODE_SELECTOR,
            filter::POD_FITS_RESOURCES,
            filter::POD_TOLERATES_NODE_TAINTS,
            filter::MATCH_INTER_POD_AFFINITY,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        registry.default_priorities = [
            score::LEAST_REQUESTED_PRIORITY,
            score::BALANCED_RESOURCE_ALLOCATION,
            score::NODE_AFFINITY_PRIORITY,
            score::TAINT_TOLERATION_PRIORITY,
        ]
        .iter()
        .map(|s| (s.to_string(), 1))
        .collect();

        registry
    }

    /// Register a predicate under its own name, replacing any previous one
    pub fn register_fit_predicate(&mut self, predicate: Arc<dyn FitPredicate>) -> &mut Self {
        debug!("Registering predicate {}", predicate.name());
        self.predicates
            .insert(predicate.name().to_string(), predicate);
        self
    }

    /// Register a priority function under its own name, replacing any previous one
    pub fn register_priority(&mut self, function: Arc<dyn PriorityFunction>) -> &mut Self {
        debug!("Registering priority function {}", function.name());
        self.priorities.insert(function.name().to_string(), function);
        self
    }

    /// Replace the sets used for policies that leave predicates or priorities unset
    pub fn set_default_provider(
        &mut self,
        predicates: Vec<String>,
        priorities: Vec<(String, i64)>,
    ) -> &mut Self {
        self.default_predicates = predicates;
        self.default_priorities = priorities;
        self
    }

    pub fn predicate(&self, name: &str) -> Result<Arc<dyn FitPredicate>> {
        self.predicates
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownPredicate {
                name: name.to_string(),
            })
    }

    pub fn priority(&self, name: &str, weight: i64) -> Result<PriorityConfig> {
        self.priorities
            .get(name)
            .cloned()
            .map(|function| PriorityConfig::new(function, weight))
            .ok_or_else(|| SchedulerError::UnknownPriority {
                name: name.to_string(),
            })
    }

    /// Resolve a policy's predicate list, or the defaults when it has none
    pub fn predicates_for(
        &self,
        selected: Option<&[PredicatePolicy]>,
    ) -> Result<Vec<Arc<dyn FitPredicate>>> {
        match selected {
            Some(list) => list.iter().map(|p| self.predicate(&p.name)).collect(),
            None => self
                .default_predicates
                .iter()
                .map(|name| self.predicate(name))
                .collect(),
        }
    }

    /// Resolve a policy's priority list, or the defaults when it has none
    pub fn priorities_for(&self, selected: Option<&[PriorityPolicy]>) -> Result<Vec<PriorityConfig>> {
        match selected {
            Some(list) => list
                .iter()
                .map(|p| self.priority(&p.name, p.weight))
                .collect(),
            None => self
                .default_priorities
                .iter()
                .map(|(name, weight)| self.priority(name, *weight))
                .collect(),
        }
    }

    pub fn predicate_names(&self) -> Vec<&str> {
        self.predicates.keys().map(String::as_str).collect()
    }

    pub fn priority_names(&self) -> Vec<&str> {
        self.priorities.keys().map(String::as_str).collect()
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PredicateMetadata;
    use crate::types::FitResult;
    use k8s_openapi::api::core::v1::Pod;
    use lodestar_core::NodeInfo;

    struct AlwaysFits;

    impl FitPredicate for AlwaysFits {
        fn predicate(&self, _: &Pod, _: &PredicateMetadata, _: &NodeInfo) -> Result<FitResult> {
            Ok(FitResult::fit())
        }

        fn name(&self) -> &str {
            "AlwaysFits"
        }
    }

    #[test]
    fn test_default_provider() {
        let registry = AlgorithmRegistry::new();

        let predicates = registry.predicates_for(None).unwrap();
        let names: Vec<&str> = predicates.iter().map(|p| p.name()).collect();
        assert_eq!(names.first(), Some(&"CheckNodeCondition"));
        assert_eq!(names.len(), 9);

        let priorities = registry.priorities_for(None).unwrap();
        assert_eq!(priorities.len(), 4);
        assert!(priorities.iter().all(|p| p.weight == 1));
        assert!(!priorities.iter().any(|p| p.name() == "MostRequestedPriority"));
    }

    #[test]
    fn test_policy_selection() {
        let registry = AlgorithmRegistry::new();

        let predicates = registry
            .predicates_for(Some(&[PredicatePolicy {
                name: "PodFitsResources".to_string(),
            }]))
            .unwrap();
        assert_eq!(predicates.len(), 1);
        assert!(registry.predicates_for(Some(&[])).unwrap().is_empty());

        let priorities = registry
            .priorities_for(Some(&[PriorityPolicy {
                name: "EqualPriority".to_string(),
                weight: 3,
            }]))
            .unwrap();
        assert_eq!(priorities[0].weight, 3);
    }

    #[test]
    fn test_unknown_names() {
        let registry = AlgorithmRegistry::new();
        assert!(matches!(
            registry.predicate("Nope"),
            Err(SchedulerError::UnknownPredicate { .. })
        ));
        assert!(matches!(
            registry.priority("Nope", 1),
            Err(SchedulerError::UnknownPriority { .. })
        ));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = AlgorithmRegistry::empty();
        registry
            .register_fit_predicate(Arc::new(AlwaysFits))
            .set_default_provider(vec!["AlwaysFits".to_string()], vec![]);

        assert_eq!(registry.predicate_names(), vec!["AlwaysFits"]);
        assert_eq!(registry.predicates_for(None).unwrap().len(), 1);
        assert!(registry.priorities_for(None).unwrap().is_empty());
    }
}
