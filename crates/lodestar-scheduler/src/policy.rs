//! Declarative scheduler configuration: which predicates and priorities to
//! run and which HTTP extenders to consult, in order.

use crate::error::{Result, SchedulerError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-call extender timeout when the policy does not set one
pub const DEFAULT_EXTENDER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// `None` selects the registry's default predicates; an empty list runs none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicates: Option<Vec<PredicatePolicy>>,
    /// `None` selects the registry's default priorities; an empty list runs none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priorities: Option<Vec<PriorityPolicy>>,
    #[serde(default)]
    pub extenders: Vec<ExtenderConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredicatePolicy {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityPolicy {
    pub name: String,
    pub weight: i64,
}

/// How to reach one extender and what it is used for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtenderConfig {
    /// Base URL, e.g. `http://127.0.0.1:8888/scheduler`
    pub url_prefix: String,
    /// Empty when the extender does not filter
    #[serde(default)]
    pub filter_verb: String,
    /// Empty when the extender does not prioritize
    #[serde(default)]
    pub prioritize_verb: String,
    /// Multiplier for this extender's scores; 0 disables prioritization
    #[serde(default)]
    pub weight: i64,
    /// Use https when `url_prefix` carries no scheme
    #[serde(default)]
    pub enable_https: bool,
    /// Send and read node names only
    #[serde(default)]
    pub node_cache_capable: bool,
    /// Per-call timeout in nanoseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_timeout: Option<u64>,
}

impl ExtenderConfig {
    pub fn new(url_prefix: impl Into<String>) -> Self {
        Self {
            url_prefix: url_prefix.into(),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, verb: impl Into<String>) -> Self {
        self.filter_verb = verb.into();
        self
    }

    pub fn with_prioritize(mut self, verb: impl Into<String>, weight: i64) -> Self {
        self.prioritize_verb = verb.into();
        self.weight = weight;
        self
    }

    pub fn with_node_cache(mut self, node_cache_capable: bool) -> Self {
        self.node_cache_capable = node_cache_capable;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX));
        self
    }

    pub fn timeout(&self) -> Duration {
        match self.http_timeout {
            Some(nanos) if nanos > 0 => Duration::from_nanos(nanos),
            _ => DEFAULT_EXTENDER_TIMEOUT,
        }
    }

    pub fn is_filter(&self) -> bool {
        !self.filter_verb.is_empty()
    }

    pub fn is_prioritizer(&self) -> bool {
        !self.prioritize_verb.is_empty() && self.weight > 0
    }

    /// URL prefix with a scheme and without a trailing slash
    pub fn base_url(&self) -> String {
        let prefix = self.url_prefix.trim_end_matches('/');
        if prefix.starts_with("http://") || prefix.starts_with("https://") {
            prefix.to_string()
        } else if self.enable_https {
            format!("https://{}", prefix)
        } else {
            format!("http://{}", prefix)
        }
    }

    pub fn verb_url(&self, verb: &str) -> String {
        format!("{}/{}", self.base_url(), verb.trim_start_matches('/'))
    }

    fn validate(&self) -> Result<()> {
        if self.url_prefix.trim().is_empty() {
            return Err(SchedulerError::invalid_policy(
                "extender urlPrefix is empty",
                "Set urlPrefix to the extender's base URL, e.g. http://127.0.0.1:8888/scheduler",
            ));
        }
        if self.enable_https && self.url_prefix.starts_with("http://") {
            return Err(SchedulerError::invalid_policy(
                format!("extender {} sets enableHttps with an http:// urlPrefix", self.url_prefix),
                "Drop the scheme from urlPrefix or use https://",
            ));
        }
        if self.weight < 0 {
            return Err(SchedulerError::invalid_policy(
                format!("extender {} has negative weight {}", self.url_prefix, self.weight),
                "Use weight 0 to disable prioritization or a positive weight",
            ));
        }
        Ok(())
    }
}

impl Policy {
    /// Reject policies that cannot be built into a scheduler. Predicate and
    /// priority names are checked later against the registry.
    pub fn validate(&self) -> Result<()> {
        for priority in self.priorities.iter().flatten() {
            if priority.weight <= 0 {
                return Err(SchedulerError::invalid_policy(
                    format!(
                        "priority {} has non-positive weight {}",
                        priority.name, priority.weight
                    ),
                    "Priority weights must be positive; remove the entry to disable it",
                ));
            }
        }

        for extender in &self.extenders {
            extender.validate()?;
        }

        Ok(())
    }
}
