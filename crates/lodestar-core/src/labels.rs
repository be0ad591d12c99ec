//! Label and selector matching for node selectors, node affinity and pod affinity terms

use k8s_openapi::api::core::v1::{NodeSelectorRequirement, NodeSelectorTerm};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use std::collections::BTreeMap;

pub type Labels = BTreeMap<String, String>;

fn values_contain(values: &Option<Vec<String>>, value: &str) -> bool {
    values.iter().flatten().any(|v| v == value)
}

fn requirement_matches(
    key: &str,
    operator: &str,
    values: &Option<Vec<String>>,
    labels: Option<&Labels>,
) -> bool {
    let actual = labels.and_then(|l| l.get(key));
    match operator {
        "In" => actual.is_some_and(|v| values_contain(values, v)),
        "NotIn" => !actual.is_some_and(|v| values_contain(values, v)),
        "Exists" => actual.is_some(),
        "DoesNotExist" => actual.is_none(),
        "Gt" | "Lt" => {
            // Exactly one integer value is allowed
            let (Some(actual), Some([bound])) = (actual, values.as_deref()) else {
                return false;
            };
            match (actual.parse::<i64>(), bound.parse::<i64>()) {
                (Ok(a), Ok(b)) if operator == "Gt" => a > b,
                (Ok(a), Ok(b)) => a < b,
                _ => false,
            }
        }
        _ => false,
    }
}

/// Match a single node selector requirement against node labels
pub fn node_selector_requirement_matches(
    req: &NodeSelectorRequirement,
    labels: Option<&Labels>,
) -> bool {
    requirement_matches(&req.key, &req.operator, &req.values, labels)
}

/// A term matches when all of its label expressions match. A term with no
/// expressions matches nothing.
pub fn node_selector_term_matches(term: &NodeSelectorTerm, labels: Option<&Labels>) -> bool {
    match term.match_expressions.as_deref() {
        None | Some([]) => false,
        Some(exprs) => exprs
            .iter()
            .all(|req| node_selector_requirement_matches(req, labels)),
    }
}

/// Terms are ORed together
pub fn node_selector_terms_match(terms: &[NodeSelectorTerm], labels: Option<&Labels>) -> bool {
    terms
        .iter()
        .any(|term| node_selector_term_matches(term, labels))
}

fn label_requirement_matches(req: &LabelSelectorRequirement, labels: Option<&Labels>) -> bool {
    requirement_matches(&req.key, &req.operator, &req.values, labels)
}

/// Match a metav1 label selector. An empty selector matches everything.
pub fn label_selector_matches(selector: &LabelSelector, labels: Option<&Labels>) -> bool {
    let labels_ok = selector
        .match_labels
        .iter()
        .flatten()
        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v));

    labels_ok
        && selector
            .match_expressions
            .iter()
            .flatten()
            .all(|req| label_requirement_matches(req, labels))
}

/// Every key/value of `selector` is present in `labels`
pub fn labels_match_map(selector: &Labels, labels: Option<&Labels>) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}
