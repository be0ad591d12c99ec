use lodestar_core::{from_json, from_yaml, Node, Pod};
use lodestar_scheduler::Policy;
use miette::{IntoDiagnostic, WrapErr};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Nodes and pods read from a file, for offline scheduling
#[derive(Debug, Default, Deserialize)]
pub struct ClusterSnapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub pods: Vec<Pod>,
}

/// Parse YAML or JSON, chosen by file extension. Anything that is not
/// `.json` is read as YAML, which also accepts JSON documents.
fn parse_file<T: for<'de> Deserialize<'de>>(path: &Path) -> miette::Result<T> {
    let data = std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to read {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let parsed = if is_json {
        from_json(&data)
    } else {
        from_yaml(&data)
    };

    parsed.wrap_err_with(|| format!("Failed to parse {}", path.display()))
}

/// Load and validate a scheduling policy. Without a file the default policy
/// (registry defaults, no extenders) is used.
pub fn load_policy(path: Option<&Path>) -> miette::Result<Policy> {
    let policy = match path {
        Some(path) => {
            let policy: Policy = parse_file(path)?;
            info!(
                "Loaded policy from {} ({} extenders)",
                path.display(),
                policy.extenders.len()
            );
            policy
        }
        None => Policy::default(),
    };

    policy.validate()?;
    Ok(policy)
}

pub fn load_snapshot(path: &Path) -> miette::Result<ClusterSnapshot> {
    let snapshot: ClusterSnapshot = parse_file(path)?;
    info!(
        "Loaded snapshot from {} ({} nodes, {} pods)",
        path.display(),
        snapshot.nodes.len(),
        snapshot.pods.len()
    );
    Ok(snapshot)
}
