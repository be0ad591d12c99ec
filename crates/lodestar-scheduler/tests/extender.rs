use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use k8s_openapi::api::core::v1::{Node, NodeStatus, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use lodestar_core::{node_info_map, NodeInfo, NodeInfoMap};
use lodestar_scheduler::{
    AlgorithmRegistry, ExtenderArgs, ExtenderConfig, ExtenderFilterResult, FailedNodesMap,
    FitPredicate, FitResult, GenericScheduler, HostPriority, NodeList, Policy, PredicateMetadata,
    PredicatePolicy, ScheduleOutcome, SchedulerError, TieBreak,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Extender served over HTTP: keeps `allow`, scores `favorite` 10 and the rest 1
#[derive(Clone)]
struct FakeExtender {
    name: &'static str,
    allow: Vec<&'static str>,
    favorite: &'static str,
    /// Multiplier applied inside the extender before responding
    internal_weight: i64,
    node_cache_capable: bool,
    /// Raw request bodies, by verb
    requests: Arc<Mutex<Vec<(String, Value)>>>,
}

impl FakeExtender {
    fn new(name: &'static str, allow: Vec<&'static str>, favorite: &'static str) -> Self {
        Self {
            name,
            allow,
            favorite,
            internal_weight: 1,
            node_cache_capable: false,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn requested_names(&self, args: &ExtenderArgs) -> Vec<String> {
        if self.node_cache_capable {
            args.node_names.clone().unwrap_or_default()
        } else {
            args.nodes
                .as_ref()
                .map(|l| {
                    l.items
                        .iter()
                        .map(|n| n.metadata.name.clone().unwrap_or_default())
                        .collect()
                })
                .unwrap_or_default()
        }
    }

    /// Node names the extender saw in filter requests
    fn filtered_names(&self) -> Vec<Vec<String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(verb, _)| verb == "filter")
            .map(|(_, body)| {
                let args: ExtenderArgs = serde_json::from_value(body.clone()).unwrap();
                self.requested_names(&args)
            })
            .collect()
    }
}

async fn handle_filter(
    State(ext): State<FakeExtender>,
    Json(body): Json<Value>,
) -> Json<ExtenderFilterResult> {
    ext.requests
        .lock()
        .unwrap()
        .push(("filter".to_string(), body.clone()));
    let args: ExtenderArgs = serde_json::from_value(body).unwrap();

    let mut failed = FailedNodesMap::new();
    let mut kept = Vec::new();
    for name in ext.requested_names(&args) {
        if ext.allow.contains(&name.as_str()) {
            kept.push(name);
        } else {
            failed.insert(name, format!("extender failed: {}", ext.name));
        }
    }

    let mut result = ExtenderFilterResult {
        failed_nodes: Some(failed),
        ..Default::default()
    };
    if ext.node_cache_capable {
        result.node_names = Some(kept);
    } else {
        let items = args
            .nodes
            .unwrap_or_default()
            .items
            .into_iter()
            .filter(|n| kept.contains(n.metadata.name.as_ref().unwrap()))
            .collect();
        result.nodes = Some(NodeList { items });
    }
    Json(result)
}

async fn handle_prioritize(
    State(ext): State<FakeExtender>,
    Json(body): Json<Value>,
) -> Json<Vec<HostPriority>> {
    ext.requests
        .lock()
        .unwrap()
        .push(("prioritize".to_string(), body.clone()));
    let args: ExtenderArgs = serde_json::from_value(body).unwrap();

    let scores = ext
        .requested_names(&args)
        .into_iter()
        .map(|name| {
            let score = if name == ext.favorite { 10 } else { 1 };
            HostPriority::new(name, score * ext.internal_weight)
        })
        .collect();
    Json(scores)
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn start(ext: &FakeExtender) -> String {
    let router = Router::new()
        .route("/filter", post(handle_filter))
        .route("/prioritize", post(handle_prioritize))
        .with_state(ext.clone());
    serve(router).await
}

fn machine(name: &str) -> Node {
    let mut capacity = BTreeMap::new();
    capacity.insert("cpu".to_string(), Quantity("4".to_string()));
    capacity.insert("memory".to_string(), Quantity("8Gi".to_string()));
    capacity.insert("pods".to_string(), Quantity("32".to_string()));

    let mut node = Node::default();
    node.metadata.name = Some(name.to_string());
    node.status = Some(NodeStatus {
        capacity: Some(capacity),
        ..Default::default()
    });
    node
}

fn machines() -> (Vec<Node>, NodeInfoMap) {
    let nodes: Vec<Node> = (1..=5).map(|i| machine(&format!("machine{}", i))).collect();
    let infos = node_info_map(&nodes, &[]);
    (nodes, infos)
}

fn test_pod() -> Pod {
    let mut pod = Pod::default();
    pod.metadata.name = Some("extender-test-pod".to_string());
    pod.spec = Some(Default::default());
    pod
}

/// Internal predicate admitting a fixed set of nodes
struct AllowNodes(&'static str, Vec<&'static str>);

impl FitPredicate for AllowNodes {
    fn predicate(
        &self,
        _pod: &Pod,
        _meta: &PredicateMetadata,
        info: &NodeInfo,
    ) -> lodestar_scheduler::Result<FitResult> {
        if self.1.contains(&info.node_name()) {
            Ok(FitResult::fit())
        } else {
            Ok(FitResult {
                fits: false,
                reasons: vec![],
            })
        }
    }

    fn name(&self) -> &str {
        self.0
    }
}

/// Policy with no internal predicates or priorities
fn extenders_only(extenders: Vec<ExtenderConfig>) -> Policy {
    Policy {
        predicates: Some(vec![]),
        priorities: Some(vec![]),
        extenders,
    }
}

fn build(policy: &Policy, registry: &AlgorithmRegistry) -> GenericScheduler {
    GenericScheduler::from_policy(policy, registry)
        .unwrap()
        .with_tie_break(TieBreak::Lexicographic)
}

#[tokio::test]
async fn test_two_extenders_weighted_winner() {
    let first = FakeExtender::new("first", vec!["machine2", "machine3", "machine5"], "machine3");
    let second = FakeExtender::new("second", vec!["machine1", "machine2", "machine3"], "machine2");

    let mut registry = AlgorithmRegistry::empty();
    registry.register_fit_predicate(Arc::new(AllowNodes(
        "Machine123",
        vec!["machine1", "machine2", "machine3"],
    )));
    let policy = Policy {
        predicates: Some(vec![PredicatePolicy {
            name: "Machine123".to_string(),
        }]),
        priorities: Some(vec![]),
        extenders: vec![
            ExtenderConfig::new(start(&first).await)
                .with_filter("filter")
                .with_prioritize("prioritize", 1),
            ExtenderConfig::new(start(&second).await)
                .with_filter("filter")
                .with_prioritize("prioritize", 5),
        ],
    };

    let (nodes, infos) = machines();
    let outcome = build(&policy, &registry)
        .schedule(&test_pod(), &nodes, &infos, &CancellationToken::new())
        .await
        .unwrap();

    // machine2: 1*1 + 10*5, machine3: 10*1 + 1*5
    assert_eq!(
        outcome,
        ScheduleOutcome::Scheduled {
            node_name: "machine2".to_string(),
            score: 51
        }
    );
    assert_eq!(first.filtered_names(), vec![vec!["machine1", "machine2", "machine3"]]);
    // machine1 was dropped by the first extender
    assert_eq!(second.filtered_names(), vec![vec!["machine2", "machine3"]]);
}

#[tokio::test]
async fn test_three_extenders_with_name_only_mode() {
    let first = FakeExtender::new("first", vec!["machine1", "machine2", "machine3"], "machine2");
    let second = FakeExtender::new("second", vec!["machine2", "machine3", "machine5"], "machine3");
    let mut third = FakeExtender::new("third", vec!["machine1", "machine2", "machine3"], "machine2");
    third.internal_weight = 5;
    third.node_cache_capable = true;

    let policy = extenders_only(vec![
        ExtenderConfig::new(start(&first).await)
            .with_filter("filter")
            .with_prioritize("prioritize", 3),
        ExtenderConfig::new(start(&second).await)
            .with_filter("filter")
            .with_prioritize("prioritize", 4),
        ExtenderConfig::new(start(&third).await)
            .with_filter("filter")
            .with_prioritize("prioritize", 10)
            .with_node_cache(true),
    ]);

    let (nodes, infos) = machines();
    let outcome = build(&policy, &AlgorithmRegistry::new())
        .schedule(&test_pod(), &nodes, &infos, &CancellationToken::new())
        .await
        .unwrap();

    // machine2: 10*3 + 1*4 + 50*10, machine3: 1*3 + 10*4 + 5*10
    assert_eq!(
        outcome,
        ScheduleOutcome::Scheduled {
            node_name: "machine2".to_string(),
            score: 534
        }
    );

    for (verb, body) in third.requests.lock().unwrap().iter() {
        assert!(body.get("nodes").is_none(), "{} request carried node objects", verb);
        assert_eq!(body["nodenames"], serde_json::json!(["machine2", "machine3"]));
    }
    for (_, body) in first.requests.lock().unwrap().iter() {
        assert!(body.get("nodenames").is_none());
    }
}

#[tokio::test]
async fn test_default_priorities_do_not_change_the_winner() {
    let first = FakeExtender::new("first", vec!["machine1", "machine2", "machine3"], "machine2");
    let policy = Policy {
        extenders: vec![ExtenderConfig::new(start(&first).await)
            .with_filter("filter")
            .with_prioritize("prioritize", 3)],
        ..Default::default()
    };

    let (nodes, infos) = machines();
    let outcome = build(&policy, &AlgorithmRegistry::new())
        .schedule(&test_pod(), &nodes, &infos, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.node_name(), Some("machine2"));
}

#[tokio::test]
async fn test_extenders_reject_everything() {
    let first = FakeExtender::new("first", vec!["machine4"], "machine4");
    let second = FakeExtender::new("second", vec!["machine1"], "machine1");
    let policy = extenders_only(vec![
        ExtenderConfig::new(start(&first).await).with_filter("filter"),
        ExtenderConfig::new(start(&second).await).with_filter("filter"),
    ]);

    let (nodes, infos) = machines();
    let outcome = build(&policy, &AlgorithmRegistry::new())
        .schedule(&test_pod(), &nodes, &infos, &CancellationToken::new())
        .await
        .unwrap();

    let ScheduleOutcome::Unschedulable(error) = outcome else {
        panic!("expected unschedulable outcome");
    };
    assert_eq!(error.failed_nodes.len(), 5);
    assert_eq!(error.failed_nodes["machine1"], "extender failed: first");
    assert_eq!(error.failed_nodes["machine4"], "extender failed: second");
    assert_eq!(
        error.to_string(),
        "0/5 nodes are available: 4 extender failed: first, 1 extender failed: second."
    );
    // The second extender only heard about the node the first one kept
    assert_eq!(second.filtered_names(), vec![vec!["machine4"]]);
}

#[tokio::test]
async fn test_nodes_dropped_without_reason_are_recorded() {
    let router = Router::new().route(
        "/filter",
        post(|| async { Json(serde_json::json!({"nodes": {"items": []}})) }),
    );
    let url = serve(router).await;
    let policy = extenders_only(vec![ExtenderConfig::new(url.clone()).with_filter("filter")]);

    let (nodes, infos) = machines();
    let outcome = build(&policy, &AlgorithmRegistry::new())
        .schedule(&test_pod(), &nodes, &infos, &CancellationToken::new())
        .await
        .unwrap();

    let ScheduleOutcome::Unschedulable(error) = outcome else {
        panic!("expected unschedulable outcome");
    };
    assert_eq!(error.failed_nodes.len(), 5);
    assert_eq!(
        error.failed_nodes["machine3"],
        format!("rejected by extender {}", url)
    );
}

#[tokio::test]
async fn test_empty_failure_reason_falls_back_to_default() {
    let router = Router::new().route(
        "/filter",
        post(|| async {
            Json(serde_json::json!({
                "nodes": {"items": []},
                "failedNodes": {"machine1": "", "machine2": "disk full"}
            }))
        }),
    );
    let url = serve(router).await;
    let policy = extenders_only(vec![ExtenderConfig::new(url.clone()).with_filter("filter")]);

    let (nodes, infos) = machines();
    let outcome = build(&policy, &AlgorithmRegistry::new())
        .schedule(&test_pod(), &nodes, &infos, &CancellationToken::new())
        .await
        .unwrap();

    let ScheduleOutcome::Unschedulable(error) = outcome else {
        panic!("expected unschedulable outcome");
    };
    let fallback = format!("rejected by extender {}", url);
    assert_eq!(error.failed_nodes["machine1"], fallback);
    assert_eq!(error.failed_nodes["machine2"], "disk full");
    assert!(error.failed_nodes.values().all(|r| !r.trim().is_empty()));
    assert_eq!(
        error.to_string(),
        format!("0/5 nodes are available: 4 {}, 1 disk full.", fallback)
    );
}

fn failing_router(status: StatusCode) -> Router {
    Router::new()
        .route("/filter", post(move || async move { (status, "extender exploded") }))
        .route("/prioritize", post(move || async move { (status, "extender exploded") }))
}

#[tokio::test]
async fn test_filter_failure_aborts_the_attempt() {
    let url = serve(failing_router(StatusCode::INTERNAL_SERVER_ERROR)).await;
    let policy = extenders_only(vec![ExtenderConfig::new(url).with_filter("filter")]);

    let (nodes, infos) = machines();
    let result = build(&policy, &AlgorithmRegistry::new())
        .schedule(&test_pod(), &nodes, &infos, &CancellationToken::new())
        .await;

    match result {
        Err(SchedulerError::ExtenderError { message, .. }) => assert!(message.contains("500")),
        other => panic!("expected extender error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_filter_reported_error_aborts_the_attempt() {
    let router = Router::new().route(
        "/filter",
        post(|| async {
            Json(serde_json::json!({
                "nodes": {"items": []},
                "failedNodes": {},
                "error": "volume backend unavailable"
            }))
        }),
    );
    let policy = extenders_only(vec![ExtenderConfig::new(serve(router).await).with_filter("filter")]);

    let (nodes, infos) = machines();
    let result = build(&policy, &AlgorithmRegistry::new())
        .schedule(&test_pod(), &nodes, &infos, &CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(SchedulerError::ExtenderError { ref message, .. }) if message == "volume backend unavailable"
    ));
}

#[tokio::test]
async fn test_filter_returning_unknown_node_is_rejected() {
    let router = Router::new().route(
        "/filter",
        post(|| async { Json(serde_json::json!({"nodenames": ["machine9"]})) }),
    );
    let policy = extenders_only(vec![ExtenderConfig::new(serve(router).await)
        .with_filter("filter")
        .with_node_cache(true)]);

    let (nodes, infos) = machines();
    let result = build(&policy, &AlgorithmRegistry::new())
        .schedule(&test_pod(), &nodes, &infos, &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(SchedulerError::ExtenderError { .. })));
}

#[tokio::test]
async fn test_prioritize_failure_matches_absent_extender() {
    let scorer = FakeExtender::new("scorer", vec!["machine1", "machine2", "machine3"], "machine3");
    let scorer_url = start(&scorer).await;
    let broken_url = serve(failing_router(StatusCode::INTERNAL_SERVER_ERROR)).await;

    let with_broken = extenders_only(vec![
        ExtenderConfig::new(scorer_url.clone())
            .with_filter("filter")
            .with_prioritize("prioritize", 2),
        ExtenderConfig::new(broken_url).with_prioritize("prioritize", 100),
    ]);
    let without = extenders_only(vec![ExtenderConfig::new(scorer_url)
        .with_filter("filter")
        .with_prioritize("prioritize", 2)]);

    let (nodes, infos) = machines();
    let cancel = CancellationToken::new();
    let registry = AlgorithmRegistry::new();

    let a = build(&with_broken, &registry)
        .schedule(&test_pod(), &nodes, &infos, &cancel)
        .await
        .unwrap();
    let b = build(&without, &registry)
        .schedule(&test_pod(), &nodes, &infos, &cancel)
        .await
        .unwrap();

    assert_eq!(a, b);
    assert_eq!(
        a,
        ScheduleOutcome::Scheduled {
            node_name: "machine3".to_string(),
            score: 20
        }
    );
}

fn slow_router(delay: Duration) -> Router {
    Router::new().route(
        "/filter",
        post(move || async move {
            tokio::time::sleep(delay).await;
            Json(serde_json::json!({"nodes": {"items": []}}))
        }),
    )
}

#[tokio::test]
async fn test_filter_timeout_is_fatal() {
    let url = serve(slow_router(Duration::from_secs(5))).await;
    let policy = extenders_only(vec![ExtenderConfig::new(url)
        .with_filter("filter")
        .with_timeout(Duration::from_millis(200))]);

    let (nodes, infos) = machines();
    let result = build(&policy, &AlgorithmRegistry::new())
        .schedule(&test_pod(), &nodes, &infos, &CancellationToken::new())
        .await;

    match result {
        Err(SchedulerError::ExtenderError { message, .. }) => {
            assert!(message.contains("timed out"), "unexpected message: {}", message)
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_call() {
    let url = serve(slow_router(Duration::from_secs(30))).await;
    let policy = extenders_only(vec![ExtenderConfig::new(url)
        .with_filter("filter")
        .with_timeout(Duration::from_secs(60))]);
    let scheduler = build(&policy, &AlgorithmRegistry::new());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let (nodes, infos) = machines();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        scheduler.schedule(&test_pod(), &nodes, &infos, &cancel),
    )
    .await
    .expect("cancellation should end the attempt promptly");

    assert!(matches!(result, Err(SchedulerError::Cancelled)));
}
