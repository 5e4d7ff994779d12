//! End-to-end reconciliation scenarios, run against the in-memory fakes
//! in `common/mod.rs`.
//!
//! Scenario 4 (zone resolution picks the longest matching suffix) and
//! scenario 6 (flannel annotation IP fallback) are exercised directly by
//! `src/dns_provider.rs`'s and `src/node_source.rs`'s own unit tests
//! (`extract_node_falls_back_to_flannel_annotation_without_external_ip_address`)
//! instead of here: both require fixtures (a raw zone cache, a raw
//! `k8s_openapi` node) that sit below the level this fake-backed harness
//! models.

mod common;

use std::sync::Arc;

use common::{deletion_taints, intent, node, taint, FakeDnsProvider, FakeIntentSource, FakeNodeSource};
use node_dns_controller::model::{EventKind, NodeEventKind};
use node_dns_controller::node_source::NodeEvent;
use node_dns_controller::Reconciler;

fn build(
    nodes: Vec<node_dns_controller::model::Node>,
    intents: Vec<node_dns_controller::model::Intent>,
) -> (Arc<Reconciler>, Arc<FakeNodeSource>, Arc<FakeDnsProvider>) {
    let node_source = Arc::new(FakeNodeSource::new(nodes));
    let dns_provider = Arc::new(FakeDnsProvider::new());
    let intent_source = Arc::new(FakeIntentSource::new(intents));
    let reconciler = Arc::new(Reconciler::new(
        node_source.clone(),
        dns_provider.clone(),
        intent_source,
        deletion_taints(),
    ));
    (reconciler, node_source, dns_provider)
}

/// Scenario 1: fresh cluster, two healthy nodes, one intent.
#[tokio::test]
async fn scenario_1_fresh_cluster_two_healthy_nodes() {
    let (reconciler, _nodes, dns) = build(
        vec![node("n1", Some("10.0.0.1"), vec![]), node("n2", Some("10.0.0.2"), vec![])],
        vec![intent("api.example.com", 120, false)],
    );

    let report = reconciler.full_reconcile().await;

    assert_eq!(report.records_created, 2);
    assert_eq!(report.records_deleted, 0);
    assert!(report.errors.is_empty());
    assert_eq!(dns.record_count("api.example.com"), 2);
}

/// Scenario 2: a node becomes departing mid-life; the event path withdraws
/// its records immediately, and the following sweep is a no-op for it.
#[tokio::test]
async fn scenario_2_node_becomes_departing_mid_life() {
    let (reconciler, nodes, dns) = build(
        vec![node("n1", Some("10.0.0.1"), vec![])],
        vec![intent("api.example.com", 120, false)],
    );
    reconciler.full_reconcile().await;
    assert_eq!(dns.record_count("api.example.com"), 1);

    let dt = deletion_taints();
    let departing = node("n1", Some("10.0.0.1"), vec![taint(&dt[0]), taint(&dt[1])]);
    nodes.set_nodes(vec![departing.clone()]);
    reconciler
        .on_node_event(NodeEvent { kind: NodeEventKind::Modified, node: departing })
        .await;

    assert_eq!(dns.record_count("api.example.com"), 0);

    let follow_up = reconciler.full_reconcile().await;
    assert_eq!(follow_up.records_created, 0);
    assert_eq!(follow_up.records_deleted, 0);

    let events = reconciler.recent_events(10);
    assert!(events.iter().any(|e| matches!(e.kind, EventKind::NodeBecameDeparting) && e.success));
}

/// Scenario 3: only one of the two configured deletion taints is present;
/// the node stays Advertisable and no withdrawal happens.
#[tokio::test]
async fn scenario_3_partial_deletion_taints_do_not_withdraw() {
    let (reconciler, nodes, dns) = build(
        vec![node("n1", Some("10.0.0.1"), vec![])],
        vec![intent("api.example.com", 120, false)],
    );
    reconciler.full_reconcile().await;

    let dt = deletion_taints();
    let partially_tainted = node("n1", Some("10.0.0.1"), vec![taint(&dt[0])]);
    nodes.set_nodes(vec![partially_tainted]);

    let second = reconciler.full_reconcile().await;
    assert_eq!(second.records_deleted, 0, "partial taint set must not withdraw the record");
    assert_eq!(dns.record_count("api.example.com"), 1);
}

/// Scenario 5: a permanent delete failure on one Intent must not abort the
/// others. The node disappearing from cluster truth makes its IP invalid
/// for both hostnames; `broken.example.com`'s deletes are rigged to fail,
/// `ok.example.com`'s must still converge.
#[tokio::test]
async fn scenario_5_provider_delete_failure_is_non_fatal_per_intent() {
    let (reconciler, nodes, dns) = build(
        vec![node("n1", Some("10.0.0.1"), vec![])],
        vec![intent("broken.example.com", 120, false), intent("ok.example.com", 120, false)],
    );
    reconciler.full_reconcile().await;
    assert_eq!(dns.record_count("broken.example.com"), 1);
    assert_eq!(dns.record_count("ok.example.com"), 1);

    dns.fail_deletes_for("broken.example.com");
    nodes.set_nodes(vec![]);

    let report = reconciler.full_reconcile().await;

    assert!(report.errors.iter().any(|e| e.contains("broken.example.com")));
    assert_eq!(dns.record_count("broken.example.com"), 1, "failed delete leaves the stale record in place");
    assert_eq!(dns.record_count("ok.example.com"), 0, "ok.example.com should still converge");
}

/// Idempotence: running `full_reconcile` twice with unchanged cluster state
/// produces zero creations and zero deletions on the second run.
#[tokio::test]
async fn repeated_reconcile_with_unchanged_state_is_a_no_op() {
    let (reconciler, _nodes, _dns) = build(
        vec![node("n1", Some("10.0.0.1"), vec![]), node("n2", Some("10.0.0.2"), vec![])],
        vec![intent("api.example.com", 300, false)],
    );
    let first = reconciler.full_reconcile().await;
    assert_eq!(first.records_created, 2);

    let second = reconciler.full_reconcile().await;
    assert_eq!(second.records_created, 0);
    assert_eq!(second.records_deleted, 0);
}

/// A node with no external IP at all produces a warning event on the
/// event-driven path and never reaches the DNS provider.
#[tokio::test]
async fn node_without_external_ip_emits_failure_event_and_skips_provider_calls() {
    let (reconciler, _nodes, dns) = build(vec![], vec![intent("api.example.com", 300, false)]);

    let no_ip = node("n1", None, vec![]);
    reconciler
        .on_node_event(NodeEvent { kind: NodeEventKind::Added, node: no_ip })
        .await;

    assert_eq!(dns.record_count("api.example.com"), 0);
    let events = reconciler.recent_events(10);
    assert!(events.iter().any(|e| matches!(e.kind, EventKind::NodeEventFailed) && !e.success));
}
