use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde_json::json;
use tagsched::definition::{JobCatalog, JobDefinition};
use tagsched::scheduler::{JobAssigner, JobLedger, SharedLedger};
use tagsched::SchedulerError;

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

fn ledger(definitions: serde_json::Value) -> JobLedger {
    let definitions: Vec<JobDefinition> = serde_json::from_value(definitions).unwrap();
    let (catalog, rejected) = JobCatalog::from_definitions(definitions);
    assert!(rejected.is_empty(), "unexpected rejections: {:?}", rejected);
    JobLedger::new(catalog)
}

fn nodes(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

fn assigner(ids: &[&str]) -> JobAssigner {
    let mut assigner = JobAssigner::new(60_000);
    for id in ids {
        assigner.register_node(id);
    }
    assigner
}

// =============================================================================
// Ledger
// =============================================================================

#[test]
fn test_entry_created_lazily() {
    let mut ledger = ledger(json!([{"name": "backup", "tags": ["ops"]}]));
    assert!(ledger.is_empty());

    let entry = ledger.get_or_create_entry("backup").unwrap();
    assert_eq!(entry.name(), "backup");
    assert!(entry.has_tag("ops"));
    assert!(!entry.is_running());
    assert_eq!(ledger.len(), 1);

    // Same entry on the second call.
    ledger.add_node("backup", "node1").unwrap();
    assert!(ledger.get_or_create_entry("backup").unwrap().is_running());
    assert_eq!(ledger.len(), 1);
}

#[test]
fn test_unknown_job() {
    let mut ledger = ledger(json!([{"name": "backup"}]));

    let err = ledger.get_or_create_entry("restore").unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownJob(name) if name == "restore"));
    assert!(matches!(
        ledger.add_node("restore", "node1"),
        Err(SchedulerError::UnknownJob(_))
    ));
    assert!(matches!(
        ledger.drop_node("restore", "node1"),
        Err(SchedulerError::UnknownJob(_))
    ));
    assert!(ledger.is_empty());
}

#[test]
fn test_drop_node_not_present_leaves_ledger_intact() {
    let mut ledger = ledger(json!([
        {"name": "a", "tags": ["x"]},
        {"name": "b", "tags": ["x"]}
    ]));
    ledger.add_node("a", "node1").unwrap();
    ledger.add_node("b", "node2").unwrap();

    let err = ledger.drop_node("a", "node2").unwrap_err();
    assert!(matches!(err, SchedulerError::NodeNotRunning { .. }));

    assert_eq!(ledger.entry("a").unwrap().nodes(), ["node1".to_string()]);
    assert_eq!(ledger.entry("b").unwrap().nodes(), ["node2".to_string()]);
    assert_eq!(ledger.running_entries().len(), 2);
}

#[test]
fn test_add_same_node_twice_is_rejected() {
    let mut ledger = ledger(json!([{"name": "a"}]));
    ledger.add_node("a", "node1").unwrap();
    assert!(matches!(
        ledger.add_node("a", "node1"),
        Err(SchedulerError::NodeAlreadyRunning { .. })
    ));
    assert_eq!(ledger.load_of("node1"), 1);
}

#[test]
fn test_rules_gathered_from_all_definitions() {
    let ledger = ledger(json!([
        {"name": "a", "rules": [{"limit": {"tag": "x", "quota": 1}}]},
        {"name": "b", "rules": [{"limit": {"tag": "x", "quota": 1}}, {"availability": {"instances": 2}}]}
    ]));
    // Identical rules are kept side by side.
    assert_eq!(ledger.rules().len(), 3);
}

#[test]
fn test_evaluate_admission_quota() {
    let mut ledger = ledger(json!([
        {"name": "etl-1", "tags": ["etl"], "rules": [{"limit": {"tag": "etl", "quota": 1}}]},
        {"name": "etl-2", "tags": ["etl"]}
    ]));
    let cluster = nodes(&["node1", "node2"]);

    let admission = ledger.evaluate_admission("etl-2", &cluster).unwrap();
    assert!(admission.admitted);
    assert_eq!(admission.candidates, cluster);

    ledger.add_node("etl-1", "node1").unwrap();
    let admission = ledger.evaluate_admission("etl-2", &cluster).unwrap();
    assert!(!admission.admitted);
    assert!(admission.candidates.is_empty());

    ledger.drop_node("etl-1", "node1").unwrap();
    assert!(ledger.evaluate_admission("etl-2", &cluster).unwrap().admitted);
}

#[test]
fn test_evaluate_admission_intersects_placement_rules() {
    let mut ledger = ledger(json!([
        {"name": "osd", "tags": ["storage"]},
        {"name": "mon", "tags": ["control"]},
        {"name": "mds", "tags": ["ceph"], "rules": [
            {"limit": {"tag": "ceph", "avoid": ["storage", "control"]}}
        ]}
    ]));
    ledger.add_node("osd", "node1").unwrap();
    ledger.add_node("mon", "node2").unwrap();

    let admission = ledger
        .evaluate_admission("mds", &nodes(&["node1", "node2", "node3"]))
        .unwrap();
    assert!(admission.admitted);
    assert_eq!(admission.candidates, nodes(&["node3"]));
}

#[test]
fn test_replication_target_in_ledger() {
    let mut ledger = ledger(json!([
        {"name": "dev-publisher", "tags": ["dev-publisher"], "type": "service",
         "rules": [{"availability": {"instances": 2}}]},
        {"name": "stb-publisher", "tags": ["stb-publisher"]}
    ]));
    ledger.add_node("dev-publisher", "node1").unwrap();
    ledger.add_node("stb-publisher", "node2").unwrap();
    ledger.add_node("stb-publisher", "node1").unwrap();

    assert!(!ledger.is_satisfied("dev-publisher"));
    let admission = ledger
        .evaluate_admission("dev-publisher", &nodes(&["node1", "node2"]))
        .unwrap();
    assert_eq!(admission.candidates, nodes(&["node2"]));

    ledger.add_node("dev-publisher", "node2").unwrap();
    assert!(ledger.is_satisfied("dev-publisher"));
    assert!(!ledger
        .evaluate_admission("dev-publisher", &nodes(&["node1", "node2", "node3"]))
        .unwrap()
        .admitted);
}

#[test]
fn test_finished_oneshot_is_retired() {
    let mut ledger = ledger(json!([
        {"name": "migrate", "schedule": {"oneshot": {"at": "2020-01-01 00:00"}}}
    ]));
    let assigner = assigner(&["node1"]);
    let now = at(2020, 1, 1, 0, 0);

    let placements = assigner.plan(&mut ledger, now);
    assert_eq!(placements.len(), 1);

    ledger.drop_node("migrate", "node1").unwrap();
    assert!(assigner.plan(&mut ledger, now + TimeDelta::minutes(1)).is_empty());
    assert!(ledger.entry("migrate").is_none());
    assert!(ledger.is_retired("migrate"));
    assert!(ledger.schedulable_jobs().is_empty());

    // A late start report does not bring the one-shot back to life.
    ledger.add_node("migrate", "node1").unwrap();
    ledger.drop_node("migrate", "node1").unwrap();
    assert!(ledger.entry("migrate").is_none());
    assert!(assigner.plan(&mut ledger, now + TimeDelta::minutes(2)).is_empty());
}

// =============================================================================
// Assigner
// =============================================================================

#[test]
fn test_no_nodes_available() {
    let mut ledger = ledger(json!([{"name": "tick"}]));
    let assigner = JobAssigner::new(5000);

    assert!(assigner.plan(&mut ledger, at(2020, 1, 1, 0, 0)).is_empty());
    // The deadline is held, not lost.
    assert!(ledger.entry("tick").unwrap().next_deadline().is_some());
}

#[test]
fn test_node_heartbeat() {
    let mut assigner = JobAssigner::new(100); // 100ms timeout

    assigner.register_node("node1");
    assert_eq!(assigner.live_nodes().len(), 1);

    assigner.node_heartbeat("node1");
    assigner.node_heartbeat("node2"); // auto-registers
    assert_eq!(assigner.live_nodes(), nodes(&["node1", "node2"]));

    std::thread::sleep(std::time::Duration::from_millis(150));
    assert!(assigner.live_nodes().is_empty());
    assert_eq!(assigner.check_dead_nodes(), nodes(&["node1", "node2"]));
}

#[test]
fn test_batch_job_placed_once_per_deadline() {
    let mut ledger = ledger(json!([
        {"name": "report", "schedule": {"periodic": {"minute": [0, 30]}}}
    ]));
    let assigner = assigner(&["node1", "node2"]);

    let placements = assigner.plan(&mut ledger, at(2020, 1, 1, 10, 0));
    assert_eq!(placements.len(), 1);
    assert_eq!(placements[0].job, "report");
    assert_eq!(placements[0].node, "node1");
    assert_eq!(placements[0].run_at, at(2020, 1, 1, 10, 0));

    // Same minute: nothing new.
    assert!(assigner.plan(&mut ledger, at(2020, 1, 1, 10, 0)).is_empty());
    // Not yet due.
    assert!(assigner.plan(&mut ledger, at(2020, 1, 1, 10, 15)).is_empty());

    let placements = assigner.plan(&mut ledger, at(2020, 1, 1, 10, 30));
    assert_eq!(placements.len(), 1);
    // node1 already hosts an instance.
    assert_eq!(placements[0].node, "node2");
}

#[test]
fn test_held_batch_job_runs_when_quota_frees() {
    let mut ledger = ledger(json!([
        {"name": "etl", "tags": ["etl"], "rules": [{"limit": {"quota": 1}}],
         "schedule": {"periodic": {"minute": "/5"}}}
    ]));
    let assigner = assigner(&["node1"]);

    assert_eq!(assigner.plan(&mut ledger, at(2020, 1, 1, 0, 0)).len(), 1);

    // Next deadline arrives while the first run is still going.
    assert!(assigner.plan(&mut ledger, at(2020, 1, 1, 0, 5)).is_empty());
    assert!(assigner.plan(&mut ledger, at(2020, 1, 1, 0, 6)).is_empty());

    ledger.drop_node("etl", "node1").unwrap();
    let placements = assigner.plan(&mut ledger, at(2020, 1, 1, 0, 7));
    assert_eq!(placements.len(), 1);
    assert_eq!(placements[0].run_at, at(2020, 1, 1, 0, 5));
}

#[test]
fn test_service_replicated_to_target() {
    let mut ledger = ledger(json!([
        {"name": "publisher", "type": "service", "tags": ["publisher"],
         "rules": [{"availability": {"instances": 2}}]}
    ]));
    let assigner = assigner(&["node1", "node2", "node3"]);
    let now = at(2020, 1, 1, 0, 0);

    let placements = assigner.plan(&mut ledger, now);
    let placed: Vec<&str> = placements.iter().map(|p| p.node.as_str()).collect();
    assert_eq!(placed, vec!["node1", "node2"]);
    assert!(ledger.is_satisfied("publisher"));

    // Satisfied: later ticks do nothing.
    assert!(assigner.plan(&mut ledger, now + TimeDelta::minutes(1)).is_empty());

    // Lose one instance; it is replaced on a node not already hosting one.
    ledger.drop_node("publisher", "node1").unwrap();
    let placements = assigner.plan(&mut ledger, now + TimeDelta::minutes(2));
    assert_eq!(placements.len(), 1);
    assert_eq!(placements[0].node, "node1");
    assert_eq!(ledger.entry("publisher").unwrap().nodes().len(), 2);
}

#[test]
fn test_service_without_rules_runs_single_instance() {
    let mut ledger = ledger(json!([{"name": "api", "type": "service"}]));
    let assigner = assigner(&["node1", "node2"]);

    assert_eq!(assigner.plan(&mut ledger, at(2020, 1, 1, 0, 0)).len(), 1);
    assert!(assigner.plan(&mut ledger, at(2020, 1, 1, 0, 1)).is_empty());
}

#[test]
fn test_exclusion_steers_placement() {
    let mut ledger = ledger(json!([
        {"name": "osd", "tags": ["storage"], "type": "service"},
        {"name": "mds", "tags": ["ceph"], "type": "service",
         "rules": [{"limit": {"avoid": "storage", "tag": "ceph"}}]}
    ]));
    ledger.add_node("osd", "node1").unwrap();
    let assigner = assigner(&["node1", "node2"]);

    let placements = assigner.plan(&mut ledger, at(2020, 1, 1, 0, 0));
    assert_eq!(placements.len(), 1);
    assert_eq!(placements[0].job, "mds");
    assert_eq!(placements[0].node, "node2");
}

#[test]
fn test_least_loaded_node_preferred() {
    let mut ledger = ledger(json!([
        {"name": "a", "type": "service"},
        {"name": "b", "type": "service"},
        {"name": "c", "type": "service"}
    ]));
    let assigner = assigner(&["node1", "node2"]);

    let placements = assigner.plan(&mut ledger, at(2020, 1, 1, 0, 0));
    let placed: Vec<(&str, &str)> = placements
        .iter()
        .map(|p| (p.job.as_str(), p.node.as_str()))
        .collect();
    assert_eq!(placed, vec![("a", "node1"), ("b", "node2"), ("c", "node1")]);
}

#[test]
fn test_node_already_hosting_job_is_skipped() {
    let mut ledger = ledger(json!([
        {"name": "backup"},
        {"name": "x1", "schedule": {"oneshot": {"at": "2030-01-01 00:00"}}},
        {"name": "x2", "schedule": {"oneshot": {"at": "2030-01-01 00:00"}}}
    ]));
    ledger.add_node("backup", "a").unwrap();
    ledger.add_node("x1", "b").unwrap();
    ledger.add_node("x2", "b").unwrap();

    // "a" is less loaded but already runs backup.
    let admission = ledger.evaluate_admission("backup", &nodes(&["a", "b"])).unwrap();
    assert_eq!(admission.candidates, nodes(&["b"]));

    let placements = assigner(&["a", "b"]).plan(&mut ledger, at(2024, 1, 1, 10, 1));
    assert_eq!(placements.len(), 1);
    assert_eq!(placements[0].job, "backup");
    assert_eq!(placements[0].node, "b");
}

#[test]
fn test_batch_held_while_running_everywhere() {
    let mut ledger = ledger(json!([{"name": "sweep"}]));
    let assigner = assigner(&["node1"]);

    assert_eq!(assigner.plan(&mut ledger, at(2024, 1, 1, 0, 0)).len(), 1);
    assert!(assigner.plan(&mut ledger, at(2024, 1, 1, 0, 1)).is_empty());

    ledger.drop_node("sweep", "node1").unwrap();
    assert_eq!(assigner.plan(&mut ledger, at(2024, 1, 1, 0, 2)).len(), 1);
}

#[test]
fn test_missed_oneshot_cancelled() {
    let mut ledger = ledger(json!([
        {"name": "launch", "schedule": {"oneshot": {"at": "2020-01-01T00:00:00Z", "cancel_if_missed": true}}}
    ]));
    let assigner = assigner(&["node1"]);

    assert!(assigner.plan(&mut ledger, at(2020, 1, 2, 0, 0)).is_empty());
    assert!(ledger.is_retired("launch"));
}

// =============================================================================
// Exclusive section
// =============================================================================

#[tokio::test]
async fn test_concurrent_admissions_respect_quota() {
    let shared = SharedLedger::new(ledger(json!([
        {"name": "job-a", "tags": ["db"], "rules": [{"limit": {"tag": "db", "quota": 1}}]},
        {"name": "job-b", "tags": ["db"]}
    ])));
    let cluster = nodes(&["node1", "node2"]);

    let mut handles = Vec::new();
    for (job, node) in [("job-a", "node1"), ("job-b", "node2")] {
        let shared = shared.clone();
        let cluster = cluster.clone();
        handles.push(tokio::spawn(async move {
            tokio::task::yield_now().await;
            shared
                .exclusive(|ledger| {
                    let admission = ledger.evaluate_admission(job, &cluster)?;
                    if admission.admitted {
                        ledger.add_node(job, node)?;
                    }
                    Ok::<bool, SchedulerError>(admission.admitted)
                })
                .await
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);

    let running = shared.exclusive(|ledger| ledger.running_entries().len()).await;
    assert_eq!(running, 1);
}
