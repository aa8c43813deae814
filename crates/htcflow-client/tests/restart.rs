use htcflow_client::records::read_dag_info;
use htcflow_client::RestartCoordinator;
use htcflow_core::classad::ClassAd;
use htcflow_core::model::JobId;
use htcflow_test_utils::{classad, init_tracing, Call, FakeScheduler, SubmitDirFixture};
use serde_json::json;

fn new_dag_job() -> ClassAd {
    classad(&[
        ("ClusterId", json!(1200)),
        ("ProcId", json!(0)),
        ("GlobalJobId", json!("sched1#1200.0#1722100000")),
        ("bps_run", json!("u_run")),
    ])
}

/// A failed run, ready to be restarted.
fn failed_run() -> SubmitDirFixture {
    let fixture = SubmitDirFixture::new("u_run");
    fixture.dag("JOB a1 a1.sub DIR jobs/label1\nJOB a2 a2.sub DIR jobs/label1\n");
    fixture.rescue(1, "DONE a1\n");
    fixture.dagman_log("");
    fixture.dagman_out("07/27/24 00:40:00 EXITING WITH STATUS 1\n");
    fixture.node_status_ads(2, 1, &[("a1", 5), ("a2", 6)]);
    fixture.submit_description();
    fixture
}

fn restart_path(scheduler: &FakeScheduler, fixture: &SubmitDirFixture) -> htcflow_client::RestartOutcome {
    RestartCoordinator::new(scheduler)
        .restart(&fixture.path().display().to_string())
        .unwrap()
}

#[test]
fn test_restart_resubmits_and_backs_up() {
    init_tracing();
    let fixture = failed_run();
    let scheduler = FakeScheduler::new().with_submitted(vec![new_dag_job()]);

    let outcome = restart_path(&scheduler, &fixture);
    assert_eq!(outcome.run_id.as_deref(), Some("1200.0"));
    assert_eq!(outcome.run_name.as_deref(), Some("u_run"));
    assert!(outcome.message.is_empty());

    assert_eq!(
        scheduler.submissions(),
        vec![fixture.path().join("u_run.dag.condor.sub")]
    );
    let backup = fixture.path().join("backups/001");
    assert!(backup.join("u_run.dag.dagman.out").is_file());
    assert!(backup.join("u_run.node_status").is_file());
    assert!(backup.join("u_run.dag.rescue001").is_file());
    assert!(fixture.path().join("u_run.dag.rescue001").is_file());
    assert!(!fixture.path().join("u_run.dag.dagman.out").exists());

    let info = read_dag_info(fixture.path()).unwrap();
    assert!(info["sched1"].contains_key(&JobId::new(1200, 0)));
}

#[test]
fn test_restart_requires_rescue_dag() {
    let fixture = SubmitDirFixture::new("u_run");
    fixture.dag("JOB a1 a1.sub\n");
    let scheduler = FakeScheduler::new();
    let outcome = restart_path(&scheduler, &fixture);
    assert!(outcome.run_id.is_none());
    assert!(outcome.message.starts_with("HTCondor rescue DAG(s) not found in"));
    assert!(scheduler.submissions().is_empty());
}

#[test]
fn test_restart_refuses_queued_run() {
    let fixture = failed_run();
    let queued = classad(&[
        ("ClusterId", json!(1163)),
        ("ProcId", json!(0)),
        ("GlobalJobId", json!("sched1#1163.0#1722040509")),
    ]);
    let scheduler = FakeScheduler::new().with_queue("Iwd ==", vec![queued]);

    let outcome = restart_path(&scheduler, &fixture);
    assert_eq!(
        outcome.message,
        "Workflow already in the job queue (global job id: 'sched1#1163.0#1722040509')"
    );
    assert!(scheduler.submissions().is_empty());
    assert!(fixture.path().join("u_run.dag.dagman.out").exists());
}

#[test]
fn test_restart_refuses_finished_run() {
    let fixture = failed_run();
    fixture.node_status_ads(2, 2, &[("a1", 5), ("a2", 5)]);
    let scheduler = FakeScheduler::new();
    let outcome = restart_path(&scheduler, &fixture);
    assert_eq!(outcome.message, "All jobs in the workflow finished successfully");
    assert!(scheduler.submissions().is_empty());
}

#[test]
fn test_restart_without_submit_description() {
    let fixture = failed_run();
    std::fs::remove_file(fixture.path().join("u_run.dag.condor.sub")).unwrap();
    let scheduler = FakeScheduler::new();
    let outcome = restart_path(&scheduler, &fixture);
    assert!(outcome.message.starts_with("DAGMan submit description file not found in"));
}

#[test]
fn test_restart_unknown_run_id() {
    let scheduler = FakeScheduler::new();
    let outcome = RestartCoordinator::new(&scheduler).restart("4242").unwrap();
    assert!(outcome
        .message
        .starts_with("workflow with run id '4242' not found."));
    assert!(scheduler.calls().iter().any(|c| matches!(
        c,
        Call::History { constraint, .. } if constraint == "ClusterId == 4242"
    )));
}

#[test]
fn test_restart_by_id_with_missing_directory() {
    let fixture = SubmitDirFixture::new("u_run");
    let gone = fixture.path().join("moved-away");
    let dag_job = classad(&[
        ("ClusterId", json!(1163)),
        ("ProcId", json!(0)),
        ("Iwd", json!(gone.display().to_string())),
    ]);
    let scheduler = FakeScheduler::new().with_history("ClusterId == 1163", vec![dag_job]);
    let outcome = RestartCoordinator::new(&scheduler).restart("1163").unwrap();
    assert!(outcome.message.starts_with("submit directory '"));
    assert!(outcome.message.ends_with("for run id '1163' not found."));
}

#[test]
fn test_restart_reruns_failed_group() {
    let fixture = failed_run();
    fixture.rescue(1, "DONE a1\nDONE wms_group1\n");
    fixture.write("subdags/wms_group1/wms_group1.status", "1\n");
    fixture.write("subdags/wms_group1/wms_group1.dag.nodes.log", "");
    let scheduler = FakeScheduler::new().with_submitted(vec![new_dag_job()]);

    let outcome = restart_path(&scheduler, &fixture);
    assert_eq!(outcome.run_id.as_deref(), Some("1200.0"));
    let rescue = fixture.read("u_run.dag.rescue001");
    assert!(rescue.contains("# DONE wms_group1"));
    assert!(fixture
        .path()
        .join("subdags/wms_group1/backups/001/wms_group1.dag.nodes.log")
        .is_file());
    // The backup keeps the rescue DAG as DAGMan wrote it.
    assert!(fixture.read("backups/001/u_run.dag.rescue001").contains("\nDONE wms_group1"));
}
