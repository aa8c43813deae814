use assert_cmd::Command as AssertCommand;
use htcflow_test_utils::{events, JobSpecBuilder, SubmitDirFixture, WorkflowBuilder};
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const CONFIG: &str = "use_shared = true\nmemory_limit = 16384\n";

struct Harness {
    temp: TempDir,
    condor_bin: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let condor_bin = temp.path().join("condor-bin");
        fs::create_dir_all(&condor_bin).unwrap();
        fs::write(temp.path().join("config.toml"), CONFIG).unwrap();
        Self { temp, condor_bin }
    }

    fn cmd(&self) -> AssertCommand {
        let mut cmd = AssertCommand::new(env!("CARGO_BIN_EXE_htcflow"));
        cmd.env("XDG_CONFIG_HOME", self.temp.path().join("xdg-config"));
        cmd.env("XDG_CACHE_HOME", self.temp.path().join("xdg-cache"));
        cmd.env("HTCFLOW_CONDOR_BIN", &self.condor_bin);
        cmd.env("HTCFLOW_LOG_LEVEL", "DEBUG");
        cmd.env("NO_COLOR", "1");
        cmd.env_remove("RUST_LOG");
        cmd.arg("--config").arg(self.temp.path().join("config.toml"));
        cmd
    }

    /// Installs a stand-in for one of the HTCondor tools.
    #[cfg(unix)]
    fn fake_tool(&self, name: &str, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = self.condor_bin.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn write_workflow(&self) -> PathBuf {
        let graph = WorkflowBuilder::new("u_run")
            .run_attr("bps_run", "u_run")
            .job(JobSpecBuilder::new("pipetaskInit", "pipetaskInit"))
            .payload("a1", "label1")
            .payload("a2", "label1")
            .final_job(JobSpecBuilder::new("finalJob", "finalJob"))
            .edge("pipetaskInit", "a1")
            .edge("pipetaskInit", "a2")
            .build();
        let path = self.temp.path().join("wf.json");
        fs::write(&path, serde_json::to_string_pretty(&graph).unwrap()).unwrap();
        path
    }

    fn submit_root(&self) -> PathBuf {
        self.temp.path().join("submit")
    }
}

fn failed_run() -> SubmitDirFixture {
    let fixture = SubmitDirFixture::new("u_run");
    fixture.dag(
        "JOB pipetaskInit pipetaskInit.sub DIR jobs/pipetaskInit\n\
         VARS pipetaskInit bps_job_label=\"pipetaskInit\"\n\
         JOB a1 a1.sub DIR jobs/label1\n\
         VARS a1 bps_job_label=\"label1\"\n\
         JOB a2 a2.sub DIR jobs/label1\n\
         VARS a2 bps_job_label=\"label1\"\n\
         PARENT pipetaskInit CHILD a1 a2\n\
         SET_JOB_ATTR bps_run= \"u_run\"\n",
    );
    fixture.dagman_log(&events::submitted(1163, "2024-07-27 00:35:09", None));
    fixture.nodes_log(
        &[
            events::submitted(1164, "2024-07-27 00:35:15", Some("pipetaskInit")),
            events::terminated(1164, "2024-07-27 00:36:01", 0),
            events::submitted(1165, "2024-07-27 00:36:05", Some("a1")),
            events::terminated(1165, "2024-07-27 00:37:00", 0),
            events::submitted(1166, "2024-07-27 00:36:05", Some("a2")),
            events::terminated(1166, "2024-07-27 00:37:30", 2),
        ]
        .concat(),
    );
    fixture.node_status_ads(3, 2, &[("pipetaskInit", 5), ("a1", 5), ("a2", 6)]);
    fixture.info_json("sched1", 1163, "sched1#1163.0#1722040509");
    fixture
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

#[test]
fn test_prepare_writes_submit_directory() {
    let harness = Harness::new();
    let workflow = harness.write_workflow();
    let out = harness.submit_root().join("u_run");

    let mut cmd = harness.cmd();
    cmd.arg("prepare")
        .arg("--workflow")
        .arg(&workflow)
        .arg("--out")
        .arg(&out);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Workflow: u_run"))
        .stdout(predicate::str::contains("u_run.dag"))
        .stdout(predicate::str::contains("Jobs: payload:4"));

    let dag = fs::read_to_string(out.join("u_run.dag")).unwrap();
    assert!(dag.contains("PARENT pipetaskInit CHILD a1 a2"));
    assert!(dag.contains("FINAL finalJob finalJob.sub DIR jobs/finalJob"));
    assert!(out.join("jobs/label1/a1.sub").is_file());
}

#[test]
fn test_prepare_refuses_existing_submit_directory() {
    let harness = Harness::new();
    let workflow = harness.write_workflow();
    let out = harness.submit_root().join("u_run");
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("keep.txt"), "data").unwrap();

    let mut cmd = harness.cmd();
    cmd.arg("prepare")
        .arg("--workflow")
        .arg(&workflow)
        .arg("--out")
        .arg(&out);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("[ERROR]"))
        .stderr(predicate::str::contains("already exists"));
    assert!(!out.join("u_run.dag").exists());
}

#[test]
fn test_prepare_reports_missing_workflow_file() {
    let harness = Harness::new();
    let mut cmd = harness.cmd();
    cmd.arg("prepare")
        .arg("--workflow")
        .arg(harness.temp.path().join("nope.json"))
        .arg("--out")
        .arg(harness.submit_root().join("u_run"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("nope.json"));
}

#[test]
fn test_report_from_submit_directory() {
    let harness = Harness::new();
    let fixture = failed_run();

    let mut cmd = harness.cmd();
    cmd.arg("report").arg(path_arg(fixture.path()));
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("1163.0"))
        .stdout(predicate::str::contains("label1"))
        .stdout(predicate::str::contains("Exit codes of failed jobs:"))
        .stdout(predicate::str::contains("sched1#1163.0#1722040509"));
}

#[test]
fn test_report_as_json() {
    let harness = Harness::new();
    let fixture = failed_run();

    let mut cmd = harness.cmd();
    cmd.arg("report").arg("--json").arg(path_arg(fixture.path()));
    let output = cmd.assert().success().get_output().stdout.clone();

    let doc: Value = serde_json::from_slice(&output).unwrap();
    let report = &doc["reports"]["1163.0"];
    assert_eq!(report["run"], "u_run");
    assert_eq!(report["total_number_jobs"], 3);
    assert_eq!(report["exit_code_summary"]["label1"], serde_json::json!([2]));
    assert_eq!(doc["message"], "");
}

#[test]
fn test_report_without_htcondor_files_prints_message() {
    let harness = Harness::new();
    let fixture = SubmitDirFixture::new("u_run");
    fixture.dag("JOB a1 a1.sub\n");

    let mut cmd = harness.cmd();
    cmd.arg("report").arg(path_arg(fixture.path()));
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Could not find HTCondor files in"));
}

#[test]
fn test_restart_without_rescue_dag_fails() {
    let harness = Harness::new();
    let fixture = SubmitDirFixture::new("u_run");
    fixture.dag("JOB a1 a1.sub\n");

    let mut cmd = harness.cmd();
    cmd.arg("restart").arg(path_arg(fixture.path()));
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("HTCondor rescue DAG(s) not found"));
}

#[cfg(unix)]
#[test]
fn test_submit_with_condor_tools() {
    let harness = Harness::new();
    harness.fake_tool(
        "condor_submit_dag",
        "for last; do :; done\n: > \"${last%.dag}.dag.condor.sub\"\n",
    );
    harness.fake_tool("condor_submit", "echo '1200.0 - 1200.0'\n");
    harness.fake_tool(
        "condor_q",
        "cat <<'JSON'\n[{\"ClusterId\": 1200, \"ProcId\": 0, \
         \"GlobalJobId\": \"sched1#1200.0#1722100000\", \"bps_run\": \"u_run\"}]\nJSON\n",
    );
    let fixture = SubmitDirFixture::new("u_run");
    fixture.dag("JOB a1 a1.sub DIR jobs/label1\nSET_JOB_ATTR bps_run= \"u_run\"\n");

    let mut cmd = harness.cmd();
    cmd.arg("submit").arg(fixture.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Run Id: 1200.0"))
        .stdout(predicate::str::contains("Run Name: u_run"));

    assert!(fixture.path().join("u_run.dag.condor.sub").is_file());
    let info: Value = serde_json::from_str(&fixture.read("u_run.info.json")).unwrap();
    assert_eq!(info["sched1"]["1200.0"]["bps_run"], "u_run");
}

#[test]
fn test_submit_fails_when_condor_tools_fail() {
    let harness = Harness::new();
    let fixture = SubmitDirFixture::new("u_run");
    fixture.dag("JOB a1 a1.sub\n");

    let mut cmd = harness.cmd();
    cmd.env("PATH", harness.condor_bin.as_os_str());
    cmd.arg("submit").arg(fixture.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("condor_submit_dag"));
}
