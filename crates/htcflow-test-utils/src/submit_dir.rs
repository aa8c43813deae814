//! Submit directories as HTCondor and DAGMan leave them behind.

use std::fs;
use std::path::{Path, PathBuf};

/// Text user-log events. Timestamps are `YYYY-MM-DD HH:MM:SS`.
pub mod events {
    fn header(code: &str, cluster: i64, time: &str, text: &str) -> String {
        format!("{} ({}.000.000) {} {}\n", code, cluster, time, text)
    }

    fn node_line(node: Option<&str>) -> String {
        node.map(|n| format!("    DAG Node: {}\n", n)).unwrap_or_default()
    }

    pub fn submitted(cluster: i64, time: &str, node: Option<&str>) -> String {
        format!(
            "{}{}...\n",
            header("000", cluster, time, "Job submitted from host: <10.0.0.1:9618>"),
            node_line(node)
        )
    }

    pub fn executing(cluster: i64, time: &str) -> String {
        format!(
            "{}...\n",
            header("001", cluster, time, "Job executing on host: <10.0.0.2:9618>")
        )
    }

    pub fn terminated(cluster: i64, time: &str, return_value: i64) -> String {
        format!(
            "{}\t(1) Normal termination (return value {})\n\
             \tJob terminated of its own accord at 2024-07-27T00:00:00Z with exit-code {}.\n...\n",
            header("005", cluster, time, "Job terminated."),
            return_value,
            return_value
        )
    }

    pub fn held(cluster: i64, time: &str, reason: &str, code: i64, subcode: i64) -> String {
        format!(
            "{}\t{}\n\tCode {} Subcode {}\n...\n",
            header("012", cluster, time, "Job was held."),
            reason,
            code,
            subcode
        )
    }

    pub fn released(cluster: i64, time: &str) -> String {
        format!(
            "{}\tvia condor_release (by user jdoe)\n...\n",
            header("013", cluster, time, "Job was released.")
        )
    }

    pub fn aborted(cluster: i64, time: &str, reason: &str) -> String {
        format!("{}\t{}\n...\n", header("009", cluster, time, "Job was aborted."), reason)
    }
}

pub struct SubmitDirFixture {
    _temp_dir: tempfile::TempDir,
    pub path: PathBuf,
    pub run: String,
}

impl SubmitDirFixture {
    /// An empty submit directory for run `run`.
    pub fn new(run: &str) -> Self {
        let temp_dir = tempfile::Builder::new()
            .prefix("htcflow-test-")
            .tempdir()
            .expect("Failed to create temp dir");
        let path = temp_dir.path().join("submit").join(run);
        fs::create_dir_all(&path).expect("Failed to create submit dir");
        let path = path.canonicalize().expect("Failed to resolve submit dir");
        Self {
            _temp_dir: temp_dir,
            path,
            run: run.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, relative: &str, text: &str) -> PathBuf {
        let target = self.path.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(&target, text).expect("Failed to write fixture file");
        target
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.path.join(relative)).expect("Failed to read fixture file")
    }

    fn run_file(&self, suffix: &str, text: &str) -> PathBuf {
        self.write(&format!("{}{}", self.run, suffix), text)
    }

    pub fn dag(&self, text: &str) -> PathBuf {
        self.run_file(".dag", text)
    }

    pub fn dagman_log(&self, text: &str) -> PathBuf {
        self.run_file(".dag.dagman.log", text)
    }

    pub fn nodes_log(&self, text: &str) -> PathBuf {
        self.run_file(".dag.nodes.log", text)
    }

    pub fn dagman_out(&self, text: &str) -> PathBuf {
        self.run_file(".dag.dagman.out", text)
    }

    pub fn node_status(&self, text: &str) -> PathBuf {
        self.run_file(".node_status", text)
    }

    pub fn rescue(&self, number: u32, text: &str) -> PathBuf {
        self.run_file(&format!(".dag.rescue{:03}", number), text)
    }

    pub fn submit_description(&self) -> PathBuf {
        self.run_file(".dag.condor.sub", "# DAGMan submit description\n")
    }

    /// Run-info side file for a DAGMan job known as `global_id`.
    pub fn info_json(&self, schedd: &str, cluster: i64, global_id: &str) -> PathBuf {
        let id = format!("{}.0", cluster);
        let doc = serde_json::json!({
            schedd: {
                id: {
                    "ClusterId": cluster,
                    "ProcId": 0,
                    "GlobalJobId": global_id,
                    "bps_run": self.run,
                }
            }
        });
        let text = serde_json::to_string_pretty(&doc).expect("Failed to render info JSON");
        self.run_file(".info.json", &text)
    }

    /// `DagStatus` ad followed by one `NodeStatus` ad per `(node, status)`.
    pub fn node_status_ads(&self, total: i64, done: i64, nodes: &[(&str, i64)]) -> PathBuf {
        let mut text = format!(
            "[\n  Type = \"DagStatus\";\n  DagFiles = {{ \"{}.dag\" }};\n  NodesTotal = {};\n  \
             NodesDone = {};\n  NodesFailed = 0;\n  NodesQueued = 0;\n  NodesReady = 0;\n  \
             NodesUnready = {};\n  NodesFutile = 0;\n  JobProcsHeld = 0;\n]\n",
            self.run,
            total,
            done,
            total - done
        );
        for (node, status) in nodes {
            text.push_str(&format!(
                "[\n  Type = \"NodeStatus\";\n  Node = \"{}\";\n  NodeStatus = {};\n  \
                 StatusDetails = \"\";\n  RetryCount = 0;\n  JobProcsQueued = 0;\n  JobProcsHeld = 0;\n]\n",
                node, status
            ));
        }
        text.push_str("[\n  Type = \"StatusEnd\";\n  EndTime = 1722040549;\n]\n");
        self.node_status(&text)
    }
}
