//! Summaries read back from the DAG files of a run.

use super::files_matching;
use htcflow_core::classad::{parse_classads, ClassAd};
use htcflow_core::constants::{attrs, job_types, suffixes};
use htcflow_core::errors::RecordError;
use htcflow_core::summary::CountSummary;
use htcflow_dag::writer::node_type;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[allow(clippy::unwrap_used)]
static VAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(\w+)\s*=\s*"((?:[^"\\]|\\.)*)""#).unwrap());

#[allow(clippy::unwrap_used)]
static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$").unwrap()
});

/// Per-node labels and types of a run, including nodes of nested DAGs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DagSummary {
    /// Number of payload and final nodes per label, in the order the labels
    /// first appear.
    pub counts: CountSummary,
    pub labels: BTreeMap<String, String>,
    pub types: BTreeMap<String, String>,
}

/// Label encoded in a node name (`<label>_<rest>`). Names starting with a
/// UUID carry the label in their second part.
pub fn label_from_name(name: &str) -> String {
    let mut parts = name.split('_');
    let first = parts.next().unwrap_or_default();
    if UUID_RE.is_match(first) {
        if let Some(second) = parts.next() {
            return second.to_string();
        }
    }
    first.to_string()
}

fn unquote(value: &str) -> String {
    value.replace("\\\"", "\"").replace("\\\\", "\\")
}

/// The DAG file of the run itself, as opposed to rescue DAGs and the files
/// DAGMan derives from it.
fn top_level_dag(wms_path: &Path) -> Result<PathBuf, RecordError> {
    if !wms_path.is_dir() {
        return Err(RecordError::FilesNotFound(wms_path.to_path_buf()));
    }
    files_matching(wms_path, |name| name.ends_with(suffixes::DAG))?
        .into_iter()
        .next()
        .ok_or_else(|| RecordError::MissingFile {
            dir: wms_path.to_path_buf(),
            pattern: format!("*{}", suffixes::DAG),
        })
}

fn summarize_file(path: &Path, summary: &mut DagSummary) -> Result<(), RecordError> {
    let text = fs_err::read_to_string(path)?;
    let dag_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut nodes: Vec<(String, &'static str)> = Vec::new();
    let mut nested_dags = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let mut words = line.split_whitespace();
        let Some(keyword) = words.next() else {
            continue;
        };
        match keyword {
            "JOB" | "FINAL" | "SERVICE" => {
                let Some(name) = words.next() else {
                    return Err(RecordError::Malformed {
                        path: path.to_path_buf(),
                        line: index + 1,
                        reason: format!("{} without a node name", keyword),
                    });
                };
                let noop = line.split_whitespace().any(|w| w == "NOOP");
                if let Some(kind) = node_type(keyword, name, noop) {
                    nodes.push((name.to_string(), kind));
                }
            }
            "SUBDAG" => {
                let words: Vec<&str> = words.collect();
                let (name, file) = match words.as_slice() {
                    ["EXTERNAL", name, file, ..] => (*name, *file),
                    _ => {
                        return Err(RecordError::Malformed {
                            path: path.to_path_buf(),
                            line: index + 1,
                            reason: "expected SUBDAG EXTERNAL <name> <file>".to_string(),
                        })
                    }
                };
                summary.types.insert(name.to_string(), job_types::SUBDAG.to_string());
                summary.labels.insert(name.to_string(), label_from_name(name));
                let dir = words
                    .iter()
                    .position(|w| *w == "DIR")
                    .and_then(|i| words.get(i + 1))
                    .map(|d| dag_dir.join(d))
                    .unwrap_or_else(|| dag_dir.to_path_buf());
                nested_dags.push(dir.join(file));
            }
            "VARS" => {
                let Some(name) = words.next() else {
                    continue;
                };
                for caps in VAR_RE.captures_iter(line) {
                    if &caps[1] == attrs::JOB_LABEL {
                        summary.labels.insert(name.to_string(), unquote(&caps[2]));
                    }
                }
            }
            _ => {}
        }
    }

    for (name, kind) in nodes {
        let label = summary
            .labels
            .entry(name.clone())
            .or_insert_with(|| label_from_name(&name))
            .clone();
        if kind == job_types::PAYLOAD || kind == job_types::FINAL {
            summary.counts.add(&label, 1);
        }
        summary.types.insert(name, kind.to_string());
    }

    for nested in nested_dags {
        if nested.is_file() {
            summarize_file(&nested, summary)?;
        } else {
            tracing::warn!("Nested DAG file {} not found", nested.display());
        }
    }
    Ok(())
}

/// Reads the DAG file of the run in `wms_path` and every nested DAG it
/// references.
pub fn summary_from_dag(wms_path: &Path) -> Result<DagSummary, RecordError> {
    let dag_file = top_level_dag(wms_path)?;
    let mut summary = DagSummary::default();
    summarize_file(&dag_file, &mut summary)?;
    Ok(summary)
}

/// Attributes the DAG file asks DAGMan to attach to its own job
/// (`SET_JOB_ATTR key= literal`).
pub fn read_dag_attrs(dag_file: &Path) -> Result<ClassAd, RecordError> {
    let text = fs_err::read_to_string(dag_file)?;
    let mut body = String::from("[\n");
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("SET_JOB_ATTR ") {
            body.push_str(rest.trim());
            body.push_str(";\n");
        }
    }
    body.push(']');
    let mut ads = parse_classads(&body).map_err(|e| RecordError::Malformed {
        path: dag_file.to_path_buf(),
        line: e.line,
        reason: e.reason,
    })?;
    Ok(ads.pop().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TOP: &str = "\
JOB pipetaskInit pipetaskInit.sub DIR jobs/pipetaskInit
VARS pipetaskInit bps_job_label=\"pipetaskInit\"
JOB a1 a1.sub DIR jobs/label1
VARS a1 bps_job_label=\"label1\"
JOB a2 a2.sub DIR jobs/label1
VARS a2 bps_job_label=\"label1\"
SUBDAG EXTERNAL wms_group1 wms_group1.dag DIR subdags/wms_group1
JOB wms_check_status_wms_group1 check_group_status.sub DIR scripts
VARS wms_check_status_wms_group1 bps_job_label=\"wms_check_status\"
JOB wms_sync wms_sync.sub NOOP
FINAL finalJob finalJob.sub DIR jobs/finalJob
VARS finalJob bps_job_label=\"finalJob\"
SERVICE provisioningJob provisioningJob.sub
PARENT pipetaskInit CHILD a1 a2
NODE_STATUS_FILE u_run.node_status
SET_JOB_ATTR bps_run= \"u_run\"
SET_JOB_ATTR bps_job_summary= \"pipetaskInit:1;label1:2;label2:1;finalJob:1\"
SET_JOB_ATTR bps_isjob= \"True\"
";

    const NESTED: &str = "\
JOB g_b g_b.sub DIR ../../jobs/label2
VARS g_b bps_job_label=\"label2\"
";

    fn write_run(dir: &Path) {
        std::fs::write(dir.join("u_run.dag"), TOP).unwrap();
        std::fs::write(dir.join("u_run.dag.rescue001"), "DONE a1\n").unwrap();
        let nested = dir.join("subdags").join("wms_group1");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("wms_group1.dag"), NESTED).unwrap();
    }

    #[test]
    fn test_summary_counts_payload_and_final_nodes() {
        let dir = tempdir().unwrap();
        write_run(dir.path());
        let summary = summary_from_dag(dir.path()).unwrap();
        assert_eq!(
            summary.counts.to_string(),
            "pipetaskInit:1;label1:2;finalJob:1;label2:1"
        );
        assert_eq!(summary.types["wms_sync"], job_types::NOOP);
        assert_eq!(summary.types["wms_group1"], job_types::SUBDAG);
        assert_eq!(summary.types["wms_check_status_wms_group1"], job_types::CHECK);
        assert_eq!(summary.types["provisioningJob"], job_types::SERVICE);
        assert_eq!(summary.types["finalJob"], job_types::FINAL);
        assert_eq!(summary.labels["g_b"], "label2");
        assert_eq!(summary.labels["a2"], "label1");
        assert_eq!(summary.labels["wms_sync"], "wms");
    }

    #[test]
    fn test_summary_of_empty_directory() {
        let dir = tempdir().unwrap();
        assert!(super::super::is_missing(&summary_from_dag(dir.path()).unwrap_err()));
        assert!(matches!(
            summary_from_dag(&dir.path().join("absent")),
            Err(RecordError::FilesNotFound(_))
        ));
    }

    #[test]
    fn test_label_from_name() {
        assert_eq!(label_from_name("label1_visit_42"), "label1");
        assert_eq!(
            label_from_name("0f4e7f2c-1c2d-4b5a-9e8f-0123456789ab_isr_903342"),
            "isr"
        );
        assert_eq!(label_from_name("finalJob"), "finalJob");
    }

    #[test]
    fn test_read_dag_attrs() {
        let dir = tempdir().unwrap();
        write_run(dir.path());
        let ad = read_dag_attrs(&dir.path().join("u_run.dag")).unwrap();
        assert_eq!(ad.get_str(attrs::RUN), Some("u_run"));
        assert_eq!(ad.get_str(attrs::ISJOB), Some("True"));
        assert_eq!(ad.len(), 3);
    }

    #[test]
    fn test_read_dag_attrs_without_any() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.dag");
        std::fs::write(&path, "JOB a a.sub\n").unwrap();
        assert!(read_dag_attrs(&path).unwrap().is_empty());
    }
}
