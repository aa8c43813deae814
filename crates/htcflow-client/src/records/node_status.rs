//! Reader for the node status file DAGMan rewrites periodically while a
//! workflow runs (`NODE_STATUS_FILE`).

use super::eventlog::{node_logs, read_event_log};
use super::{find_file, is_missing, summary_from_dag};
use super::dag_file::label_from_name;
use htcflow_core::classad::{parse_classads, ClassAd, JobAds};
use htcflow_core::constants::{attrs, suffixes};
use htcflow_core::errors::RecordError;
use htcflow_core::model::JobId;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Node attributes copied into the job records.
const NODE_ATTRS: [&str; 5] = [
    "NodeStatus",
    "StatusDetails",
    "JobProcsHeld",
    "JobProcsQueued",
    "RetryCount",
];

/// Reads every ad of the node status file, or `None` when the run does not
/// have one (yet).
fn read_status_ads(wms_path: &Path) -> Result<Option<(PathBuf, Vec<ClassAd>)>, RecordError> {
    let path = match find_file(wms_path, suffixes::NODE_STATUS) {
        Ok(path) => path,
        Err(e) if is_missing(&e) => {
            tracing::debug!("{}", e);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let text = fs_err::read_to_string(&path)?;
    let ads = parse_classads(&text).map_err(|e| RecordError::Malformed {
        path: path.clone(),
        line: e.line,
        reason: e.reason,
    })?;
    Ok(Some((path, ads)))
}

fn ad_type(ad: &ClassAd) -> Option<&str> {
    ad.get_str("Type")
}

/// Overall DAG progress (`NodesTotal`, `NodesDone`, ...) from the node status
/// file. Empty when the file does not exist.
pub fn read_dag_status(wms_path: &Path) -> Result<ClassAd, RecordError> {
    let Some((path, ads)) = read_status_ads(wms_path)? else {
        return Ok(ClassAd::new());
    };
    let mut status = ads
        .into_iter()
        .find(|ad| ad_type(ad) == Some("DagStatus"))
        .unwrap_or_else(|| {
            tracing::debug!("No DagStatus record in {}", path.display());
            ClassAd::new()
        });
    status.remove("Type");
    Ok(status)
}

/// Latest job id per node name, from the node job logs.
fn node_ids(wms_path: &Path) -> Result<BTreeMap<String, JobId>, RecordError> {
    let mut ids = BTreeMap::new();
    for path in node_logs(wms_path) {
        for (id, ad) in read_event_log(&path)? {
            if let Some(name) = ad.get_str("DAGNodeName") {
                ids.insert(name.to_string(), id);
            }
        }
    }
    Ok(ids)
}

/// Per-node records from the node status file.
///
/// Nodes that have a job in the node logs are keyed by that job's id.
/// Nodes that never got that far (not ready, pruned, ...) are given
/// placeholder ids with negative cluster numbers.
pub fn read_node_status(wms_path: &Path) -> Result<JobAds, RecordError> {
    let Some((_, ads)) = read_status_ads(wms_path)? else {
        return Ok(JobAds::new());
    };

    let summary = match summary_from_dag(wms_path) {
        Ok(summary) => summary,
        Err(e) if is_missing(&e) => {
            tracing::debug!("{}", e);
            Default::default()
        }
        Err(e) => return Err(e),
    };
    let ids = node_ids(wms_path)?;

    let mut jobs = JobAds::new();
    let mut placeholder = 0;
    for node in ads.iter().filter(|ad| ad_type(ad) == Some("NodeStatus")) {
        let Some(name) = node.get_str("Node") else {
            tracing::debug!("Skipping node status record without a node name: {:?}", node);
            continue;
        };
        let id = match ids.get(name) {
            Some(id) => *id,
            None => {
                placeholder -= 1;
                JobId::new(placeholder, 0)
            }
        };

        let mut job = ClassAd::new();
        job.insert("ClusterId", id.cluster);
        job.insert("ProcId", id.proc);
        job.insert("DAGNodeName", name);
        for key in NODE_ATTRS {
            if let Some(value) = node.get(key) {
                job.insert(key, value.clone());
            }
        }
        let label = summary
            .labels
            .get(name)
            .cloned()
            .unwrap_or_else(|| label_from_name(name));
        job.insert(attrs::JOB_LABEL, label);
        if let Some(kind) = summary.types.get(name) {
            job.insert(attrs::JOB_TYPE, kind.as_str());
        }
        jobs.insert(id, job);
    }
    Ok(jobs)
}
