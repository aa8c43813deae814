//! Reader for HTCondor text user logs (`*.dag.dagman.log`,
//! `*.dag.nodes.log`).
//!
//! Events are applied in file order, so later events overwrite attributes
//! set by earlier ones. Records of terminated and held jobs are passed
//! through the [`HandlerChain`] to derive a uniform exit status.

use super::find_file;
use chrono::{Datelike, Local, NaiveDateTime, TimeZone};
use htcflow_core::classad::{update_jobs, ClassAd, JobAds};
use htcflow_core::constants::{attrs, dirs, markers, suffixes};
use htcflow_core::errors::RecordError;
use htcflow_core::handlers::HandlerChain;
use htcflow_core::model::{JobId, JobStatus};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[allow(clippy::unwrap_used)]
static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{3}) \((\d+)\.(\d+)\.\d+\) (\S+ \S+) (.*)$").unwrap()
});

#[allow(clippy::unwrap_used)]
static NORMAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Normal termination \(return value (-?\d+)\)").unwrap());

#[allow(clippy::unwrap_used)]
static ABNORMAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Abnormal termination \(signal (\d+)\)").unwrap());

#[allow(clippy::unwrap_used)]
static TOE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Job terminated of its own accord at (\S+) with (exit-code|signal) (-?\d+)").unwrap()
});

#[allow(clippy::unwrap_used)]
static HOLD_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Code (\d+) Subcode (\d+)").unwrap());

/// One event as it appears in the log, before it is applied to a record.
/// The free text after the header timestamp is not kept.
#[derive(Debug, Clone, PartialEq)]
struct Event {
    code: u16,
    id: JobId,
    time: Option<i64>,
    body: Vec<String>,
}

impl Event {
    fn node_name(&self) -> Option<&str> {
        self.body
            .iter()
            .find_map(|line| line.strip_prefix("DAG Node:"))
            .map(str::trim)
    }

    fn first_line(&self) -> Option<&str> {
        self.body
            .iter()
            .map(String::as_str)
            .find(|line| !line.is_empty() && !line.starts_with("DAG Node:"))
    }
}

/// Event timestamps come as `2024-07-27 00:35:09` or, in older logs,
/// `07/27 00:35:09` without the year.
fn parse_time(text: &str) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| {
            let with_year = format!("{}/{}", Local::now().year(), text);
            NaiveDateTime::parse_from_str(&with_year, "%Y/%m/%d %H:%M:%S")
        })
        .ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.timestamp())
}

fn parse_events(path: &Path, text: &str) -> Result<Vec<Event>, RecordError> {
    let mut events = Vec::new();
    let mut current: Option<Event> = None;

    for (index, line) in text.lines().enumerate() {
        if line.trim() == "..." {
            events.extend(current.take());
            continue;
        }
        if let Some(event) = current.as_mut() {
            event.body.push(line.trim().to_string());
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        let caps = HEADER_RE.captures(line).ok_or_else(|| RecordError::Malformed {
            path: path.to_path_buf(),
            line: index + 1,
            reason: format!("expected an event header, found '{}'", line),
        })?;
        let number = |i: usize| caps[i].parse::<i64>().unwrap_or_default();
        current = Some(Event {
            code: caps[1].parse().unwrap_or_default(),
            id: JobId::new(number(2), number(3)),
            time: parse_time(&caps[4]),
            body: Vec::new(),
        });
    }
    if let Some(event) = current {
        tracing::debug!(
            "Unterminated event {:03} for job {} at the end of {}",
            event.code,
            event.id,
            path.display()
        );
        events.push(event);
    }
    Ok(events)
}

fn set_termination(ad: &mut ClassAd, body: &[String], prefix: &str) {
    for line in body {
        if let Some(caps) = NORMAL_RE.captures(line) {
            ad.insert(format!("{}TerminatedNormally", prefix), true);
            ad.insert(format!("{}ReturnValue", prefix), caps[1].parse::<i64>().unwrap_or_default());
        } else if let Some(caps) = ABNORMAL_RE.captures(line) {
            ad.insert(format!("{}TerminatedNormally", prefix), false);
            ad.insert(format!("{}TerminatedBySignal", prefix), caps[1].parse::<i64>().unwrap_or_default());
        }
    }
}

fn apply_event(ad: &mut ClassAd, event: &Event) {
    ad.insert("ClusterId", event.id.cluster);
    ad.insert("ProcId", event.id.proc);
    if let Some(name) = event.node_name() {
        ad.insert("DAGNodeName", name);
    }
    let time = event.time.map(Value::from).unwrap_or(Value::Null);

    let my_type = match event.code {
        0 => {
            ad.insert("JobStatus", JobStatus::Idle.code());
            ad.insert("QDate", time);
            "SubmitEvent"
        }
        1 => {
            ad.insert("JobStatus", JobStatus::Running.code());
            ad.insert("JobCurrentStartDate", time);
            "ExecuteEvent"
        }
        4 => {
            ad.insert("JobStatus", JobStatus::Idle.code());
            ad.insert(attrs::JOB_EVICTED_TIME, time);
            "JobEvictedEvent"
        }
        5 => {
            ad.insert("JobStatus", JobStatus::Completed.code());
            ad.insert("CompletionDate", time);
            set_termination(ad, &event.body, "");
            if let Some(caps) = event.body.iter().find_map(|l| TOE_RE.captures(l)) {
                let by_signal = &caps[2] == "signal";
                let value = caps[3].parse::<i64>().unwrap_or_default();
                let mut toe = json!({
                    "Who": "itself",
                    "How": "OF_ITS_OWN_ACCORD",
                    "When": &caps[1],
                    "ExitBySignal": by_signal,
                });
                toe[if by_signal { "ExitSignal" } else { "ExitCode" }] = Value::from(value);
                ad.insert("ToE", toe);
            }
            "JobTerminatedEvent"
        }
        9 => {
            ad.insert("JobStatus", JobStatus::Removed.code());
            if let Some(reason) = event.first_line() {
                ad.insert("Reason", reason);
            }
            "JobAbortedEvent"
        }
        12 => {
            ad.insert("JobStatus", JobStatus::Held.code());
            ad.insert(attrs::JOB_HELD_TIME, time);
            if let Some(reason) = event.first_line() {
                ad.insert("HoldReason", reason);
            }
            if let Some(caps) = event.body.iter().find_map(|l| HOLD_CODE_RE.captures(l)) {
                ad.insert("HoldReasonCode", caps[1].parse::<i64>().unwrap_or_default());
                ad.insert("HoldReasonSubCode", caps[2].parse::<i64>().unwrap_or_default());
            }
            "JobHeldEvent"
        }
        13 => {
            ad.insert("JobStatus", JobStatus::Idle.code());
            ad.insert(attrs::JOB_RELEASED_TIME, time);
            "JobReleaseEvent"
        }
        16 => {
            set_termination(ad, &event.body, "PostScript");
            "PostScriptTerminatedEvent"
        }
        other => {
            tracing::trace!("Ignoring event {:03} for job {}", other, event.id);
            return;
        }
    };
    ad.insert("MyType", my_type);
}

/// Applies every event in the user log at `path`.
pub fn read_event_log(path: &Path) -> Result<JobAds, RecordError> {
    let text = fs_err::read_to_string(path)?;
    let mut jobs = JobAds::new();
    for event in parse_events(path, &text)? {
        apply_event(jobs.entry(event.id).or_default(), &event);
    }
    Ok(jobs)
}

/// Node job logs of the run in `wms_path`: the top-level one, if present,
/// followed by those of nested DAGs.
pub(crate) fn node_logs(wms_path: &Path) -> Vec<PathBuf> {
    let mut logs = Vec::new();
    match find_file(wms_path, suffixes::NODES_LOG) {
        Ok(path) => logs.push(path),
        Err(e) => tracing::debug!("{}", e),
    }
    let subdags = wms_path.join(dirs::SUBDAGS);
    if subdags.is_dir() {
        for entry in WalkDir::new(&subdags)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_name().to_string_lossy().ends_with(suffixes::NODES_LOG) {
                logs.push(entry.into_path());
            }
        }
    }
    logs
}

/// Reads the DAGMan job log and the node job logs of the run in `wms_path`,
/// including those of nested DAGs.
///
/// Returns the id of the most recent DAGMan job together with the merged
/// records. Earlier DAGMan jobs of a restarted run are left out.
pub fn read_dag_log(wms_path: &Path) -> Result<(JobId, JobAds), RecordError> {
    let dagman_log = find_file(wms_path, suffixes::DAGMAN_LOG)?;
    let dagman_jobs = read_event_log(&dagman_log)?;
    let (dag_id, mut dag_ad) = dagman_jobs
        .into_iter()
        .filter(|(_, ad)| ad.contains("QDate"))
        .last()
        .ok_or_else(|| RecordError::Malformed {
            path: dagman_log.clone(),
            line: 0,
            reason: "no submit event for the DAGMan job".to_string(),
        })?;

    let mut jobs = JobAds::new();
    dag_ad.insert("Iwd", wms_path.display().to_string());
    jobs.insert(dag_id, dag_ad);

    for path in node_logs(wms_path) {
        let mut nodes = read_event_log(&path)?;
        for ad in nodes.values_mut() {
            ad.insert(markers::DAGMAN_JOB_ID, dag_id.cluster);
        }
        update_jobs(&mut jobs, &nodes);
    }

    HandlerChain::default().apply_to_terminal(&mut jobs);
    tracing::debug!("Read {} job records from the logs in {}", jobs.len(), wms_path.display());
    Ok((dag_id, jobs))
}
