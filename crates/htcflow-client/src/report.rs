//! Run and job reports assembled from scheduler records and the files in a
//! run's submit directory.

use crate::error::Result;
use crate::ids::{local_cluster, wms_id_type, WmsIdType};
use crate::records::dag_file::label_from_name;
use crate::records::{
    add_run_info, check_dagman_output, is_missing, read_dag_info, read_dag_log, read_dag_status,
    read_node_status, summary_from_dag,
};
use crate::scheduler::{first_job, job_count, ScheddScope, Scheduler};
use htcflow_core::classad::{update_jobs, ClassAd, JobAds, ScheddJobs};
use htcflow_core::classify::classify;
use htcflow_core::constants::{attrs, job_types, labels, markers, prefixes, MISSING_VALUE};
use htcflow_core::model::{zeroed_state_counts, JobId, JobStatus, StateCounts, WorkflowState};
use htcflow_core::summary::CountSummary;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Selects DAGMan jobs among all jobs known to a scheduler.
pub(crate) const DAGMAN_CONSTRAINT: &str = r#"regexp("dagman$", Cmd)"#;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub wms_id: String,
    pub name: String,
    pub label: String,
    pub state: WorkflowState,
}

/// Status of a service job that runs alongside the payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceNote {
    pub job_name: String,
    pub status: WorkflowState,
    pub status_details: String,
}

impl fmt::Display for ServiceNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Provisioning job status: {}", self.status)?;
        if !self.status_details.is_empty() {
            write!(f, " {}", self.status_details)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub wms_id: String,
    pub global_wms_id: String,
    pub path: String,
    pub label: String,
    pub run: String,
    pub project: String,
    pub campaign: String,
    pub payload: String,
    pub operator: String,
    pub run_summary: String,
    pub state: WorkflowState,
    pub jobs: Vec<JobReport>,
    pub total_number_jobs: i64,
    pub job_state_counts: StateCounts,
    /// Non-zero exit codes (or signals) per job label.
    pub exit_code_summary: BTreeMap<String, Vec<i64>>,
    pub notes: Vec<ServiceNote>,
}

/// Reports keyed by run id, plus any message meant for the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportOutput {
    pub reports: BTreeMap<String, RunReport>,
    pub message: String,
}

impl ReportOutput {
    fn new(reports: BTreeMap<String, RunReport>, messages: Vec<String>) -> Self {
        Self {
            reports,
            message: join_messages(messages),
        }
    }
}

fn join_messages(messages: Vec<String>) -> String {
    messages
        .into_iter()
        .filter(|m| !m.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Everything the submit directory of a run says about it.
#[derive(Debug, Clone, Default)]
pub struct PathInfo {
    /// Id of the most recent DAGMan job; `None` when the HTCondor files are
    /// missing.
    pub dag_id: Option<JobId>,
    pub jobs: JobAds,
    pub message: String,
}

fn attr_or_missing(ad: &ClassAd, key: &str) -> String {
    ad.get_string(key).unwrap_or_else(|| MISSING_VALUE.to_string())
}

fn is_service(ad: &ClassAd) -> bool {
    ad.get_str(attrs::JOB_TYPE) == Some(job_types::SERVICE)
}

fn node_name(id: &JobId, ad: &ClassAd) -> String {
    ad.get_string("DAGNodeName").unwrap_or_else(|| id.to_string())
}

fn normalize_label(label: String) -> String {
    if label == labels::INIT {
        labels::PIPETASK_INIT.to_string()
    } else {
        label
    }
}

/// Expected number of payload jobs recorded by the DAG builder, if any.
fn expected_payload_jobs(dag_ad: &ClassAd) -> Option<i64> {
    dag_ad
        .get_str(attrs::WORKFLOW_JOB_SUMMARY)
        .and_then(|s| CountSummary::parse(s).get(job_types::PAYLOAD))
}

/// Owner of a DAGMan job: the operator recorded at submission, then the
/// scheduler's `Owner`.
pub fn owner(dag_ad: &ClassAd) -> String {
    [attrs::OPERATOR, "Owner"]
        .iter()
        .find_map(|key| dag_ad.get_string(key).filter(|v| !v.is_empty()))
        .unwrap_or_else(|| {
            tracing::warn!("Could not get Owner from htcondor job: {:?}", dag_ad);
            MISSING_VALUE.to_string()
        })
}

/// Number of jobs per label in approximate pipeline order.
pub fn run_summary(dag_ad: &ClassAd) -> String {
    let mut summary = dag_ad
        .get_string(attrs::JOB_SUMMARY)
        .or_else(|| dag_ad.get_string(attrs::RUN_SUMMARY))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            let iwd = dag_ad.get_string("Iwd").unwrap_or_default();
            match summary_from_dag(Path::new(&iwd)) {
                Ok(dag) => dag.counts.to_string(),
                Err(e) => {
                    tracing::warn!("Could not get run summary for htcondor job {}: {}", dag_ad.display_id(), e);
                    String::new()
                }
            }
        });

    summary = summary.replace(
        &format!("{}:", labels::INIT),
        &format!("{}:", labels::PIPETASK_INIT),
    );
    if dag_ad.contains("pegasus_version") && !summary.contains(labels::PEGASUS) {
        summary.push_str(&format!(";{}:0", labels::PEGASUS));
    }
    summary
}

/// Non-zero exit codes per label. Only completed and held jobs carry an
/// exit status; every labelled job still gets an entry.
pub fn exit_code_summary<'a>(jobs: impl IntoIterator<Item = (&'a JobId, &'a ClassAd)>) -> BTreeMap<String, Vec<i64>> {
    let mut summary: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for (id, ad) in jobs {
        let Some(label) = ad.get_string(attrs::JOB_LABEL) else {
            tracing::debug!("Attribute '{}' not found in the record of job '{}'", attrs::JOB_LABEL, id);
            continue;
        };
        let codes = summary.entry(label).or_default();
        let status = ad.get_i64("JobStatus");
        match status.and_then(JobStatus::from_code) {
            Some(JobStatus::Completed) | Some(JobStatus::Held) => {
                let key = if ad.get_bool("ExitBySignal").unwrap_or(false) {
                    "ExitSignal"
                } else {
                    "ExitCode"
                };
                match ad.get_i64(key) {
                    Some(0) => {}
                    Some(code) => codes.push(code),
                    None => tracing::debug!("Attribute '{}' not found in the record of job '{}'", key, id),
                }
            }
            Some(_) => {}
            None => tracing::debug!("Unknown 'JobStatus' value ({:?}) for job '{}'", status, id),
        }
    }
    summary
}

/// Job counts per state, from the counters DAGMan keeps on its own job
/// (`DAG_*`) or writes to the node status file (`Nodes*`).
pub fn state_counts_from_dag_job(dag_ad: &ClassAd) -> (i64, StateCounts) {
    let mut counts = zeroed_state_counts();
    let get = |key: &str| dag_ad.get_i64(key).unwrap_or(0);

    let (prefix, held_key) = if dag_ad.contains("DAG_NodesTotal") || dag_ad.contains("DAG_NodesReady") {
        ("DAG_Nodes", "DAG_JobsHeld")
    } else if dag_ad.contains("NodesTotal") || dag_ad.contains("NodesFailed") {
        ("Nodes", "JobProcsHeld")
    } else {
        tracing::debug!("Can't get job state counts for {}", dag_ad.display_id());
        return (0, counts);
    };
    let nodes = |suffix: &str| get(&format!("{}{}", prefix, suffix));

    counts.insert(WorkflowState::Unready, nodes("Unready"));
    counts.insert(WorkflowState::Ready, nodes("Ready"));
    counts.insert(WorkflowState::Held, get(held_key));
    counts.insert(WorkflowState::Succeeded, nodes("Done"));
    counts.insert(WorkflowState::Failed, nodes("Failed"));
    counts.insert(WorkflowState::Pruned, nodes("Futile"));
    counts.insert(WorkflowState::Misfit, nodes("Pre") + nodes("Post"));
    (nodes("Total"), counts)
}

/// Job counts per state from individual job records, leaving out the DAGMan
/// job and service jobs. Jobs not seen yet count as unready.
pub fn state_counts_from_jobs(dag_id: JobId, jobs: &JobAds) -> (i64, StateCounts) {
    let mut counts = zeroed_state_counts();
    for (id, ad) in jobs {
        if *id != dag_id && !is_service(ad) {
            *counts.entry(classify(ad)).or_default() += 1;
        }
    }
    let counted: i64 = counts.values().sum();

    let dag_ad = jobs.get(&dag_id).cloned().unwrap_or_default();
    let total = expected_payload_jobs(&dag_ad)
        .or_else(|| dag_ad.get_i64("NodesTotal"))
        .unwrap_or(counted);
    *counts.entry(WorkflowState::Unready).or_default() += total - counted;
    (total, counts)
}

/// Note for the provisioning service job.
///
/// DAGMan removes service jobs still running once the payload is done, so a
/// removal by DAGMan counts as success unless the job was held at the time.
pub fn service_note(job: &ClassAd, dag_ad: &ClassAd) -> ServiceNote {
    let mut status = classify(job);
    let mut details = String::new();
    let hold_reason = job.get_string("HoldReason").unwrap_or_default();
    match status {
        WorkflowState::Held => details = format!("({})", hold_reason),
        WorkflowState::Succeeded => {
            let dag_done = matches!(
                dag_ad.get_i64("JobStatus").and_then(JobStatus::from_code),
                Some(JobStatus::Removed) | Some(JobStatus::Completed)
            );
            if !dag_done {
                details = "(Note: Finished before workflow.)".to_string();
            }
        }
        WorkflowState::Deleted => {
            let reason = job.get_str("Reason").unwrap_or_default();
            if reason.contains(markers::REMOVED_BY_DAGMAN) || reason.contains(markers::OTHER_JOB_REMOVE) {
                let held_last = match (
                    job.get_i64(attrs::JOB_HELD_TIME),
                    job.get_i64(attrs::JOB_RELEASED_TIME),
                ) {
                    (Some(held), Some(released)) => held > released,
                    (Some(_), None) => true,
                    _ => false,
                };
                if held_last {
                    details = format!("(Job was held for the following reason: {})", hold_reason);
                } else {
                    status = WorkflowState::Succeeded;
                }
            }
        }
        _ => {}
    }
    ServiceNote {
        job_name: job.get_string("DAGNodeName").unwrap_or_default(),
        status,
        status_details: details,
    }
}

fn base_report(wms_id: String, dag_ad: &ClassAd) -> RunReport {
    RunReport {
        wms_id,
        global_wms_id: attr_or_missing(dag_ad, "GlobalJobId"),
        path: dag_ad.get_string("Iwd").unwrap_or_default(),
        label: attr_or_missing(dag_ad, attrs::JOB_LABEL),
        run: attr_or_missing(dag_ad, attrs::RUN),
        project: attr_or_missing(dag_ad, attrs::PROJECT),
        campaign: attr_or_missing(dag_ad, attrs::CAMPAIGN),
        payload: attr_or_missing(dag_ad, attrs::PAYLOAD),
        operator: owner(dag_ad),
        run_summary: run_summary(dag_ad),
        state: classify(dag_ad),
        jobs: Vec::new(),
        total_number_jobs: 0,
        job_state_counts: zeroed_state_counts(),
        exit_code_summary: BTreeMap::new(),
        notes: Vec::new(),
    }
}

/// Detailed report for the run managed by DAGMan job `dag_id`.
pub fn detailed_report(dag_id: JobId, jobs: &JobAds) -> RunReport {
    let dag_ad = jobs.get(&dag_id).cloned().unwrap_or_default();

    let mut payload = Vec::new();
    let mut services = Vec::new();
    for (id, ad) in jobs {
        if *id == dag_id || node_name(id, ad).starts_with(prefixes::WMS) {
            continue;
        }
        if is_service(ad) {
            services.push((id, ad));
        } else {
            payload.push((id, ad));
        }
    }

    let mut report = base_report(dag_id.to_string(), &dag_ad);
    let (total, _) = state_counts_from_dag_job(&dag_ad);
    report.total_number_jobs = expected_payload_jobs(&dag_ad).unwrap_or(if total > 0 {
        total
    } else {
        state_counts_from_jobs(dag_id, jobs).0
    });
    report.exit_code_summary = exit_code_summary(payload.iter().copied());

    for (id, ad) in &payload {
        let name = node_name(id, ad);
        let label = ad
            .get_string(attrs::JOB_LABEL)
            .unwrap_or_else(|| label_from_name(&name));
        let state = classify(ad);
        *report.job_state_counts.entry(state).or_default() += 1;
        report.jobs.push(JobReport {
            wms_id: id.to_string(),
            name,
            label: normalize_label(label),
            state,
        });
    }

    let provisioning = attr_or_missing(&dag_ad, attrs::PROVISIONING_JOB);
    for (id, ad) in services {
        match ad.get_str(attrs::JOB_LABEL) {
            None => tracing::warn!("Service job with id '{}': missing label, no action taken", id),
            Some(label) if label == provisioning => report.notes.push(service_note(ad, &dag_ad)),
            Some(label) => tracing::warn!(
                "Service job with id '{}' (label '{}'): no handler, no action taken",
                id,
                label
            ),
        }
    }
    report
}

/// Gathers what the files in a submit directory say about the run.
pub fn info_from_path(wms_path: &Path) -> Result<PathInfo> {
    let wms_path: PathBuf = fs_err::canonicalize(wms_path).unwrap_or_else(|_| wms_path.to_path_buf());
    let mut messages = Vec::new();

    let (dag_id, mut jobs) = match read_dag_log(&wms_path) {
        Ok(found) => found,
        Err(e) if is_missing(&e) => {
            let message = format!("Could not find HTCondor files in '{}'", wms_path.display());
            tracing::warn!("{}", message);
            messages.push(message);
            messages.push(check_dagman_output(&wms_path));
            return Ok(PathInfo {
                dag_id: None,
                jobs: JobAds::new(),
                message: join_messages(messages),
            });
        }
        Err(e) => return Err(e.into()),
    };
    update_jobs(&mut jobs, &read_node_status(&wms_path)?);

    let dag_status = read_dag_status(&wms_path)?;
    jobs.entry(dag_id).or_default().update(&dag_status);
    let (total, _) = state_counts_from_jobs(dag_id, &jobs);
    tracing::debug!("Run {} in {} has {} jobs", dag_id, wms_path.display(), total);

    let dag_ad = jobs.entry(dag_id).or_default();
    if !dag_ad.contains(attrs::RUN) {
        add_run_info(&wms_path, dag_ad);
    }
    messages.push(check_dagman_output(&wms_path));

    match read_dag_info(&wms_path) {
        Ok(info) => {
            if let Some((_, _, saved)) = first_job(&info) {
                dag_ad.update(saved);
            }
        }
        Err(e) if is_missing(&e) => {
            messages.push(format!("Warn: Some information may not be available: {}", e));
        }
        Err(e) => return Err(e.into()),
    }

    Ok(PathInfo {
        dag_id: Some(dag_id),
        jobs,
        message: join_messages(messages),
    })
}

/// Detailed report built from the submit directory alone.
pub fn report_from_path(wms_path: &Path) -> Result<ReportOutput> {
    let info = info_from_path(wms_path)?;
    let mut reports = BTreeMap::new();
    if let Some(dag_id) = info.dag_id {
        let report = detailed_report(dag_id, &info.jobs);
        reports.insert(report.wms_id.clone(), report);
    }
    Ok(ReportOutput {
        reports,
        message: info.message,
    })
}

/// Builds reports by querying a scheduler and reading submit directories.
pub struct ReportAssembler<'a> {
    scheduler: &'a dyn Scheduler,
    scope: ScheddScope,
    hist_days: Option<f64>,
}

impl<'a> ReportAssembler<'a> {
    pub fn new(scheduler: &'a dyn Scheduler) -> Self {
        Self {
            scheduler,
            scope: ScheddScope::Local,
            hist_days: None,
        }
    }

    pub fn with_scope(mut self, scope: ScheddScope) -> Self {
        self.scope = scope;
        self
    }

    /// Also search the history for jobs that finished within `days` days.
    pub fn with_history(mut self, days: f64) -> Self {
        self.hist_days = Some(days);
        self
    }

    /// Detailed report for `wms_id` (a job id or a submit directory), or a
    /// summary of every run visible to `user` when no id is given.
    pub fn report(&self, wms_id: Option<&str>, user: Option<&str>, pass_thru: Option<&str>) -> Result<ReportOutput> {
        match wms_id {
            None => self.summary_report(user, pass_thru),
            Some(id) if wms_id_type(id) == WmsIdType::Path => report_from_path(Path::new(id)),
            Some(id) => self.report_from_id(id),
        }
    }

    fn dag_from_schedd(&self, wms_id: &str) -> Result<ScheddJobs> {
        let constraint = match local_cluster(wms_id) {
            Some(cluster) => format!("{} && ClusterId == {}", DAGMAN_CONSTRAINT, cluster),
            None => format!("{} && GlobalJobId == \"{}\"", DAGMAN_CONSTRAINT, wms_id),
        };
        self.scheduler.search(&self.scope, &constraint, self.hist_days)
    }

    /// Detailed report for the run whose DAGMan job has id `wms_id`.
    pub fn report_from_id(&self, wms_id: &str) -> Result<ReportOutput> {
        let mut messages = Vec::new();
        let mut dag_info = self.dag_from_schedd(wms_id)?;

        let single = first_job(&dag_info)
            .filter(|_| job_count(&dag_info) == 1)
            .map(|(_, id, ad)| (id, ad.get_string("Iwd").unwrap_or_default()));
        if let Some((dag_id, iwd)) = single {
            match read_dag_log(Path::new(&iwd)) {
                Ok((path_dag_id, _)) if path_dag_id != dag_id => {
                    messages.push(format!(
                        "WARNING: Found newer workflow executions in same submit directory as id '{}'. \
                         This normally occurs when a run is restarted. The report shown is for the most \
                         recent status with run id '{}'",
                        dag_id, path_dag_id
                    ));
                    dag_info = self.dag_from_schedd(&path_dag_id.to_string())?;
                }
                Ok(_) => {}
                Err(e) if is_missing(&e) => {
                    messages.push(format!("Cannot create the report for '{}': {}", dag_id, e));
                    dag_info.clear();
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut reports = BTreeMap::new();
        match job_count(&dag_info) {
            0 => {}
            1 => {
                let Some((_, dag_id, dag_ad)) = first_job(&dag_info) else {
                    return Ok(ReportOutput::new(reports, messages));
                };
                let mut jobs = JobAds::new();
                jobs.insert(dag_id, dag_ad.clone());

                let nodes = self.scheduler.search(
                    &self.scope,
                    &format!("{} == {}", markers::DAGMAN_JOB_ID, dag_id.cluster),
                    self.hist_days,
                )?;
                for node_jobs in nodes.values() {
                    update_jobs(&mut jobs, node_jobs);
                }

                let iwd = dag_ad.get_string("Iwd").unwrap_or_default();
                let info = info_from_path(Path::new(&iwd))?;
                update_jobs(&mut jobs, &info.jobs);
                messages.push(info.message);

                let report = detailed_report(dag_id, &jobs);
                reports.insert(report.wms_id.clone(), report);
            }
            _ => {
                let ids: Vec<String> = dag_info
                    .values()
                    .flat_map(|jobs| jobs.values())
                    .map(|ad| attr_or_missing(ad, "GlobalJobId"))
                    .collect();
                messages.push(format!(
                    "More than one job matches id '{}', their global ids are: {}. Rerun with one of the global ids",
                    wms_id,
                    ids.join(", ")
                ));
            }
        }
        Ok(ReportOutput::new(reports, messages))
    }

    /// Short report for every run of `user` (all users when `None`), or for
    /// the DAGMan jobs matching a user-supplied constraint.
    pub fn summary_report(&self, user: Option<&str>, pass_thru: Option<&str>) -> Result<ReportOutput> {
        let constraint = match pass_thru {
            Some(constraint) => constraint.to_string(),
            None => {
                let mut constraint = format!("{} == \"True\" && JobUniverse == 7", attrs::ISJOB);
                if let Some(user) = user {
                    constraint.push_str(&format!(
                        " && (Owner == \"{}\" || {} == \"{}\")",
                        user,
                        attrs::OPERATOR,
                        user
                    ));
                }
                constraint
            }
        };

        let found = self.scheduler.search(&self.scope, &constraint, self.hist_days)?;
        let mut reports = BTreeMap::new();
        let mut messages = Vec::new();
        for jobs in found.into_values() {
            for (id, mut job) in jobs {
                let iwd = job.get_string("Iwd").unwrap_or_default();
                let (mut total, mut counts) = state_counts_from_dag_job(&job);
                // Counters read zero both while the DAGMan job is still
                // authenticating and for runs without progress. The node
                // status file is read in either case.
                if total == 0 {
                    match read_dag_status(Path::new(&iwd)) {
                        Ok(status) if status.is_empty() => {
                            tracing::warn!("DAGMan job {} reports no nodes and has no node status file", id);
                            messages.push(format!(
                                "Job counts of run '{}' are unavailable: no node status file in '{}'",
                                id, iwd
                            ));
                        }
                        Ok(status) => {
                            (total, counts) = state_counts_from_dag_job(&status);
                            job.update(&status);
                            tracing::warn!("DAGMan job {} reports no nodes, using the node status file", id);
                            messages.push(format!(
                                "Job counts of run '{}' are taken from the node status file in '{}'",
                                id, iwd
                            ));
                        }
                        Err(e) => {
                            tracing::warn!("Cannot read the DAG status of {}: {}", id, e);
                            messages.push(format!("Job counts of run '{}' are unavailable: {}", id, e));
                        }
                    }
                }
                if !job.contains(attrs::RUN) {
                    add_run_info(Path::new(&iwd), &mut job);
                }

                let mut report = base_report(id.to_string(), &job);
                report.total_number_jobs = total;
                report.job_state_counts = counts;
                let key = job.get_string("GlobalJobId").unwrap_or_else(|| id.to_string());
                reports.insert(key, report);
            }
        }
        Ok(ReportOutput::new(reports, messages))
    }
}
