//! Seam between the reporting, restart and submission code and the batch
//! scheduler. Every scheduler interaction goes through [`Scheduler`].

use crate::error::{ClientError, Result};
use htcflow_core::classad::{ClassAd, JobAds, ScheddJobs};
use htcflow_core::handlers::HandlerChain;
use htcflow_core::model::JobId;
use htcflow_dag::site::{machine_constraint, PoolInfo};
use htcflow_dag::DagError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub mod condor;

pub use condor::CondorCli;

/// Key used for records whose scheduler daemon cannot be named.
pub const LOCAL_SCHEDD: &str = "local";

/// Scheduler daemons a query is sent to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ScheddScope {
    /// The daemon running on the local host.
    #[default]
    Local,
    Named(Vec<String>),
}

pub trait Scheduler {
    /// The local scheduler daemon, or every daemon in the pool when `all`.
    fn locate_schedds(&self, all: bool) -> Result<ScheddScope>;

    /// Jobs in the live queue matching `constraint`. An empty projection
    /// returns every attribute.
    fn query(&self, scope: &ScheddScope, constraint: &str, projection: &[&str]) -> Result<ScheddJobs>;

    /// Jobs in the history matching `constraint`, optionally limited to jobs
    /// completed after the `since` epoch timestamp.
    fn history(
        &self,
        scope: &ScheddScope,
        constraint: &str,
        since: Option<i64>,
        projection: &[&str],
    ) -> Result<ScheddJobs>;

    /// Generates the DAGMan submit description for `dag_file` without
    /// submitting it. `attrs` are added to the DAGMan job. Returns the path of
    /// the generated description.
    fn create_dag_submit(&self, dag_file: &Path, attrs: &BTreeMap<String, Value>) -> Result<PathBuf>;

    /// Submits the description at `submit_file` from its own directory and
    /// returns the records of the queued jobs.
    fn submit(&self, submit_file: &Path) -> Result<ScheddJobs>;

    /// Machine (slot) records matching `constraint`.
    fn machine_ads(&self, constraint: &str, projection: &[&str]) -> Result<Vec<ClassAd>>;

    /// Queue first, then the history for jobs that already left the queue.
    /// Queue records win when a job shows up in both. Completed and held
    /// records come back with their exit status derived.
    fn search(&self, scope: &ScheddScope, constraint: &str, hist_days: Option<f64>) -> Result<ScheddJobs> {
        let mut found = self.query(scope, constraint, &[])?;
        if let Some(days) = hist_days.filter(|d| *d > 0.0) {
            let past = self.history(scope, constraint, Some(history_cutoff(days)), &[])?;
            merge_missing(&mut found, past);
        }
        let chain = HandlerChain::default();
        for jobs in found.values_mut() {
            chain.apply_to_terminal(jobs);
        }
        Ok(found)
    }
}

/// Epoch timestamp `days` days before now.
pub fn history_cutoff(days: f64) -> i64 {
    chrono::Utc::now().timestamp() - (days * 86400.0) as i64
}

/// Adds the jobs of `source` that `target` does not know about yet.
pub fn merge_missing(target: &mut ScheddJobs, source: ScheddJobs) {
    for (schedd, jobs) in source {
        let known = target.entry(schedd).or_default();
        for (id, ad) in jobs {
            known.entry(id).or_insert(ad);
        }
    }
}

/// Name of the scheduler daemon that owns a job, taken from `GlobalJobId`
/// (`<schedd>#<cluster>.<proc>#<time>`).
pub fn schedd_name(ad: &ClassAd) -> Option<&str> {
    ad.get_str("GlobalJobId")
        .and_then(|id| id.split('#').next())
        .filter(|name| !name.is_empty())
}

/// Groups records by their owning daemon; records without a usable id are
/// dropped.
pub fn group_by_schedd(ads: Vec<ClassAd>, fallback: &str) -> ScheddJobs {
    let mut grouped = ScheddJobs::new();
    for ad in ads {
        let Some(id) = ad.job_id() else {
            tracing::debug!("Skipping record without ClusterId: {:?}", ad);
            continue;
        };
        let schedd = schedd_name(&ad).unwrap_or(fallback).to_string();
        grouped.entry(schedd).or_default().insert(id, ad);
    }
    grouped
}

/// The first job of the first daemon, if any.
pub fn first_job(jobs: &ScheddJobs) -> Option<(&str, JobId, &ClassAd)> {
    jobs.iter().find_map(|(schedd, ads): (&String, &JobAds)| {
        ads.iter()
            .next()
            .map(|(id, ad)| (schedd.as_str(), *id, ad))
    })
}

pub fn job_count(jobs: &ScheddJobs) -> usize {
    jobs.values().map(|ads| ads.len()).sum()
}

/// Parses the JSON array printed by the `-json` option of the scheduler
/// tools. No matches print nothing at all.
pub fn parse_json_ads(command: &str, text: &str) -> Result<Vec<ClassAd>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(text).map_err(|e| ClientError::ParseOutput {
        command: command.to_string(),
        reason: e.to_string(),
    })
}

/// Pool information for the translation step, answered by a scheduler.
pub struct SchedulerPool<'a>(pub &'a dyn Scheduler);

impl PoolInfo for SchedulerPool<'_> {
    fn max_slot_memory(&self, machine_pattern: &str) -> htcflow_dag::Result<Option<i64>> {
        let ads = self
            .0
            .machine_ads(
                &machine_constraint(machine_pattern),
                &["Machine", "TotalSlotMemory"],
            )
            .map_err(|e| DagError::PoolQuery(e.to_string()))?;
        Ok(ads
            .iter()
            .filter_map(|ad| ad.get_i64("TotalSlotMemory"))
            .max())
    }
}
