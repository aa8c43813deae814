//! In-memory [`Scheduler`] that records every call and answers queries
//! from canned records.

use htcflow_client::error::Result;
use htcflow_client::scheduler::{group_by_schedd, ScheddScope, Scheduler, LOCAL_SCHEDD};
use htcflow_core::classad::{ClassAd, ScheddJobs};
use htcflow_core::constants::suffixes;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    LocateSchedds { all: bool },
    Query { scope: ScheddScope, constraint: String },
    History { scope: ScheddScope, constraint: String, since: Option<i64> },
    CreateDagSubmit { dag_file: PathBuf, attrs: BTreeMap<String, Value> },
    Submit { submit_file: PathBuf },
    MachineAds { constraint: String },
}

/// Canned records are matched by a fragment of the constraint; the first
/// registered fragment contained in the constraint wins. Unmatched queries
/// return no records.
#[derive(Default)]
pub struct FakeScheduler {
    calls: RefCell<Vec<Call>>,
    queue: Vec<(String, Vec<ClassAd>)>,
    history: Vec<(String, Vec<ClassAd>)>,
    submitted: Vec<ClassAd>,
    machines: Vec<ClassAd>,
    schedds: Option<Vec<String>>,
}

fn matching(canned: &[(String, Vec<ClassAd>)], constraint: &str) -> ScheddJobs {
    canned
        .iter()
        .find(|(fragment, _)| constraint.contains(fragment.as_str()))
        .map(|(_, ads)| group_by_schedd(ads.clone(), LOCAL_SCHEDD))
        .unwrap_or_default()
}

impl FakeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue(mut self, fragment: &str, ads: Vec<ClassAd>) -> Self {
        self.queue.push((fragment.to_string(), ads));
        self
    }

    pub fn with_history(mut self, fragment: &str, ads: Vec<ClassAd>) -> Self {
        self.history.push((fragment.to_string(), ads));
        self
    }

    /// Records returned by the next submissions.
    pub fn with_submitted(mut self, ads: Vec<ClassAd>) -> Self {
        self.submitted = ads;
        self
    }

    pub fn with_machines(mut self, ads: Vec<ClassAd>) -> Self {
        self.machines = ads;
        self
    }

    /// Scheduler daemons returned when the whole pool is located.
    pub fn with_schedds(mut self, names: &[&str]) -> Self {
        self.schedds = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn submissions(&self) -> Vec<PathBuf> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Submit { submit_file } => Some(submit_file.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }
}

impl Scheduler for FakeScheduler {
    fn locate_schedds(&self, all: bool) -> Result<ScheddScope> {
        self.record(Call::LocateSchedds { all });
        Ok(match (&self.schedds, all) {
            (Some(names), true) => ScheddScope::Named(names.clone()),
            _ => ScheddScope::Local,
        })
    }

    fn query(&self, scope: &ScheddScope, constraint: &str, _projection: &[&str]) -> Result<ScheddJobs> {
        self.record(Call::Query {
            scope: scope.clone(),
            constraint: constraint.to_string(),
        });
        Ok(matching(&self.queue, constraint))
    }

    fn history(
        &self,
        scope: &ScheddScope,
        constraint: &str,
        since: Option<i64>,
        _projection: &[&str],
    ) -> Result<ScheddJobs> {
        self.record(Call::History {
            scope: scope.clone(),
            constraint: constraint.to_string(),
            since,
        });
        Ok(matching(&self.history, constraint))
    }

    /// Writes an empty submit description next to the DAG file, the way
    /// `condor_submit_dag -no_submit` would.
    fn create_dag_submit(&self, dag_file: &Path, attrs: &BTreeMap<String, Value>) -> Result<PathBuf> {
        self.record(Call::CreateDagSubmit {
            dag_file: dag_file.to_path_buf(),
            attrs: attrs.clone(),
        });
        let name = dag_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = name.trim_end_matches(suffixes::DAG);
        let submit_file = dag_file.with_file_name(format!("{}{}", stem, suffixes::DAG_SUBMIT));
        std::fs::write(&submit_file, "# DAGMan submit description\n")?;
        Ok(submit_file)
    }

    fn submit(&self, submit_file: &Path) -> Result<ScheddJobs> {
        self.record(Call::Submit {
            submit_file: submit_file.to_path_buf(),
        });
        Ok(group_by_schedd(self.submitted.clone(), LOCAL_SCHEDD))
    }

    fn machine_ads(&self, constraint: &str, _projection: &[&str]) -> Result<Vec<ClassAd>> {
        self.record(Call::MachineAds {
            constraint: constraint.to_string(),
        });
        Ok(self.machines.clone())
    }
}
