use crate::error::{DagError, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// `SCRIPT [DEFER status time] PRE|POST` hook of a DAG node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHook {
    pub executable: String,
    pub arguments: String,
    pub defer: Option<(i64, i64)>,
}

impl ScriptHook {
    pub fn new(executable: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            arguments: arguments.into(),
            defer: None,
        }
    }
}

/// Node-level DAGMan directives, as opposed to submit description commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DagCommands {
    /// Working directory of the node, relative to the DAG file.
    pub dir: Option<String>,
    pub noop: bool,
    pub pre: Option<ScriptHook>,
    pub post: Option<ScriptHook>,
    pub vars: BTreeMap<String, String>,
    /// `ABORT-DAG-ON <node> <value> [RETURN <status>]`
    pub abort_dag_on: Option<(i64, Option<i64>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitJob {
    pub name: String,
    pub label: String,
    /// One of the `job_types` constants.
    pub job_type: String,
    /// Submit description file name. `None` for nodes that own a nested DAG.
    pub subfile: Option<String>,
    /// Submit description commands, written as `key = value`.
    pub commands: BTreeMap<String, String>,
    pub dag_cmds: DagCommands,
    /// Custom job ClassAd attributes, written as `+key = value`.
    pub attrs: BTreeMap<String, Value>,
    pub subdag: Option<Box<Dag>>,
}

impl SubmitJob {
    pub fn new(name: impl Into<String>, label: impl Into<String>, job_type: &str) -> Self {
        let name = name.into();
        Self {
            subfile: Some(format!("{}.sub", name)),
            name,
            label: label.into(),
            job_type: job_type.to_string(),
            commands: BTreeMap::new(),
            dag_cmds: DagCommands::default(),
            attrs: BTreeMap::new(),
            subdag: None,
        }
    }

    pub fn add_commands<K, V>(&mut self, commands: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in commands {
            self.commands.insert(key.into(), value.into());
        }
    }

    pub fn add_attrs<'a>(&mut self, attrs: impl IntoIterator<Item = (&'a String, &'a Value)>) {
        for (key, value) in attrs {
            self.attrs.insert(key.clone(), value.clone());
        }
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<Value>) {
        self.attrs.insert(key.to_string(), value.into());
    }
}

/// A DAGMan workflow: payload nodes with their edges, an optional final node
/// and service nodes that live outside the dependency structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dag {
    pub name: String,
    pub jobs: Vec<SubmitJob>,
    pub edges: BTreeMap<String, BTreeSet<String>>,
    pub final_job: Option<SubmitJob>,
    pub service_jobs: Vec<SubmitJob>,
    /// Attributes set on the DAGMan job itself via `SET_JOB_ATTR`.
    pub attrs: BTreeMap<String, Value>,
}

impl Dag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.all_jobs().any(|j| j.name == name)
    }

    fn ensure_unique(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            return Err(DagError::DuplicateJob {
                dag: self.name.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn add_job(&mut self, job: SubmitJob) -> Result<()> {
        self.ensure_unique(&job.name)?;
        tracing::debug!("Adding job '{}' ({}) to DAG '{}'", job.name, job.label, self.name);
        self.jobs.push(job);
        Ok(())
    }

    pub fn add_final_job(&mut self, job: SubmitJob) -> Result<()> {
        self.ensure_unique(&job.name)?;
        self.final_job = Some(job);
        Ok(())
    }

    pub fn add_service_job(&mut self, job: SubmitJob) -> Result<()> {
        self.ensure_unique(&job.name)?;
        self.service_jobs.push(job);
        Ok(())
    }

    /// Makes every child depend on every parent. Only regular jobs may take
    /// part in edges.
    pub fn add_edges(&mut self, parents: &[String], children: &[String]) -> Result<()> {
        for name in parents.iter().chain(children) {
            if !self.jobs.iter().any(|j| &j.name == name) {
                return Err(DagError::UnknownJob {
                    dag: self.name.clone(),
                    name: name.clone(),
                });
            }
        }
        if children.is_empty() {
            return Ok(());
        }
        for parent in parents {
            self.edges
                .entry(parent.clone())
                .or_default()
                .extend(children.iter().cloned());
        }
        Ok(())
    }

    pub fn add_attrs<'a>(&mut self, attrs: impl IntoIterator<Item = (&'a String, &'a Value)>) {
        for (key, value) in attrs {
            self.attrs.insert(key.clone(), value.clone());
        }
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<Value>) {
        self.attrs.insert(key.to_string(), value.into());
    }

    pub fn job(&self, name: &str) -> Option<&SubmitJob> {
        self.all_jobs().find(|j| j.name == name)
    }

    pub fn job_mut(&mut self, name: &str) -> Option<&mut SubmitJob> {
        self.jobs
            .iter_mut()
            .chain(self.final_job.iter_mut())
            .chain(self.service_jobs.iter_mut())
            .find(|j| j.name == name)
    }

    pub fn children(&self, name: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(name)
            .into_iter()
            .flat_map(|c| c.iter().map(String::as_str))
    }

    pub fn parents<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.edges
            .iter()
            .filter(move |(_, children)| children.contains(name))
            .map(|(parent, _)| parent.as_str())
    }

    /// Regular jobs, then the final job, then service jobs.
    pub fn all_jobs(&self) -> impl Iterator<Item = &SubmitJob> {
        self.jobs
            .iter()
            .chain(self.final_job.iter())
            .chain(self.service_jobs.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use htcflow_core::constants::job_types;

    fn dag_with(names: &[&str]) -> Dag {
        let mut dag = Dag::new("wf");
        for name in names {
            dag.add_job(SubmitJob::new(*name, "label", job_types::PAYLOAD))
                .unwrap();
        }
        dag
    }

    #[test]
    fn test_rejects_duplicate_names_across_job_kinds() {
        let mut dag = dag_with(&["a"]);
        let err = dag
            .add_final_job(SubmitJob::new("a", "final", job_types::FINAL))
            .unwrap_err();
        assert!(matches!(err, DagError::DuplicateJob { .. }));

        dag.add_service_job(SubmitJob::new("svc", "svc", job_types::SERVICE))
            .unwrap();
        assert!(dag
            .add_job(SubmitJob::new("svc", "x", job_types::PAYLOAD))
            .is_err());
    }

    #[test]
    fn test_edges_reference_known_jobs_only() {
        let mut dag = dag_with(&["a", "b", "c"]);
        dag.add_edges(&["a".into()], &["b".into(), "c".into()])
            .unwrap();
        assert_eq!(dag.children("a").collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(dag.parents("c").collect::<Vec<_>>(), vec!["a"]);

        let err = dag.add_edges(&["a".into()], &["ghost".into()]).unwrap_err();
        assert!(matches!(err, DagError::UnknownJob { name, .. } if name == "ghost"));
    }

    #[test]
    fn test_final_job_cannot_take_part_in_edges() {
        let mut dag = dag_with(&["a"]);
        dag.add_final_job(SubmitJob::new("final", "final", job_types::FINAL))
            .unwrap();
        assert!(dag.add_edges(&["a".into()], &["final".into()]).is_err());
        assert!(dag.job("final").is_some());
        assert_eq!(dag.all_jobs().count(), 2);
    }

    #[test]
    fn test_default_subfile_follows_name() {
        let job = SubmitJob::new("label1_a", "label1", job_types::PAYLOAD);
        assert_eq!(job.subfile.as_deref(), Some("label1_a.sub"));
    }
}
