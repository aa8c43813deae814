//! Translation of a workflow graph into a DAGMan workflow.
//!
//! Payload and final jobs become regular DAG jobs. NOOP nodes become `wms_`
//! prefixed jobs that run nothing and groups become `wms_` prefixed nested
//! DAGs. A nested DAG always reports success to its parent, so a
//! non-blocking group is followed by a status check job that fails when the
//! group failed.

use crate::dag::{Dag, ScriptHook, SubmitJob};
use crate::error::{DagError, Result};
use crate::provision::Provisioner;
use crate::site::{PoolInfo, SiteCache};
use crate::translate::{transfer_input_files, translate_dag_commands, translate_job_commands};
use htcflow_core::config::Config;
use htcflow_core::constants::{attrs, dirs, job_types, prefixes, scripts, wms};
use htcflow_core::summary::CountSummary;
use htcflow_core::workflow::{GroupSpec, JobSpec, NoopSpec, WorkflowGraph, WorkflowNode};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Submit commands every payload and final job starts from.
pub const JOB_DEFAULTS: [(&str, &str); 9] = [
    ("universe", "vanilla"),
    ("should_transfer_files", "YES"),
    ("when_to_transfer_output", "ON_EXIT_OR_EVICT"),
    ("transfer_output_files", "\"\""),
    ("transfer_executable", "False"),
    ("getenv", "True"),
    // Going over memory sometimes ends in SIGBUS or SIGSEGV, so a signal
    // exit is handled like a memory hold.
    ("on_exit_hold", "ExitBySignal == true"),
    (
        "on_exit_hold_reason",
        "strcat(\"Job raised a signal \", string(ExitSignal), \". \", \
         \"Handling signal as if job has gone over memory limit.\")",
    ),
    ("on_exit_hold_subcode", "34"),
];

/// Name of the DAG job that stands for a node.
fn dag_job_name(node: &WorkflowNode) -> String {
    if node.is_payload() {
        node.name().to_string()
    } else {
        format!("{}{}", prefixes::WMS, node.name())
    }
}

pub struct DagBuilder<'a> {
    config: &'a Config,
    submit_root: PathBuf,
    sites: SiteCache<'a>,
    /// Nested DAGs share one `subdags/` directory.
    group_jobs: BTreeSet<String>,
}

impl<'a> DagBuilder<'a> {
    pub fn new(config: &'a Config, pool: &'a dyn PoolInfo, submit_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            submit_root: submit_root.into(),
            sites: SiteCache::new(config, pool),
            group_jobs: BTreeSet::new(),
        }
    }

    pub fn submit_root(&self) -> &Path {
        &self.submit_root
    }

    /// Builds the DAG for a validated copy of `graph`.
    pub fn build(&mut self, graph: &WorkflowGraph) -> Result<Dag> {
        graph.validate()?;
        let mut dag = self.build_dag(graph)?;
        dag.set_attr(attrs::WMS_SERVICE, wms::SERVICE);
        dag.set_attr(attrs::WMS_WORKFLOW, wms::WORKFLOW);

        if self.config.provisioning.enabled {
            Provisioner::new(&self.config.provisioning).provision(&mut dag)?;
        }
        tracing::debug!(
            "Built DAG '{}' with {} jobs ({} sites)",
            dag.name,
            dag.all_jobs().count(),
            self.sites.len()
        );
        Ok(dag)
    }

    fn build_dag(&mut self, graph: &WorkflowGraph) -> Result<Dag> {
        let mut dag = Dag::new(&graph.name);
        tracing::debug!("DAG attributes for '{}': {:?}", graph.name, graph.run_attrs);
        dag.add_attrs(&graph.run_attrs);
        dag.set_attr(attrs::RUN_QUANTA, graph.quanta_counts().to_string());
        dag.set_attr(attrs::JOB_SUMMARY, graph.job_counts().to_string());

        let mut kinds = CountSummary::new();
        for node in graph.body() {
            let job = match node {
                WorkflowNode::Payload(spec) => {
                    kinds.add(job_types::PAYLOAD, 1);
                    self.payload_job(spec, job_types::PAYLOAD)?
                }
                WorkflowNode::Noop(noop) => {
                    kinds.add(job_types::NOOP, 1);
                    noop_job(noop)
                }
                WorkflowNode::Group(group) => {
                    kinds.add(job_types::SUBDAG, 1);
                    let job = self.group_job(group)?;
                    // Counts cover the nested DAGs too.
                    if let Some(nested) = job.subdag.as_deref() {
                        let nested_kinds = nested
                            .attrs
                            .get(attrs::WORKFLOW_JOB_SUMMARY)
                            .and_then(Value::as_str)
                            .map(CountSummary::parse)
                            .unwrap_or_default();
                        for (kind, count) in nested_kinds.iter() {
                            kinds.add(kind, count);
                        }
                    }
                    job
                }
                WorkflowNode::Final(_) | WorkflowNode::FinalWorkflow(_) => continue,
            };
            dag.add_job(job)?;
        }

        self.add_edges(graph, &mut dag)?;

        match graph.final_node() {
            Some(WorkflowNode::Final(spec)) => {
                let mut job = self.payload_job(spec, job_types::FINAL)?;
                if job.dag_cmds.post.is_none() {
                    job.dag_cmds.post = Some(ScriptHook::new(
                        self.script_path(scripts::FINAL_POST),
                        format!("{} $DAG_STATUS $RETURN", spec.name),
                    ));
                }
                dag.add_final_job(job)?;
                kinds.add(job_types::PAYLOAD, 1);
            }
            Some(WorkflowNode::FinalWorkflow(final_graph)) => {
                return Err(htcflow_core::errors::WorkflowError::UnsupportedFinalWorkflow(
                    final_graph.name.clone(),
                )
                .into());
            }
            _ => {}
        }

        dag.set_attr(attrs::WORKFLOW_JOB_SUMMARY, kinds.to_string());
        Ok(dag)
    }

    /// Rewrites the graph's edges onto DAG job names. Same-label groups are
    /// chained directly; everything else downstream of a non-blocking group
    /// waits for the group's check job.
    fn add_edges(&self, graph: &WorkflowGraph, dag: &mut Dag) -> Result<()> {
        for node in graph.body() {
            let mut parent = dag_job_name(node);
            let mut children = Vec::new();

            if let WorkflowNode::Group(group) = node {
                let mut group_children = Vec::new();
                for successor in graph.successors(&group.name) {
                    match successor {
                        WorkflowNode::Group(next) if next.label == group.label => {
                            group_children.push(dag_job_name(successor))
                        }
                        _ => children.push(dag_job_name(successor)),
                    }
                }
                dag.add_edges(std::slice::from_ref(&parent), &group_children)?;

                if !group.blocking {
                    let check = self.check_job(&parent, &group.label);
                    let check_name = check.name.clone();
                    dag.add_job(check)?;
                    dag.add_edges(std::slice::from_ref(&parent), std::slice::from_ref(&check_name))?;
                    parent = check_name;
                }
            } else {
                children.extend(graph.successors(node.name()).map(dag_job_name));
            }

            dag.add_edges(&[parent], &children)?;
        }
        Ok(())
    }

    fn script_path(&self, script: &str) -> String {
        self.submit_root
            .join(dirs::SCRIPTS)
            .join(script)
            .display()
            .to_string()
    }

    fn payload_job(&mut self, spec: &JobSpec, job_type: &str) -> Result<SubmitJob> {
        let site = self.sites.get(spec.compute_site.as_deref())?;
        let mut job = SubmitJob::new(&spec.name, &spec.label, job_type);

        let subdir = self.config.sub_dir_template.render(&spec.label, &spec.tags);
        job.dag_cmds.dir = Some(if subdir.is_empty() {
            dirs::JOBS.to_string()
        } else {
            format!("{}/{}", dirs::JOBS, subdir)
        });

        job.add_commands(JOB_DEFAULTS);
        job.add_commands(translate_job_commands(site, spec)?);
        for (key, suffix) in [("output", "out"), ("error", "err"), ("log", "log")] {
            let value = format!("{}.$(Cluster).{}", spec.name, suffix);
            tracing::debug!("HTCondor {} = {}", key, value);
            job.commands.insert(key.to_string(), value);
        }
        if let Some(inputs) = transfer_input_files(spec, site.use_shared, &self.submit_root)? {
            job.commands.insert("transfer_input_files".into(), inputs);
        }

        let dag_cmds = translate_dag_commands(spec);
        job.dag_cmds.pre = dag_cmds.pre;
        job.dag_cmds.post = dag_cmds.post;
        job.dag_cmds.abort_dag_on = dag_cmds.abort_dag_on;

        job.add_attrs(&spec.attrs);
        job.add_attrs(&site.attrs);
        let quanta: CountSummary = spec
            .quanta_counts
            .iter()
            .map(|(label, n)| (label.as_str(), *n))
            .collect();
        job.set_attr(attrs::JOB_QUANTA, quanta.to_string());
        job.set_attr(attrs::JOB_NAME, spec.name.as_str());
        job.set_attr(attrs::JOB_LABEL, spec.label.as_str());
        Ok(job)
    }

    fn group_job(&mut self, group: &GroupSpec) -> Result<SubmitJob> {
        let name = format!("{}{}", prefixes::WMS, group.name);
        if !self.group_jobs.insert(name.clone()) {
            return Err(DagError::DuplicateJob {
                dag: dirs::SUBDAGS.to_string(),
                name,
            });
        }

        let mut job = SubmitJob::new(&name, &group.label, job_types::SUBDAG);
        job.subfile = None;
        job.dag_cmds.dir = Some(format!("{}/{}", dirs::SUBDAGS, name));
        job.subdag = Some(Box::new(self.build_dag(&group.graph)?));
        if !group.blocking {
            job.dag_cmds.post = Some(ScriptHook::new(
                self.script_path(scripts::SUBDAG_POST),
                format!("{} $RETURN", name),
            ));
        }
        Ok(job)
    }

    fn check_job(&self, group_job: &str, label: &str) -> SubmitJob {
        let name = format!("{}{}", prefixes::CHECK_STATUS, group_job);
        let mut job = SubmitJob::new(name, label, job_types::CHECK);
        job.subfile = Some(self.script_path(scripts::CHECK_GROUP_STATUS_SUB));
        job.dag_cmds.dir = Some(format!("{}/{}", dirs::SUBDAGS, group_job));
        job.dag_cmds
            .vars
            .insert("group_job_name".to_string(), group_job.to_string());
        job
    }
}

fn noop_job(noop: &NoopSpec) -> SubmitJob {
    let mut job = SubmitJob::new(
        format!("{}{}", prefixes::WMS, noop.name),
        &noop.label,
        job_types::NOOP,
    );
    job.set_attr(attrs::JOB_NAME, noop.name.as_str());
    job.set_attr(attrs::JOB_LABEL, noop.label.as_str());
    job.dag_cmds.noop = true;
    job
}

#[cfg(test)]
mod tests {
    use super::*;
    use htcflow_core::errors::WorkflowError;
    use htcflow_core::workflow::Edge;

    struct FixedPool(Option<i64>);

    impl PoolInfo for FixedPool {
        fn max_slot_memory(&self, _machine_pattern: &str) -> Result<Option<i64>> {
            Ok(self.0)
        }
    }

    fn payload(name: &str, label: &str) -> WorkflowNode {
        let mut job = JobSpec::new(name, label);
        job.executable.src_uri = "/bin/true".into();
        job.quanta_counts.insert(label.to_string(), 1);
        WorkflowNode::Payload(job)
    }

    fn group(name: &str, label: &str, blocking: bool) -> WorkflowNode {
        let mut graph = WorkflowGraph::new(name);
        graph.nodes = vec![
            payload(&format!("{}_a", name), label),
            payload(&format!("{}_b", name), label),
        ];
        graph.edges = vec![Edge::new(format!("{}_a", name), format!("{}_b", name))];
        WorkflowNode::Group(GroupSpec {
            name: name.into(),
            label: label.into(),
            blocking,
            graph,
        })
    }

    fn build(graph: &WorkflowGraph) -> Result<Dag> {
        let config = Config::default();
        let pool = FixedPool(Some(16384));
        DagBuilder::new(&config, &pool, "/submit/run").build(graph)
    }

    fn attr<'d>(dag: &'d Dag, key: &str) -> &'d str {
        dag.attrs.get(key).and_then(Value::as_str).unwrap_or_default()
    }

    #[test]
    fn test_payload_job_defaults_and_attrs() {
        let mut graph = WorkflowGraph::new("wf");
        graph.nodes = vec![payload("label1_a", "label1")];
        let dag = build(&graph).unwrap();

        let job = dag.job("label1_a").unwrap();
        assert_eq!(job.commands["universe"], "vanilla");
        assert_eq!(job.commands["transfer_output_files"], "\"\"");
        assert_eq!(job.commands["on_exit_hold_subcode"], "34");
        assert_eq!(job.commands["output"], "label1_a.$(Cluster).out");
        assert_eq!(job.commands["log"], "label1_a.$(Cluster).log");
        assert!(!job.commands.contains_key("notification"));
        assert_eq!(job.dag_cmds.dir.as_deref(), Some("jobs/label1"));
        assert_eq!(job.attrs[attrs::JOB_QUANTA], "label1:1");
        assert_eq!(job.attrs[attrs::JOB_LABEL], "label1");
        assert_eq!(attr(&dag, attrs::WMS_SERVICE), wms::SERVICE);
    }

    #[test]
    fn test_noop_and_edges_use_wms_names() {
        let mut graph = WorkflowGraph::new("wf");
        graph.nodes = vec![
            payload("a", "label1"),
            WorkflowNode::Noop(NoopSpec {
                name: "sync".into(),
                label: "noop".into(),
            }),
            payload("b", "label2"),
        ];
        graph.edges = vec![Edge::new("a", "sync"), Edge::new("sync", "b")];
        let dag = build(&graph).unwrap();

        let noop = dag.job("wms_sync").unwrap();
        assert!(noop.dag_cmds.noop);
        assert_eq!(noop.attrs[attrs::JOB_NAME], "sync");
        assert_eq!(dag.children("a").collect::<Vec<_>>(), vec!["wms_sync"]);
        assert_eq!(dag.children("wms_sync").collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_non_blocking_group_is_followed_by_check_job() {
        let mut graph = WorkflowGraph::new("wf");
        graph.nodes = vec![
            group("group1", "label2", false),
            group("group2", "label2", false),
            payload("after", "label3"),
        ];
        graph.edges = vec![
            Edge::new("group1", "group2"),
            Edge::new("group1", "after"),
            Edge::new("group2", "after"),
        ];
        let dag = build(&graph).unwrap();

        let mut children: Vec<_> = dag.children("wms_group1").collect();
        children.sort();
        assert_eq!(children, vec!["wms_check_status_wms_group1", "wms_group2"]);
        assert_eq!(
            dag.children("wms_check_status_wms_group1").collect::<Vec<_>>(),
            vec!["after"]
        );

        let group_job = dag.job("wms_group1").unwrap();
        assert_eq!(group_job.dag_cmds.dir.as_deref(), Some("subdags/wms_group1"));
        let post = group_job.dag_cmds.post.as_ref().unwrap();
        assert_eq!(post.executable, "/submit/run/scripts/subdag_post.sh");
        assert_eq!(post.arguments, "wms_group1 $RETURN");
        assert_eq!(group_job.subdag.as_ref().unwrap().jobs.len(), 2);

        let check = dag.job("wms_check_status_wms_group1").unwrap();
        assert_eq!(check.label, "label2");
        assert_eq!(check.dag_cmds.vars["group_job_name"], "wms_group1");
    }

    #[test]
    fn test_blocking_group_has_no_check_job() {
        let mut graph = WorkflowGraph::new("wf");
        graph.nodes = vec![group("group1", "label2", true), payload("after", "label3")];
        graph.edges = vec![Edge::new("group1", "after")];
        let dag = build(&graph).unwrap();

        assert_eq!(dag.children("wms_group1").collect::<Vec<_>>(), vec!["after"]);
        assert!(dag.job("wms_group1").unwrap().dag_cmds.post.is_none());
        assert!(dag.jobs.iter().all(|j| j.job_type != job_types::CHECK));
    }

    #[test]
    fn test_final_job_gets_post_script() {
        let mut graph = WorkflowGraph::new("wf");
        graph.nodes = vec![
            payload("a", "label1"),
            WorkflowNode::Final(JobSpec::new("finalJob", "finalJob")),
        ];
        let dag = build(&graph).unwrap();

        let final_job = dag.final_job.as_ref().unwrap();
        assert_eq!(final_job.job_type, job_types::FINAL);
        let post = final_job.dag_cmds.post.as_ref().unwrap();
        assert_eq!(post.executable, "/submit/run/scripts/final_post.sh");
        assert_eq!(post.arguments, "finalJob $DAG_STATUS $RETURN");
        assert_eq!(attr(&dag, attrs::WORKFLOW_JOB_SUMMARY), "payload:2");
    }

    #[test]
    fn test_invalid_graphs_are_rejected() {
        let mut graph = WorkflowGraph::new("wf");
        graph.nodes = vec![
            WorkflowNode::Final(JobSpec::new("f1", "final")),
            WorkflowNode::Final(JobSpec::new("f2", "final")),
        ];
        assert!(matches!(
            build(&graph),
            Err(DagError::Workflow(WorkflowError::MultipleFinalJobs { .. }))
        ));

        let mut graph = WorkflowGraph::new("wf");
        graph.nodes = vec![WorkflowNode::FinalWorkflow(WorkflowGraph::new("sub"))];
        assert!(matches!(
            build(&graph),
            Err(DagError::Workflow(WorkflowError::UnsupportedFinalWorkflow(_)))
        ));
    }

    #[test]
    fn test_provisioning_job_is_added_when_enabled() {
        let mut config = Config::default();
        config.provisioning.enabled = true;
        config.provisioning.script = Some("#!/bin/bash\n".into());
        let pool = FixedPool(None);
        let mut graph = WorkflowGraph::new("wf");
        graph.nodes = vec![payload("a", "label1")];

        let dag = DagBuilder::new(&config, &pool, "/submit/run")
            .build(&graph)
            .unwrap();
        assert_eq!(dag.service_jobs.len(), 1);
        assert_eq!(attr(&dag, attrs::JOB_SUMMARY), "label1:1;provisioningJob:1");
    }
}
