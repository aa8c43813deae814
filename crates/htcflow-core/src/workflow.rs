use crate::errors::{ConfigError, WorkflowError};
use crate::summary::CountSummary;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Portable description of a workflow, as handed over by the planning layer.
///
/// Nodes keep their declaration order; the builder walks them in that order
/// so the produced DAG is deterministic for a given input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub name: String,
    #[serde(default)]
    pub run_attrs: BTreeMap<String, Value>,
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub parent: String,
    pub child: String,
}

impl Edge {
    pub fn new(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowNode {
    Payload(JobSpec),
    Noop(NoopSpec),
    Group(GroupSpec),
    Final(JobSpec),
    FinalWorkflow(WorkflowGraph),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoopSpec {
    pub name: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub blocking: bool,
    pub graph: WorkflowGraph,
}

/// Node as it appears on the wire; the kind is checked before the body is
/// decoded so unknown kinds get a precise error.
#[derive(Deserialize)]
struct RawNode {
    kind: String,
    #[serde(flatten)]
    body: Map<String, Value>,
}

impl TryFrom<RawNode> for WorkflowNode {
    type Error = String;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let body = Value::Object(raw.body);
        let decoded = match raw.kind.as_str() {
            "payload" => serde_json::from_value(body).map(WorkflowNode::Payload),
            "noop" => serde_json::from_value(body).map(WorkflowNode::Noop),
            "group" => serde_json::from_value(body).map(WorkflowNode::Group),
            "final" => serde_json::from_value(body).map(WorkflowNode::Final),
            "final_workflow" => serde_json::from_value(body).map(WorkflowNode::FinalWorkflow),
            other => {
                let name = body
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("?")
                    .to_string();
                return Err(WorkflowError::UnsupportedNodeKind {
                    kind: other.to_string(),
                    name,
                }
                .to_string());
            }
        };
        decoded.map_err(|e| format!("invalid '{}' node: {}", raw.kind, e))
    }
}

impl<'de> Deserialize<'de> for WorkflowNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawNode::deserialize(deserializer)?;
        WorkflowNode::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl WorkflowNode {
    pub fn name(&self) -> &str {
        match self {
            WorkflowNode::Payload(job) | WorkflowNode::Final(job) => &job.name,
            WorkflowNode::Noop(noop) => &noop.name,
            WorkflowNode::Group(group) => &group.name,
            WorkflowNode::FinalWorkflow(graph) => &graph.name,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            WorkflowNode::Payload(job) | WorkflowNode::Final(job) => &job.label,
            WorkflowNode::Noop(noop) => &noop.label,
            WorkflowNode::Group(group) => &group.label,
            WorkflowNode::FinalWorkflow(_) => "",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowNode::Payload(_) => "payload",
            WorkflowNode::Noop(_) => "noop",
            WorkflowNode::Group(_) => "group",
            WorkflowNode::Final(_) => "final",
            WorkflowNode::FinalWorkflow(_) => "final_workflow",
        }
    }

    pub fn is_payload(&self) -> bool {
        matches!(self, WorkflowNode::Payload(_))
    }

    pub fn is_final(&self) -> bool {
        matches!(self, WorkflowNode::Final(_) | WorkflowNode::FinalWorkflow(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Executable {
    pub src_uri: String,
    pub transfer_executable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RetryUnlessExit {
    Code(i64),
    Codes(Vec<i64>),
    Invalid(Value),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptSpec {
    pub executable: String,
    #[serde(default)]
    pub arguments: String,
    /// `(status, seconds)`: rerun the script later when it exits with status.
    #[serde(default)]
    pub defer: Option<(i64, i64)>,
}

/// Files whose logical content spans several physical files under one
/// directory. Only `entry` is referenced on the command line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileBundle {
    pub entry: String,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowFile {
    pub name: String,
    pub src_uri: String,
    #[serde(default = "default_true")]
    pub wms_transfer: bool,
    #[serde(default)]
    pub job_shared: bool,
    #[serde(default)]
    pub bundle: Option<FileBundle>,
}

fn default_true() -> bool {
    true
}

impl WorkflowFile {
    pub fn new(name: impl Into<String>, src_uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            src_uri: src_uri.into(),
            wms_transfer: true,
            job_shared: false,
            bundle: None,
        }
    }

    /// File name a job sees after the scheduler copied the file in.
    pub fn basename(&self) -> String {
        if let Some(bundle) = &self.bundle {
            return bundle.entry.clone();
        }
        Path::new(&self.src_uri)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.src_uri.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSpec {
    pub name: String,
    pub label: String,
    pub tags: BTreeMap<String, String>,
    pub compute_site: Option<String>,

    pub executable: Executable,
    pub arguments: Option<String>,
    pub cmdvals: BTreeMap<String, Value>,
    pub environment: BTreeMap<String, Value>,

    pub request_cpus: Option<i64>,
    pub request_memory: Option<i64>,
    pub request_memory_max: Option<i64>,
    pub memory_multiplier: Option<f64>,
    pub request_disk: Option<i64>,

    pub priority: Option<Value>,
    pub category: Option<String>,
    pub mail_to: Option<String>,
    pub when_to_mail: Option<String>,
    pub accounting_group: Option<String>,
    pub accounting_user: Option<String>,
    pub concurrency_limit: Option<String>,

    pub number_of_retries: Option<i64>,
    pub retry_unless_exit: Option<RetryUnlessExit>,

    pub abort_on_value: Option<i64>,
    pub abort_return_value: Option<i64>,
    pub pre_script: Option<ScriptSpec>,
    pub post_script: Option<ScriptSpec>,

    pub profile: BTreeMap<String, Value>,
    pub attrs: BTreeMap<String, Value>,
    pub quanta_counts: BTreeMap<String, i64>,

    pub inputs: Vec<WorkflowFile>,
    pub outputs: Vec<WorkflowFile>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            ..Default::default()
        }
    }
}

impl WorkflowGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Reads a graph serialised as JSON.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs_err::read_to_string(path).map_err(|source| ConfigError::PathIo {
            path: path.to_path_buf(),
            source,
        })?;
        let graph: WorkflowGraph = serde_json::from_str(&text)?;
        tracing::debug!(
            "Loaded workflow '{}' ({} nodes) from '{}'",
            graph.name,
            graph.nodes.len(),
            path.display()
        );
        Ok(graph)
    }

    pub fn node(&self, name: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    /// Every node except the final one, in declaration order.
    pub fn body(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.nodes.iter().filter(|n| !n.is_final())
    }

    pub fn final_node(&self) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.is_final())
    }

    pub fn successors<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a WorkflowNode> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.parent == name)
            .filter_map(move |e| self.node(&e.child))
    }

    pub fn predecessors<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a WorkflowNode> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.child == name)
            .filter_map(move |e| self.node(&e.parent))
    }

    /// Per-label task counts over every job, groups included.
    pub fn quanta_counts(&self) -> CountSummary {
        let mut counts = CountSummary::new();
        self.collect_counts(&mut counts, &|job: &JobSpec, counts: &mut CountSummary| {
            for (label, n) in &job.quanta_counts {
                counts.add(label, *n);
            }
        });
        counts
    }

    /// Per-label job counts over every job, groups included.
    pub fn job_counts(&self) -> CountSummary {
        let mut counts = CountSummary::new();
        self.collect_counts(&mut counts, &|job: &JobSpec, counts: &mut CountSummary| {
            counts.add(&job.label, 1);
        });
        counts
    }

    fn collect_counts(&self, counts: &mut CountSummary, visit: &dyn Fn(&JobSpec, &mut CountSummary)) {
        for node in self.body() {
            match node {
                WorkflowNode::Payload(job) => visit(job, counts),
                WorkflowNode::Group(group) => group.graph.collect_counts(counts, visit),
                _ => {}
            }
        }
        if let Some(WorkflowNode::Final(job)) = self.final_node() {
            visit(job, counts);
        }
    }

    /// Rejects graphs the builder cannot translate faithfully. Groups are
    /// checked recursively.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let mut seen = BTreeSet::new();
        for node in &self.nodes {
            if !seen.insert(node.name()) {
                return Err(WorkflowError::DuplicateNode {
                    workflow: self.name.clone(),
                    name: node.name().to_string(),
                });
            }
        }

        let finals: Vec<&WorkflowNode> = self.nodes.iter().filter(|n| n.is_final()).collect();
        if finals.len() > 1 {
            return Err(WorkflowError::MultipleFinalJobs {
                workflow: self.name.clone(),
                names: finals.iter().map(|n| n.name().to_string()).collect(),
            });
        }
        if let Some(WorkflowNode::FinalWorkflow(graph)) = finals.first() {
            return Err(WorkflowError::UnsupportedFinalWorkflow(graph.name.clone()));
        }

        for edge in &self.edges {
            if !seen.contains(edge.parent.as_str()) || !seen.contains(edge.child.as_str()) {
                return Err(WorkflowError::DanglingEdge {
                    workflow: self.name.clone(),
                    parent: edge.parent.clone(),
                    child: edge.child.clone(),
                });
            }
            for end in [&edge.parent, &edge.child] {
                if self.node(end).is_some_and(WorkflowNode::is_final) {
                    return Err(WorkflowError::FinalWithEdges(end.clone()));
                }
            }
        }

        for node in &self.nodes {
            if let WorkflowNode::Group(group) = node {
                group.graph.validate()?;
            }
        }
        Ok(())
    }
}
