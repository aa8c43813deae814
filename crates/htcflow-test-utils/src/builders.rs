use htcflow_core::classad::ClassAd;
use htcflow_core::workflow::{
    Edge, GroupSpec, JobSpec, NoopSpec, RetryUnlessExit, WorkflowFile, WorkflowGraph, WorkflowNode,
};
use serde_json::Value;

/// A scheduler record from literal attribute pairs.
pub fn classad(pairs: &[(&str, Value)]) -> ClassAd {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

pub struct JobSpecBuilder {
    spec: JobSpec,
}

impl JobSpecBuilder {
    pub fn new(name: &str, label: &str) -> Self {
        let mut spec = JobSpec::new(name, label);
        spec.executable.src_uri = format!("/sw/bin/{}", label);
        spec.quanta_counts.insert(label.to_string(), 1);
        Self { spec }
    }

    pub fn executable(mut self, src_uri: &str) -> Self {
        self.spec.executable.src_uri = src_uri.to_string();
        self
    }

    pub fn arguments(mut self, arguments: &str) -> Self {
        self.spec.arguments = Some(arguments.to_string());
        self
    }

    pub fn cmdval(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.spec.cmdvals.insert(key.to_string(), value.into());
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.spec.environment.insert(key.to_string(), value.into());
        self
    }

    pub fn memory(mut self, request_memory: i64) -> Self {
        self.spec.request_memory = Some(request_memory);
        self
    }

    /// Enables memory autoscaling.
    pub fn memory_autoscale(mut self, multiplier: f64, max: Option<i64>) -> Self {
        self.spec.memory_multiplier = Some(multiplier);
        self.spec.request_memory_max = max;
        self
    }

    pub fn retries(mut self, number_of_retries: i64) -> Self {
        self.spec.number_of_retries = Some(number_of_retries);
        self
    }

    pub fn retry_unless_exit(mut self, codes: &[i64]) -> Self {
        self.spec.retry_unless_exit = Some(RetryUnlessExit::Codes(codes.to_vec()));
        self
    }

    pub fn site(mut self, site: &str) -> Self {
        self.spec.compute_site = Some(site.to_string());
        self
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.spec.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.spec.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn quanta(mut self, label: &str, count: i64) -> Self {
        self.spec.quanta_counts.insert(label.to_string(), count);
        self
    }

    pub fn input(mut self, file: WorkflowFile) -> Self {
        self.spec.inputs.push(file);
        self
    }

    pub fn output(mut self, file: WorkflowFile) -> Self {
        self.spec.outputs.push(file);
        self
    }

    pub fn build(self) -> JobSpec {
        self.spec
    }
}

pub struct WorkflowBuilder {
    graph: WorkflowGraph,
}

impl WorkflowBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            graph: WorkflowGraph::new(name),
        }
    }

    pub fn run_attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.graph.run_attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn job(mut self, job: JobSpecBuilder) -> Self {
        self.graph.nodes.push(WorkflowNode::Payload(job.build()));
        self
    }

    /// Payload job named `name` with the default executable of `label`.
    pub fn payload(self, name: &str, label: &str) -> Self {
        self.job(JobSpecBuilder::new(name, label))
    }

    pub fn noop(mut self, name: &str, label: &str) -> Self {
        self.graph.nodes.push(WorkflowNode::Noop(NoopSpec {
            name: name.to_string(),
            label: label.to_string(),
        }));
        self
    }

    pub fn group(mut self, name: &str, label: &str, blocking: bool, graph: WorkflowGraph) -> Self {
        self.graph.nodes.push(WorkflowNode::Group(GroupSpec {
            name: name.to_string(),
            label: label.to_string(),
            blocking,
            graph,
        }));
        self
    }

    pub fn final_job(mut self, job: JobSpecBuilder) -> Self {
        self.graph.nodes.push(WorkflowNode::Final(job.build()));
        self
    }

    pub fn edge(mut self, parent: &str, child: &str) -> Self {
        self.graph.edges.push(Edge::new(parent, child));
        self
    }

    /// Edges from `parent` to each of `children`.
    pub fn fan_out(mut self, parent: &str, children: &[&str]) -> Self {
        for child in children {
            self.graph.edges.push(Edge::new(parent, *child));
        }
        self
    }

    pub fn build(self) -> WorkflowGraph {
        self.graph
    }
}
