use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on path '{path}': {source}")]
    PathIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    General(String),

    #[error("Could not determine HOME directory.")]
    HomeDirectoryNotFound,

    #[error("Failed to expand '{value}': {reason}")]
    Expansion { value: String, reason: String },
}

/// Problems with a workflow description that make the produced submission
/// artifacts wrong. These are never worked around.
#[derive(Error, Debug, PartialEq)]
pub enum WorkflowError {
    #[error("retryUnlessExit must be an integer or a list of integers (job '{job}', got {value}).")]
    InvalidRetryUnlessExit { job: String, value: String },

    #[error("Unsupported workflow node type '{kind}' ({name})")]
    UnsupportedNodeKind { kind: String, name: String },

    #[error("Workflow '{workflow}' has more than one final job: {}", names.join(", "))]
    MultipleFinalJobs { workflow: String, names: Vec<String> },

    #[error("Final job '{0}' is a nested workflow, which is not supported")]
    UnsupportedFinalWorkflow(String),

    #[error("Final job '{0}' must not have successors or predecessors")]
    FinalWithEdges(String),

    #[error("Workflow '{workflow}' contains more than one node named '{name}'")]
    DuplicateNode { workflow: String, name: String },

    #[error("Edge {parent} -> {child} references an unknown node in workflow '{workflow}'")]
    DanglingEdge {
        workflow: String,
        parent: String,
        child: String,
    },

    #[error("HTCondor plugin cannot transfer directories locally within job {0}")]
    DirectoryTransfer(String),

    #[error("Input file '{uri}' of job '{job}' is not located under the submit directory '{root}'")]
    InputOutsideSubmitRoot {
        job: String,
        uri: String,
        root: String,
    },

    #[error("Memory autoscaling enabled for job '{0}', but automatic detection of the memory limit failed; setting it explicitly with 'memory_limit' or changing worker node search pattern 'execute_machines_pattern' might help.")]
    MissingMemoryLimit(String),

    #[error("Could not replace command variable '{variable}' in arguments of job '{job}'")]
    UnresolvedCommandVariable { job: String, variable: String },
}

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Could not find HTCondor files in '{0}'")]
    FilesNotFound(PathBuf),

    #[error("File matching '{pattern}' not found in '{dir}'")]
    MissingFile { dir: PathBuf, pattern: String },

    #[error("Malformed record in '{path}' at line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<std::io::Error> for RecordError {
    fn from(err: std::io::Error) -> Self {
        RecordError::Config(ConfigError::Io(err))
    }
}

impl From<serde_json::Error> for RecordError {
    fn from(err: serde_json::Error) -> Self {
        RecordError::Config(ConfigError::Json(err))
    }
}
