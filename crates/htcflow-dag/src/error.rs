use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DagError {
    #[error(transparent)]
    Workflow(#[from] htcflow_core::errors::WorkflowError),

    #[error(transparent)]
    Config(#[from] htcflow_core::errors::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job '{name}' already exists in DAG '{dag}'")]
    DuplicateJob { dag: String, name: String },

    #[error("Job '{name}' referenced by an edge does not exist in DAG '{dag}'")]
    UnknownJob { dag: String, name: String },

    #[error("Failed to query the pool for execute machines: {0}")]
    PoolQuery(String),

    #[error("Submit directory '{0}' already exists")]
    TargetExists(PathBuf),

    #[error("Failed to publish submit directory '{target}': {source}")]
    Publish {
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Provisioning is enabled, but no provisioning script is configured")]
    MissingProvisioningScript,
}

pub type Result<T> = std::result::Result<T, DagError>;
