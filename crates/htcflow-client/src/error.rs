use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] htcflow_core::errors::ConfigError),

    #[error(transparent)]
    Record(#[from] htcflow_core::errors::RecordError),

    #[error(transparent)]
    Workflow(#[from] htcflow_core::errors::WorkflowError),

    #[error(transparent)]
    Dag(#[from] htcflow_dag::DagError),

    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Command '{command}' failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Could not parse the output of '{command}': {reason}")]
    ParseOutput { command: String, reason: String },

    #[error("Invalid job id type: {0}")]
    UnknownIdType(String),

    #[error("No DAG file found in '{0}'")]
    DagFileNotFound(PathBuf),

    #[error("Backup directory '{0}' already exists")]
    BackupExists(PathBuf),
}

pub type Result<T> = std::result::Result<T, ClientError>;
