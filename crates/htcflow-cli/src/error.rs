use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] htcflow_core::errors::ConfigError),

    #[error(transparent)]
    Workflow(#[from] htcflow_core::errors::WorkflowError),

    #[error(transparent)]
    Dag(#[from] htcflow_dag::DagError),

    #[error(transparent)]
    Client(#[from] htcflow_client::ClientError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    RestartRefused(String),
}
