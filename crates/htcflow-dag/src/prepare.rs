use crate::builder::DagBuilder;
use crate::dag::Dag;
use crate::error::Result;
use crate::provision::Provisioner;
use crate::site::PoolInfo;
use crate::writer::DagWriter;
use htcflow_core::config::Config;
use htcflow_core::constants::scripts;
use htcflow_core::workflow::WorkflowGraph;
use std::path::{Path, PathBuf};

/// Result of preparing a workflow for submission.
#[derive(Debug)]
pub struct Prepared {
    pub dag: Dag,
    pub dag_file: PathBuf,
}

/// Translates `graph` and publishes the submit directory `submit_dir`.
pub fn prepare(
    config: &Config,
    pool: &dyn PoolInfo,
    graph: &WorkflowGraph,
    submit_dir: &Path,
) -> Result<Prepared> {
    let submit_dir = std::path::absolute(submit_dir)?;
    tracing::info!("Preparing workflow '{}' in {}", graph.name, submit_dir.display());

    let dag = DagBuilder::new(config, pool, &submit_dir).build(graph)?;

    let mut writer = DagWriter::new(&submit_dir);
    if config.provisioning.enabled {
        let provisioner = Provisioner::new(&config.provisioning);
        writer.add_file(scripts::PROVISIONING, provisioner.script()?, true);
        provisioner.configure(false)?;
    }
    let dag_file = writer.write(&dag)?;
    Ok(Prepared { dag, dag_file })
}
