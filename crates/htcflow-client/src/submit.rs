use crate::error::{ClientError, Result};
use crate::records::{find_file, is_missing, read_dag_attrs, write_dag_info};
use crate::scheduler::{first_job, Scheduler};
use htcflow_core::constants::{attrs, suffixes};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// `ClusterId.ProcId` of the DAGMan job.
    pub run_id: String,
    pub run_name: String,
    pub submit_dir: PathBuf,
}

/// Submits the workflow prepared in `submit_dir` and records the DAGMan
/// job next to it.
pub fn submit(scheduler: &dyn Scheduler, submit_dir: &Path) -> Result<Submission> {
    let submit_dir = fs_err::canonicalize(submit_dir)?;
    let dag_file = match find_file(&submit_dir, suffixes::DAG) {
        Ok(path) => path,
        Err(e) if is_missing(&e) => return Err(ClientError::DagFileNotFound(submit_dir)),
        Err(e) => return Err(e.into()),
    };

    let dag_attrs = read_dag_attrs(&dag_file)?;
    let attrs: BTreeMap<String, Value> = dag_attrs
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let submit_file = scheduler.create_dag_submit(&dag_file, &attrs)?;
    tracing::info!("Submitting {}", submit_file.display());

    let submitted = scheduler.submit(&submit_file)?;
    let (_, id, ad) = first_job(&submitted).ok_or_else(|| ClientError::ParseOutput {
        command: "condor_submit".to_string(),
        reason: "no job was queued".to_string(),
    })?;
    let run_name = ad
        .get_string(attrs::RUN)
        .or_else(|| dag_attrs.get_string(attrs::RUN))
        .unwrap_or_else(|| dag_stem(&dag_file));
    write_dag_info(
        &submit_dir.join(format!("{}{}", run_name, suffixes::INFO_JSON)),
        &submitted,
    )?;

    tracing::info!("Run {} submitted as {}", run_name, id);
    Ok(Submission {
        run_id: id.to_string(),
        run_name,
        submit_dir,
    })
}

fn dag_stem(dag_file: &Path) -> String {
    dag_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
