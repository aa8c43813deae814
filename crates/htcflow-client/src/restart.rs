//! Restarting a failed run from its rescue DAG.
//!
//! Files of the previous attempt are moved to `backups/NNN` so that the new
//! DAGMan job starts with fresh logs. Nested DAGs of non-blocking groups
//! that failed are marked for another run in the rescue DAG.

use crate::error::{ClientError, Result};
use crate::ids::{wms_id_to_dir, WmsIdType};
use crate::records::{find_file, is_missing, read_dag_status, rescue_files, write_dag_info};
use crate::report::DAGMAN_CONSTRAINT;
use crate::scheduler::{first_job, ScheddScope, Scheduler};
use htcflow_core::constants::{attrs, dirs, prefixes, suffixes};
use std::path::{Path, PathBuf};

/// Files DAGMan writes for every attempt.
const ATTEMPT_SUFFIXES: [&str; 5] = [
    suffixes::DAGMAN_LOG,
    suffixes::DAGMAN_OUT,
    suffixes::NODES_LOG,
    suffixes::NODE_STATUS,
    suffixes::METRICS,
];

/// Suffix of the file a non-blocking group's POST script leaves its return
/// code in.
const GROUP_STATUS_SUFFIX: &str = ".status";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartOutcome {
    /// `ClusterId.ProcId` of the new DAGMan job.
    pub run_id: Option<String>,
    pub run_name: Option<String>,
    pub message: String,
}

impl RestartOutcome {
    fn refused(message: impl Into<String>) -> Self {
        RestartOutcome {
            message: message.into(),
            ..Default::default()
        }
    }
}

pub struct RestartCoordinator<'a> {
    scheduler: &'a dyn Scheduler,
}

impl<'a> RestartCoordinator<'a> {
    pub fn new(scheduler: &'a dyn Scheduler) -> Self {
        RestartCoordinator { scheduler }
    }

    /// Resubmits the run with the given id. Conditions that make a restart
    /// pointless or unsafe are reported in the outcome's message, not as
    /// errors.
    pub fn restart(&self, wms_id: &str) -> Result<RestartOutcome> {
        let (wms_path, id_type) = wms_id_to_dir(self.scheduler, wms_id)?;
        let Some(wms_path) = wms_path else {
            return Ok(RestartOutcome::refused(format!(
                "workflow with run id '{}' not found. \
                 Hint: use run's submit directory as the id instead",
                wms_id
            )));
        };
        if matches!(id_type, WmsIdType::Local | WmsIdType::Global) && !wms_path.is_dir() {
            return Ok(RestartOutcome::refused(format!(
                "submit directory '{}' for run id '{}' not found.",
                wms_path.display(),
                wms_id
            )));
        }
        tracing::info!("Restarting workflow from directory '{}'", wms_path.display());

        if rescue_files(&wms_path)?.is_empty() {
            return Ok(RestartOutcome::refused(format!(
                "HTCondor rescue DAG(s) not found in '{}'",
                wms_path.display()
            )));
        }

        tracing::info!("Checking if the workflow is already in the job queue");
        let constraint = format!(
            "{} && Iwd == \"{}\"",
            DAGMAN_CONSTRAINT,
            wms_path.display()
        );
        let queued = self
            .scheduler
            .query(&ScheddScope::Local, &constraint, &["GlobalJobId"])?;
        if let Some((_, id, ad)) = first_job(&queued) {
            let global_id = ad
                .get_string("GlobalJobId")
                .unwrap_or_else(|| id.to_string());
            return Ok(RestartOutcome::refused(format!(
                "Workflow already in the job queue (global job id: '{}')",
                global_id
            )));
        }

        tracing::info!("Checking the execution status of the workflow");
        let status = read_dag_status(&wms_path)?;
        let total = status.get_i64("NodesTotal").unwrap_or(0);
        if total == 0 {
            tracing::warn!(
                "Cannot determine the execution status of the workflow, continuing with restart regardless"
            );
        } else if status.get_i64("NodesDone") == Some(total) {
            return Ok(RestartOutcome::refused("All jobs in the workflow finished successfully"));
        }

        tracing::info!("Backing up select HTCondor files from previous run attempt");
        let rescue = backup_files(&wms_path)?;
        if let Some(rescue) = rescue.filter(|_| wms_path.join(dirs::SUBDAGS).is_dir()) {
            update_rescue_file(&wms_path, &rescue)?;
        }

        let submit_file = match find_file(&wms_path, suffixes::DAG_SUBMIT) {
            Ok(path) => path,
            Err(e) if is_missing(&e) => {
                return Ok(RestartOutcome::refused(format!(
                    "DAGMan submit description file not found in '{}'",
                    wms_path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!("Submitting the workflow");
        let submitted = self.scheduler.submit(&submit_file)?;
        let Some((_, id, ad)) = first_job(&submitted) else {
            return Ok(RestartOutcome::refused("DAGMan job information unavailable"));
        };
        let run_name = ad
            .get_string(attrs::RUN)
            .unwrap_or_else(|| submit_stem(&submit_file));
        write_dag_info(
            &wms_path.join(format!("{}{}", run_name, suffixes::INFO_JSON)),
            &submitted,
        )?;
        Ok(RestartOutcome {
            run_id: Some(id.to_string()),
            run_name: Some(run_name),
            message: String::new(),
        })
    }
}

fn submit_stem(submit_file: &Path) -> String {
    submit_file
        .file_name()
        .map(|n| n.to_string_lossy())
        .map(|n| n.trim_end_matches(suffixes::DAG_SUBMIT).to_string())
        .unwrap_or_default()
}

fn file_name(path: &Path) -> Result<&std::ffi::OsStr> {
    path.file_name().ok_or_else(|| {
        ClientError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("'{}' has no file name", path.display()),
        ))
    })
}

/// Moves the files of the previous attempt in `dir` to `backups/NNN` and
/// copies the rescue DAGs there. Returns the newest rescue DAG, which stays
/// in place for DAGMan to pick up.
///
/// `NNN` is the number of rescue DAGs, or the next unused number in
/// directories without any.
pub fn backup_files(dir: &Path) -> Result<Option<PathBuf>> {
    let rescues = rescue_files(dir)?;
    let backups = dir.join(dirs::BACKUPS);
    let number = if rescues.is_empty() {
        let existing = match fs_err::read_dir(&backups) {
            Ok(entries) => entries.filter_map(|e| e.ok()).count(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        existing + 1
    } else {
        rescues.len()
    };
    let dest = backups.join(format!("{:03}", number.min(999)));
    if dest.exists() {
        return Err(ClientError::BackupExists(dest));
    }
    fs_err::create_dir_all(&dest)?;
    tracing::debug!("Backing up files of {} to {}", dir.display(), dest.display());

    for entry in fs_err::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        if ATTEMPT_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            fs_err::rename(&path, dest.join(&name))?;
        }
    }
    for rescue in &rescues {
        fs_err::copy(rescue, dest.join(file_name(rescue)?))?;
    }
    Ok(rescues.last().cloned())
}

/// Marks failed non-blocking groups as not done in the rescue DAG so that
/// their nested DAGs run again.
///
/// A group counts as failed when its recorded return code is not `0`. The
/// nested DAG's files are backed up and the recorded code is removed.
pub fn update_rescue_file(wms_path: &Path, rescue: &Path) -> Result<()> {
    let text = fs_err::read_to_string(rescue)?;
    let mut updated = String::with_capacity(text.len());
    let mut changed = false;
    for line in text.lines() {
        let group = line
            .strip_prefix("DONE ")
            .map(str::trim)
            .filter(|node| node.starts_with(prefixes::WMS));
        if let Some(group) = group {
            let group_dir = wms_path.join(dirs::SUBDAGS).join(group);
            let status_file = group_dir.join(format!("{}{}", group, GROUP_STATUS_SUFFIX));
            if group_failed(&status_file)? {
                tracing::info!("Group {} failed previously and will run again", group);
                backup_files(&group_dir)?;
                fs_err::remove_file(&status_file)?;
                updated.push_str("# ");
                updated.push_str(line);
                updated.push('\n');
                changed = true;
                continue;
            }
        }
        updated.push_str(line);
        updated.push('\n');
    }

    if changed {
        let tmp = rescue.with_extension("tmp");
        fs_err::write(&tmp, updated)?;
        fs_err::rename(&tmp, rescue)?;
    }
    Ok(())
}

fn group_failed(status_file: &Path) -> Result<bool> {
    match fs_err::read_to_string(status_file) {
        Ok(code) => Ok(code.trim() != "0"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
