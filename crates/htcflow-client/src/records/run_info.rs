use htcflow_core::classad::ClassAd;
use htcflow_core::constants::{attrs, dirs, suffixes};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[allow(clippy::unwrap_used)]
static BPS_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+(bps_\S+)\s*=\s*(.+)$").unwrap());

/// Marks a run whose details could not be recovered.
const UNAVAILABLE: &str = "Unavailable";

fn first_submit_file(jobs_dir: &Path) -> Result<Option<PathBuf>, walkdir::Error> {
    for entry in WalkDir::new(jobs_dir).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.file_name().to_string_lossy().ends_with(suffixes::SUB)
        {
            return Ok(Some(entry.into_path()));
        }
    }
    Ok(None)
}

/// Fills in the `bps_*` run attributes of a DAGMan job from the first job
/// submit file of the run, for runs whose DAGMan job lacks them.
pub fn add_run_info(wms_path: &Path, job: &mut ClassAd) {
    let subfile = match first_submit_file(&wms_path.join(dirs::JOBS)) {
        Ok(Some(path)) => path,
        Ok(None) => {
            job.insert(attrs::RUN, UNAVAILABLE);
            return;
        }
        Err(e) => {
            tracing::debug!("Could not search for job submit files: {}", e);
            job.insert(attrs::RUN, UNAVAILABLE);
            return;
        }
    };
    tracing::debug!("Reading run information from {}", subfile.display());

    let text = match fs_err::read_to_string(&subfile) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            job.insert(attrs::RUN, "PermissionError");
            return;
        }
        Err(e) => {
            tracing::warn!("{}", e);
            job.insert(attrs::RUN, UNAVAILABLE);
            return;
        }
    };
    for line in text.lines().filter(|l| l.starts_with("+bps_")) {
        match BPS_ATTR_RE.captures(line) {
            Some(caps) => job.insert(&caps[1], caps[2].replace('"', "")),
            None => tracing::debug!("Could not parse attribute: {}", line),
        }
    }
}
