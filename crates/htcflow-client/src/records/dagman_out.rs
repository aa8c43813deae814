use super::find_file;
use htcflow_core::constants::{markers, suffixes};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

#[allow(clippy::unwrap_used)]
static TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d\d/\d\d/\d\d \d\d:\d\d:\d\d\s+").unwrap());

/// Scans the DAGMan output file for problems worth showing next to a report.
/// Returns an empty string when there is nothing to report or no file.
pub fn check_dagman_output(wms_path: &Path) -> String {
    let path = match find_file(wms_path, suffixes::DAGMAN_OUT) {
        Ok(path) => path,
        Err(e) => {
            tracing::debug!("{}", e);
            return String::new();
        }
    };
    let text = match fs_err::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("Could not read DAGMan output: {}", e);
            return String::new();
        }
    };

    let mut last_failure = None;
    for line in text.lines() {
        if line.contains(markers::TMP_SUBMIT) {
            return format!(
                "Cannot submit from /tmp, which HTCondor does not allow; \
                 use a submit directory outside of /tmp (see {})",
                path.display()
            );
        }
        if line.contains(markers::SUBMIT_FAILED) {
            last_failure = Some(line);
        }
    }

    match last_failure {
        Some(line) => format!(
            "Warn: Job submission issues (last: {})",
            TIMESTAMP_RE.replace(line, "").trim()
        ),
        None => String::new(),
    }
}
