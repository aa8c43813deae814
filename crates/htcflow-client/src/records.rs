//! Readers for the files HTCondor and DAGMan leave in a submit directory.
//!
//! Every reader returns job records keyed by job id, ready to be merged with
//! [`htcflow_core::classad::update_jobs`].

use htcflow_core::errors::RecordError;
use std::path::{Path, PathBuf};

pub mod dag_file;
pub mod dagman_out;
pub mod eventlog;
pub mod info;
pub mod node_status;
pub mod run_info;

pub use dag_file::{read_dag_attrs, summary_from_dag, DagSummary};
pub use dagman_out::check_dagman_output;
pub use eventlog::{read_dag_log, read_event_log};
pub use info::{read_dag_info, write_dag_info};
pub use node_status::{read_dag_status, read_node_status};
pub use run_info::add_run_info;

/// Files directly inside `dir` whose name satisfies `accept`, sorted by
/// name.
pub fn files_matching(dir: &Path, accept: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>, RecordError> {
    let mut found: Vec<PathBuf> = fs_err::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(&accept)
        })
        .collect();
    found.sort();
    Ok(found)
}

/// The first file in `dir` whose name ends with `suffix`.
pub fn find_file(dir: &Path, suffix: &str) -> Result<PathBuf, RecordError> {
    let missing = || RecordError::MissingFile {
        dir: dir.to_path_buf(),
        pattern: format!("*{}", suffix),
    };
    if !dir.is_dir() {
        return Err(missing());
    }
    files_matching(dir, |name| name.ends_with(suffix))?
        .into_iter()
        .next()
        .ok_or_else(missing)
}

/// Rescue DAGs (`*.dag.rescue001`, ...) in `dir`, oldest first.
pub fn rescue_files(dir: &Path) -> Result<Vec<PathBuf>, RecordError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    files_matching(dir, |name| name.contains(".dag.rescue"))
}

pub fn is_missing(err: &RecordError) -> bool {
    matches!(err, RecordError::MissingFile { .. } | RecordError::FilesNotFound(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_find_file_picks_first_match() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.dag.dagman.log"), "").unwrap();
        std::fs::write(dir.path().join("a.dag.dagman.log"), "").unwrap();
        std::fs::write(dir.path().join("a.dag"), "").unwrap();
        assert_eq!(
            find_file(dir.path(), ".dag.dagman.log").unwrap(),
            dir.path().join("a.dag.dagman.log")
        );
    }

    #[test]
    fn test_find_file_reports_pattern_and_directory() {
        let dir = tempdir().unwrap();
        let err = find_file(dir.path(), ".node_status").unwrap_err();
        assert!(is_missing(&err));
        let text = err.to_string();
        assert!(text.contains("*.node_status"));
        assert!(text.contains(&dir.path().display().to_string()));
        assert!(is_missing(&find_file(&dir.path().join("absent"), ".dag").unwrap_err()));
    }

    #[test]
    fn test_rescue_files_sorted() {
        let dir = tempdir().unwrap();
        for name in ["u.dag.rescue002", "u.dag.rescue001", "u.dag"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let found = rescue_files(dir.path()).unwrap();
        assert_eq!(
            found,
            vec![dir.path().join("u.dag.rescue001"), dir.path().join("u.dag.rescue002")]
        );
        assert!(rescue_files(&dir.path().join("absent")).unwrap().is_empty());
    }
}
