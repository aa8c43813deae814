//! Run identifiers accepted on the command line: a DAGMan job's cluster id,
//! its global job id, or the run's submit directory.

use crate::error::{ClientError, Result};
use crate::scheduler::{first_job, ScheddScope, Scheduler};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WmsIdType {
    Unknown,
    /// `ClusterId` with an optional `.ProcId`.
    Local,
    Global,
    Path,
}

impl fmt::Display for WmsIdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WmsIdType::Unknown => "UNKNOWN",
            WmsIdType::Local => "LOCAL",
            WmsIdType::Global => "GLOBAL",
            WmsIdType::Path => "PATH",
        };
        f.write_str(name)
    }
}

/// Cluster id of a local id (`1163`, `1163.0`).
pub fn local_cluster(wms_id: &str) -> Option<i64> {
    wms_id
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v as i64)
}

pub fn wms_id_type(wms_id: &str) -> WmsIdType {
    if wms_id.trim().is_empty() {
        WmsIdType::Unknown
    } else if local_cluster(wms_id).is_some() {
        WmsIdType::Local
    } else if Path::new(wms_id).is_dir() {
        WmsIdType::Path
    } else {
        WmsIdType::Global
    }
}

/// Submit directory candidate for the run with the given id.
///
/// The directory is neither checked for existence nor for being a submit
/// directory. `None` means the scheduler does not know the id.
pub fn wms_id_to_dir(scheduler: &dyn Scheduler, wms_id: &str) -> Result<(Option<PathBuf>, WmsIdType)> {
    let id_type = wms_id_type(wms_id);
    let (scope, constraint) = match id_type {
        WmsIdType::Local => {
            let cluster = local_cluster(wms_id).unwrap_or_default();
            (ScheddScope::Local, format!("ClusterId == {}", cluster))
        }
        WmsIdType::Global => (
            scheduler.locate_schedds(true)?,
            format!("GlobalJobId == \"{}\"", wms_id),
        ),
        WmsIdType::Path => {
            let path = fs_err::canonicalize(wms_id)?;
            return Ok((Some(path), id_type));
        }
        WmsIdType::Unknown => return Err(ClientError::UnknownIdType(wms_id.to_string())),
    };

    let found = scheduler.history(&scope, &constraint, None, &["Iwd"])?;
    let path = first_job(&found)
        .and_then(|(_, _, ad)| ad.get_str("Iwd"))
        .map(PathBuf::from);
    tracing::debug!("Run id '{}' ({}) maps to {:?}", wms_id, id_type, path);
    Ok((path, id_type))
}
