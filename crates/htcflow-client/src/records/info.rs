//! `<run>.info.json`: details about the DAGMan job that only the scheduler
//! knows (`GlobalJobId`, ...), saved next to the run at submission time.

use super::find_file;
use htcflow_core::classad::{ClassAd, JobAds, ScheddJobs};
use htcflow_core::constants::suffixes;
use htcflow_core::errors::RecordError;
use htcflow_core::model::{JobId, ParseJobIdError};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// On-disk layout: schedd name, then `ClusterId.ProcId`, then attributes.
type InfoDoc = BTreeMap<String, BTreeMap<String, ClassAd>>;

const KEPT_ATTRS: [&str; 3] = ["ClusterId", "ProcId", "GlobalJobId"];

fn kept(key: &str) -> bool {
    KEPT_ATTRS.contains(&key) || key.starts_with("bps_")
}

/// Reads the saved DAGMan job records, grouped by scheduler daemon.
pub fn read_dag_info(wms_path: &Path) -> Result<ScheddJobs, RecordError> {
    let path = find_file(wms_path, suffixes::INFO_JSON)?;
    let text = fs_err::read_to_string(&path)?;
    let doc: InfoDoc = serde_json::from_str(&text)?;

    let mut info = ScheddJobs::new();
    for (schedd, jobs) in doc {
        let mut ads = JobAds::new();
        for (id, ad) in jobs {
            let id: JobId = id.parse().map_err(|e: ParseJobIdError| RecordError::Malformed {
                path: path.clone(),
                line: 0,
                reason: e.to_string(),
            })?;
            ads.insert(id, ad);
        }
        info.insert(schedd, ads);
    }
    Ok(info)
}

/// Saves the identifying and `bps_*` attributes of `jobs` to `path`.
pub fn write_dag_info(path: &Path, jobs: &ScheddJobs) -> Result<(), RecordError> {
    let mut doc = Map::new();
    for (schedd, ads) in jobs {
        let mut by_id = Map::new();
        for (id, ad) in ads {
            let attrs: Map<String, Value> = ad
                .iter()
                .filter(|(key, _)| kept(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            by_id.insert(id.to_string(), Value::Object(attrs));
        }
        doc.insert(schedd.clone(), Value::Object(by_id));
    }
    fs_err::write(path, serde_json::to_string_pretty(&Value::Object(doc))?)?;
    tracing::debug!("Saved DAGMan job information to {}", path.display());
    Ok(())
}
