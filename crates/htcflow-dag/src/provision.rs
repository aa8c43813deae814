use crate::dag::{Dag, SubmitJob};
use crate::error::{DagError, Result};
use fs_err as fs;
use htcflow_core::config::ProvisioningConfig;
use htcflow_core::constants::{attrs, dirs, job_types, labels, scripts};
use serde_json::Value;
use std::path::PathBuf;

/// Adds a resource provisioning service job to a workflow and prepares the
/// files it needs.
pub struct Provisioner<'a> {
    config: &'a ProvisioningConfig,
}

impl<'a> Provisioner<'a> {
    pub fn new(config: &'a ProvisioningConfig) -> Self {
        Self { config }
    }

    /// Content of the provisioning script, written as-is.
    pub fn script(&self) -> Result<&'a str> {
        self.config
            .script
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(DagError::MissingProvisioningScript)
    }

    /// Writes the script configuration file unless one already exists.
    /// With `overwrite`, an existing file is kept next to the new one with a
    /// `.bak` suffix. Returns the path of the configuration file, if any.
    pub fn configure(&self, overwrite: bool) -> Result<Option<PathBuf>> {
        let Some(path) = self.config.expanded_script_config_path()? else {
            return Ok(None);
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        if path.is_file() {
            if !overwrite {
                tracing::info!("Using existing provisioning configuration from {}.", path.display());
                return Ok(Some(path));
            }
            let mut backup = path.clone().into_os_string();
            backup.push(".bak");
            let backup = PathBuf::from(backup);
            tracing::info!(
                "Saving a copy of the existing provisioning configuration to {}",
                backup.display()
            );
            fs::rename(&path, &backup)?;
        } else {
            tracing::warn!(
                "Configuration file {} required for provisioning not found. \
                 Creating a new one from the 'script_config' template",
                path.display()
            );
        }

        let content = self.config.expanded_script_config()?.unwrap_or_default();
        tracing::info!("Saving provisioning configuration to {}", path.display());
        fs::write(&path, content)?;
        Ok(Some(path))
    }

    /// Adds the service job to the DAG and accounts for it in the job
    /// summary.
    pub fn provision(&self, dag: &mut Dag) -> Result<()> {
        let name = labels::PROVISIONING;
        let mut job = SubmitJob::new(name, name, job_types::SERVICE);
        let subfile = format!("{}/{}/{}.sub", dirs::JOBS, name, name);
        job.add_commands([
            ("universe", "local".to_string()),
            ("executable", scripts::PROVISIONING.to_string()),
            ("should_transfer_files", "NO".to_string()),
            ("getenv", "True".to_string()),
            ("output", format!("{}.$(Cluster).out", subfile)),
            ("error", format!("{}.$(Cluster).err", subfile)),
            ("log", format!("{}.$(Cluster).log", subfile)),
        ]);
        job.subfile = Some(subfile);
        job.set_attr(attrs::JOB_NAME, name);
        job.set_attr(attrs::JOB_LABEL, name);
        job.set_attr(attrs::JOB_QUANTA, "");
        dag.add_service_job(job)?;

        let summary = match dag.attrs.get(attrs::JOB_SUMMARY) {
            Some(Value::String(s)) if !s.is_empty() => format!("{};{}:1", s, name),
            _ => format!("{}:1", name),
        };
        dag.set_attr(attrs::JOB_SUMMARY, summary);
        dag.set_attr(attrs::PROVISIONING_JOB, name);
        Ok(())
    }
}
