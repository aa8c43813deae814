use super::{group_by_schedd, parse_json_ads, ScheddScope, Scheduler, LOCAL_SCHEDD};
use crate::error::{ClientError, Result};
use htcflow_core::classad::{classad_literal, ClassAd, ScheddJobs};
use htcflow_core::constants::suffixes;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Directory holding the HTCondor command-line tools. The tools are looked
/// up on `PATH` when unset.
pub const CONDOR_BIN_ENV: &str = "HTCFLOW_CONDOR_BIN";

/// Attributes every projection carries so records can be keyed.
const KEY_ATTRS: [&str; 3] = ["ClusterId", "ProcId", "GlobalJobId"];

/// [`Scheduler`] backed by the HTCondor command-line tools.
#[derive(Debug, Clone, Default)]
pub struct CondorCli {
    bin_dir: Option<PathBuf>,
}

impl CondorCli {
    pub fn new() -> Self {
        Self {
            bin_dir: std::env::var_os(CONDOR_BIN_ENV).map(PathBuf::from),
        }
    }

    pub fn with_bin_dir(bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: Some(bin_dir.into()),
        }
    }

    fn tool(&self, name: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) if dir.join(name).exists() => dir.join(name),
            _ => PathBuf::from(name),
        }
    }

    fn run(&self, command: &str, args: &[String], cwd: Option<&Path>) -> Result<String> {
        let mut cmd = Command::new(self.tool(command));
        cmd.args(args);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        htcflow_core::logging::log_command(&cmd);

        let output = cmd.output().map_err(|e| ClientError::CommandFailed {
            command: command.to_string(),
            stderr: e.to_string(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClientError::CommandFailed {
                command: command.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Runs a `-json` query tool once per daemon in `scope`.
    fn query_tool(&self, command: &str, scope: &ScheddScope, args: Vec<String>) -> Result<ScheddJobs> {
        let mut found = ScheddJobs::new();
        match scope {
            ScheddScope::Local => {
                let text = self.run(command, &args, None)?;
                found = group_by_schedd(parse_json_ads(command, &text)?, LOCAL_SCHEDD);
            }
            ScheddScope::Named(names) => {
                for name in names {
                    let mut named_args = vec!["-name".to_string(), name.clone()];
                    named_args.extend(args.iter().cloned());
                    let text = self.run(command, &named_args, None)?;
                    for (schedd, jobs) in group_by_schedd(parse_json_ads(command, &text)?, name) {
                        found.entry(schedd).or_default().extend(jobs);
                    }
                }
            }
        }
        Ok(found)
    }
}

fn projection_args(projection: &[&str]) -> Vec<String> {
    if projection.is_empty() {
        return Vec::new();
    }
    let mut attrs: Vec<&str> = KEY_ATTRS.to_vec();
    attrs.extend(projection.iter().filter(|a| !KEY_ATTRS.contains(a)));
    vec!["-attributes".to_string(), attrs.join(",")]
}

/// `condor_submit -terse` prints `first - last` job ids.
fn parse_terse_cluster(text: &str) -> Option<i64> {
    let first = text.split_whitespace().next()?;
    first.split('.').next()?.parse().ok()
}

impl Scheduler for CondorCli {
    fn locate_schedds(&self, all: bool) -> Result<ScheddScope> {
        if !all {
            return Ok(ScheddScope::Local);
        }
        let args = ["-schedd", "-af", "Name"].map(String::from);
        let text = self.run("condor_status", &args, None)?;
        let names: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        tracing::debug!("Located scheduler daemons: {:?}", names);
        Ok(ScheddScope::Named(names))
    }

    fn query(&self, scope: &ScheddScope, constraint: &str, projection: &[&str]) -> Result<ScheddJobs> {
        let mut args = vec![
            "-allusers".to_string(),
            "-json".to_string(),
            "-constraint".to_string(),
            constraint.to_string(),
        ];
        args.extend(projection_args(projection));
        self.query_tool("condor_q", scope, args)
    }

    fn history(
        &self,
        scope: &ScheddScope,
        constraint: &str,
        since: Option<i64>,
        projection: &[&str],
    ) -> Result<ScheddJobs> {
        let mut args = vec![
            "-json".to_string(),
            "-constraint".to_string(),
            constraint.to_string(),
        ];
        if let Some(since) = since {
            args.push("-since".to_string());
            args.push(format!("CompletionDate != 0 && CompletionDate < {}", since));
        }
        args.extend(projection_args(projection));
        self.query_tool("condor_history", scope, args)
    }

    fn create_dag_submit(&self, dag_file: &Path, attrs: &BTreeMap<String, Value>) -> Result<PathBuf> {
        let dir = dag_file.parent().unwrap_or_else(|| Path::new("."));
        let file_name = dag_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ClientError::DagFileNotFound(dag_file.to_path_buf()))?;

        let mut args: Vec<String> = [
            "-f",
            "-no_submit",
            "-notification",
            "never",
            "-autorescue",
            "1",
            "-UseDagDir",
            "-no_recurse",
        ]
        .map(String::from)
        .to_vec();
        for (key, value) in attrs {
            args.push("-append".to_string());
            args.push(format!("+{} = {}", key, classad_literal(value)));
        }
        args.push(file_name.clone());

        self.run("condor_submit_dag", &args, Some(dir))?;
        let stem = file_name.trim_end_matches(suffixes::DAG);
        let submit_file = dir.join(format!("{}{}", stem, suffixes::DAG_SUBMIT));
        tracing::debug!("DAGMan submit description: {}", submit_file.display());
        Ok(submit_file)
    }

    fn submit(&self, submit_file: &Path) -> Result<ScheddJobs> {
        let dir = submit_file.parent().unwrap_or_else(|| Path::new("."));
        let file_name = submit_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let args = vec!["-terse".to_string(), file_name];
        let text = self.run("condor_submit", &args, Some(dir))?;
        let cluster = parse_terse_cluster(&text).ok_or_else(|| ClientError::ParseOutput {
            command: "condor_submit".to_string(),
            reason: format!("no job id in '{}'", text.trim()),
        })?;
        tracing::info!("Submitted cluster {}", cluster);

        let found = self.query(&ScheddScope::Local, &format!("ClusterId == {}", cluster), &[])?;
        if !found.is_empty() {
            return Ok(found);
        }
        let mut ad = ClassAd::new();
        ad.insert("ClusterId", cluster);
        ad.insert("ProcId", 0);
        Ok(group_by_schedd(vec![ad], LOCAL_SCHEDD))
    }

    fn machine_ads(&self, constraint: &str, projection: &[&str]) -> Result<Vec<ClassAd>> {
        let mut args = vec![
            "-json".to_string(),
            "-constraint".to_string(),
            constraint.to_string(),
        ];
        if !projection.is_empty() {
            args.push("-attributes".to_string());
            args.push(projection.join(","));
        }
        let text = self.run("condor_status", &args, None)?;
        parse_json_ads("condor_status", &text)
    }
}
