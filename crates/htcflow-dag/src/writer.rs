//! Writes a [`Dag`] and every file it references into a submit directory.
//!
//! Everything is written into a staging directory next to the target and
//! the staging directory is renamed onto the target once complete, so a
//! failed write never leaves a half-populated submit directory behind.

use crate::dag::{Dag, ScriptHook, SubmitJob};
use crate::error::{DagError, Result};
use crate::scripts;
use fs_err as fs;
use htcflow_core::classad::classad_literal;
use htcflow_core::constants::{attrs, dirs, job_types, suffixes};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const STAGING_PREFIX: &str = ".htcflow-staging-";

struct ExtraFile {
    path: PathBuf,
    content: String,
    executable: bool,
}

pub struct DagWriter {
    target: PathBuf,
    extra_files: Vec<ExtraFile>,
}

impl DagWriter {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            extra_files: Vec::new(),
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Adds a file, relative to the submit directory, to be published along
    /// with the DAG.
    pub fn add_file(&mut self, path: impl Into<PathBuf>, content: impl Into<String>, executable: bool) {
        self.extra_files.push(ExtraFile {
            path: path.into(),
            content: content.into(),
            executable,
        });
    }

    /// Writes and publishes the submit directory. Returns the path of the
    /// top-level DAG file.
    pub fn write(&self, dag: &Dag) -> Result<PathBuf> {
        let target_exists = self.target.exists();
        if target_exists && fs::read_dir(&self.target)?.next().is_some() {
            return Err(DagError::TargetExists(self.target.clone()));
        }

        let parent = self
            .target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)?;
        let root = staging.path();
        tracing::debug!("Staging submit files in {}", root.display());

        let dag_file = format!("{}{}", dag.name, suffixes::DAG);
        write_dag(root, &root.join(&dag_file), dag, &dag.attrs, false)?;

        let scripts_dir = self.target.join(dirs::SCRIPTS).display().to_string();
        for (name, content, executable) in scripts::helper_files(&scripts_dir) {
            write_file(&root.join(dirs::SCRIPTS).join(name), &content, executable)?;
        }
        for extra in &self.extra_files {
            write_file(&root.join(&extra.path), &extra.content, extra.executable)?;
        }

        if target_exists {
            fs::remove_dir(&self.target)?;
        }
        std::fs::rename(root, &self.target).map_err(|source| DagError::Publish {
            target: self.target.clone(),
            source,
        })?;
        tracing::info!("Wrote submit files to {}", self.target.display());
        Ok(self.target.join(dag_file))
    }
}

fn write_file(path: &Path, content: &str, executable: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    #[cfg(unix)]
    if executable {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    #[cfg(not(unix))]
    let _ = executable;
    Ok(())
}

/// A directory relative to the submit root, as seen from a DAG file. Nested
/// DAGs live two levels down in `subdags/<job>/`.
fn relative_dir(dir: &str, nested: bool) -> String {
    if nested {
        format!("../../{}", dir)
    } else {
        dir.to_string()
    }
}

fn quote_var(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn script_line(kind: &str, node: &str, hook: &ScriptHook) -> String {
    let defer = hook
        .defer
        .map(|(status, time)| format!("DEFER {} {} ", status, time))
        .unwrap_or_default();
    let line = format!("SCRIPT {}{} {} {}", defer, kind, node, hook.executable);
    if hook.arguments.is_empty() {
        line
    } else {
        format!("{} {}", line, hook.arguments)
    }
}

/// Submit description of one job: commands, then `+` attributes, then
/// `queue`.
pub fn render_submit(job: &SubmitJob, run_attrs: &BTreeMap<String, Value>) -> String {
    let mut lines: Vec<String> = job
        .commands
        .iter()
        .map(|(key, value)| format!("{} = {}", key, value))
        .collect();

    let mut job_attrs = run_attrs.clone();
    job_attrs.extend(job.attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
    job_attrs.insert(attrs::ISJOB.to_string(), Value::from("True"));
    job_attrs.insert(attrs::JOB_TYPE.to_string(), Value::from(job.job_type.as_str()));
    lines.extend(
        job_attrs
            .iter()
            .map(|(key, value)| format!("+{} = {}", key, classad_literal(value))),
    );
    lines.push("queue".to_string());
    lines.join("\n") + "\n"
}

/// Lines describing one node, and writes its submit file or nested DAG.
fn node_lines(
    root: &Path,
    keyword: &str,
    job: &SubmitJob,
    run_attrs: &BTreeMap<String, Value>,
    nested: bool,
) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    let dir = job.dag_cmds.dir.as_deref();

    if let Some(subdag) = &job.subdag {
        let sub_dir = dir.map(str::to_string).unwrap_or_else(|| {
            format!("{}/{}", dirs::SUBDAGS, job.name)
        });
        let dag_file = format!("{}{}", job.name, suffixes::DAG);
        write_dag(root, &root.join(&sub_dir).join(&dag_file), subdag, run_attrs, true)?;
        lines.push(format!(
            "SUBDAG EXTERNAL {} {} DIR {}",
            job.name,
            dag_file,
            relative_dir(&sub_dir, nested)
        ));
    } else {
        let subfile = job
            .subfile
            .clone()
            .unwrap_or_else(|| format!("{}{}", job.name, suffixes::SUB));
        let mut line = format!("{} {} {}", keyword, job.name, subfile);
        if let Some(dir) = dir {
            line.push_str(&format!(" DIR {}", relative_dir(dir, nested)));
        }
        if job.dag_cmds.noop {
            line.push_str(" NOOP");
        }
        lines.push(line);

        if Path::new(&subfile).is_relative() {
            let path = root.join(dir.unwrap_or_default()).join(&subfile);
            write_file(&path, &render_submit(job, run_attrs), false)?;
        }

        let mut vars = BTreeMap::new();
        vars.insert(attrs::JOB_LABEL.to_string(), job.label.clone());
        vars.extend(job.dag_cmds.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        let vars = vars
            .iter()
            .map(|(key, value)| format!("{}={}", key, quote_var(value)))
            .collect::<Vec<_>>()
            .join(" ");
        lines.push(format!("VARS {} {}", job.name, vars));
    }

    if let Some(pre) = &job.dag_cmds.pre {
        lines.push(script_line("PRE", &job.name, pre));
    }
    if let Some(post) = &job.dag_cmds.post {
        lines.push(script_line("POST", &job.name, post));
    }
    if let Some((value, status)) = job.dag_cmds.abort_dag_on {
        let mut line = format!("ABORT-DAG-ON {} {}", job.name, value);
        if let Some(status) = status {
            line.push_str(&format!(" RETURN {}", status));
        }
        lines.push(line);
    }
    Ok(lines)
}

/// Renders `dag` into `path`, writing every submit file and nested DAG it
/// references below `root` on the way.
fn write_dag(
    root: &Path,
    path: &Path,
    dag: &Dag,
    run_attrs: &BTreeMap<String, Value>,
    nested: bool,
) -> Result<()> {
    tracing::debug!("Writing DAG '{}' to {}", dag.name, path.display());
    let mut lines = Vec::new();

    for job in &dag.jobs {
        lines.extend(node_lines(root, "JOB", job, run_attrs, nested)?);
    }
    if let Some(final_job) = &dag.final_job {
        lines.extend(node_lines(root, "FINAL", final_job, run_attrs, nested)?);
    }
    for service in &dag.service_jobs {
        lines.extend(node_lines(root, "SERVICE", service, run_attrs, nested)?);
    }

    for (parent, children) in &dag.edges {
        if children.is_empty() {
            continue;
        }
        let children = children.iter().cloned().collect::<Vec<_>>().join(" ");
        lines.push(format!("PARENT {} CHILD {}", parent, children));
    }

    if !nested {
        lines.push(format!(
            "NODE_STATUS_FILE {}{}",
            dag.name,
            suffixes::NODE_STATUS
        ));
        for (key, value) in &dag.attrs {
            lines.push(format!("SET_JOB_ATTR {}= {}", key, classad_literal(value)));
        }
    }

    write_file(path, &(lines.join("\n") + "\n"), false)
}

/// Type of every node named in a DAG file, from the keyword that declares
/// it. `JOB` nodes are payload unless marked `NOOP` or named like a check
/// job.
pub fn node_type(keyword: &str, name: &str, noop: bool) -> Option<&'static str> {
    match keyword {
        "JOB" if noop => Some(job_types::NOOP),
        "JOB" if name.starts_with(htcflow_core::constants::prefixes::CHECK_STATUS) => {
            Some(job_types::CHECK)
        }
        "JOB" => Some(job_types::PAYLOAD),
        "FINAL" => Some(job_types::FINAL),
        "SERVICE" => Some(job_types::SERVICE),
        "SUBDAG" => Some(job_types::SUBDAG),
        _ => None,
    }
}
