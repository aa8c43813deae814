//! Translation of a workflow job into submit description commands and node
//! directives.

use crate::dag::{DagCommands, ScriptHook};
use crate::policy::MemoryScaling;
use crate::site::SiteValues;
use htcflow_core::classad::htc_escape_value;
use htcflow_core::errors::WorkflowError;
use htcflow_core::workflow::{JobSpec, RetryUnlessExit, ScriptSpec, WorkflowFile};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Request used for memory scaling when the job does not set one.
pub const DEFAULT_REQUEST_MEMORY: i64 = 2048;

#[allow(clippy::unwrap_used)]
static ENV_VAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<ENV:([^>]+)>").unwrap());

type Commands = BTreeMap<String, String>;

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Rewrites `<ENV:NAME>` placeholders into `$ENV(NAME)`.
pub fn fix_env_var_syntax(text: &str) -> String {
    ENV_VAR_RE.replace_all(text, "$$ENV($1)").into_owned()
}

/// Fills `{name}` placeholders from the job's command values. `{{` and `}}`
/// stand for literal braces.
pub fn replace_cmd_vars(arguments: &str, job: &JobSpec) -> Result<String, WorkflowError> {
    let unresolved = |variable: String| WorkflowError::UnresolvedCommandVariable {
        job: job.name.clone(),
        variable,
    };

    let mut out = String::with_capacity(arguments.len());
    let mut chars = arguments.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                let mut closed = false;
                for k in chars.by_ref() {
                    if k == '}' {
                        closed = true;
                        break;
                    }
                    key.push(k);
                }
                if !closed {
                    return Err(unresolved(format!("{{{}", key)));
                }
                match job.cmdvals.get(&key) {
                    Some(value) => out.push_str(&value_text(value)),
                    None => {
                        tracing::error!(
                            "Could not replace command variables: arguments: {} cmdvals: {:?}",
                            arguments,
                            job.cmdvals
                        );
                        return Err(unresolved(key));
                    }
                }
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// Path a job uses for a file on its command line. Bundles copied in
/// through the plugin are referenced by their entry file.
fn file_argument(file: &WorkflowFile, use_shared: bool, input: bool) -> String {
    if !file.wms_transfer || (use_shared && file.job_shared) {
        return file.src_uri.clone();
    }
    if use_shared && input {
        return file.basename();
    }
    Path::new(&file.src_uri)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.src_uri.clone())
}

/// Replaces `<FILE:name>` placeholders, inputs first, then outputs.
pub fn replace_file_vars(arguments: &str, job: &JobSpec, use_shared: bool) -> String {
    let inputs = job.inputs.iter().map(|f| (f, true));
    let outputs = job.outputs.iter().map(|f| (f, false));
    inputs
        .chain(outputs)
        .fold(arguments.to_string(), |args, (file, input)| {
            args.replace(
                &format!("<FILE:{}>", file.name),
                &file_argument(file, use_shared, input),
            )
        })
}

/// Renders the `environment` command: integers bare, everything else
/// single-quoted with embedded quotes doubled.
pub fn environment_command(environment: &BTreeMap<String, Value>) -> String {
    let assignments = environment
        .iter()
        .map(|(key, value)| match value {
            Value::Number(n) => format!("{}={}", key, n),
            other => {
                let text = value_text(other).replace('\'', "''").replace('"', "\"\"");
                format!("{}='{}'", key, text)
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    format!("\"{}\"", fix_env_var_syntax(&assignments))
}

/// `transfer_input_files` entries for the job's scheduler-transferred inputs.
///
/// Without a shared filesystem every input is pushed from the submit
/// directory. With one, only files the job cannot share are copied, through
/// the `file://` plugin which handles single files only.
pub fn transfer_input_files(
    job: &JobSpec,
    use_shared: bool,
    submit_root: &Path,
) -> Result<Option<String>, WorkflowError> {
    let mut inputs = Vec::new();
    for file in job.inputs.iter().filter(|f| f.wms_transfer) {
        tracing::debug!("src_uri={}", file.src_uri);
        let uri = Path::new(&file.src_uri);
        if !use_shared {
            if uri.is_relative() {
                inputs.push(file.src_uri.clone());
                continue;
            }
            let relative = uri.strip_prefix(submit_root).map_err(|_| {
                WorkflowError::InputOutsideSubmitRoot {
                    job: job.name.clone(),
                    uri: file.src_uri.clone(),
                    root: submit_root.display().to_string(),
                }
            })?;
            inputs.push(relative.display().to_string());
        } else if !file.job_shared {
            if let Some(bundle) = &file.bundle {
                inputs.push(format!("file://{}", uri.join(&bundle.entry).display()));
                for member in &bundle.members {
                    inputs.push(format!("file://{}", uri.join(member).display()));
                }
            } else if uri.is_dir() {
                return Err(WorkflowError::DirectoryTransfer(file.src_uri.clone()));
            } else {
                inputs.push(format!("file://{}", file.src_uri));
            }
        }
    }

    if inputs.is_empty() {
        return Ok(None);
    }
    let joined = inputs.join(",");
    tracing::debug!("transfer_input_files={}", joined);
    Ok(Some(joined))
}

fn retry_until(job: &JobSpec) -> Result<Option<String>, WorkflowError> {
    match &job.retry_unless_exit {
        None | Some(RetryUnlessExit::Code(0)) => Ok(None),
        Some(RetryUnlessExit::Codes(codes)) if codes.is_empty() => Ok(None),
        Some(RetryUnlessExit::Code(code)) => Ok(Some(code.to_string())),
        Some(RetryUnlessExit::Codes(codes)) => {
            let members = codes
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(",");
            Ok(Some(format!("member(ExitCode, {{{}}})", members)))
        }
        Some(RetryUnlessExit::Invalid(value)) => Err(WorkflowError::InvalidRetryUnlessExit {
            job: job.name.clone(),
            value: value.to_string(),
        }),
    }
}

fn set_opt(commands: &mut Commands, key: &str, value: Option<String>) {
    if let Some(v) = value {
        commands.insert(key.to_string(), v);
    }
}

/// Submit commands that follow directly from the job's own settings.
pub fn translate_job_commands(site: &SiteValues, job: &JobSpec) -> Result<Commands, WorkflowError> {
    let mut cmds = Commands::new();

    set_opt(&mut cmds, "notify_user", job.mail_to.clone());
    set_opt(&mut cmds, "notification", job.when_to_mail.clone());
    set_opt(&mut cmds, "request_cpus", job.request_cpus.map(|c| c.to_string()));
    set_opt(&mut cmds, "priority", job.priority.as_ref().map(value_text));
    set_opt(&mut cmds, "category", job.category.clone());
    set_opt(
        &mut cmds,
        "accounting_group",
        job.accounting_group
            .clone()
            .or_else(|| site.accounting_group.clone()),
    );
    set_opt(
        &mut cmds,
        "accounting_group_user",
        job.accounting_user
            .clone()
            .or_else(|| site.accounting_user.clone()),
    );

    if let Some(retries) = job.number_of_retries.filter(|r| *r != 0) {
        cmds.insert("max_retries".into(), retries.to_string());
    }
    set_opt(&mut cmds, "retry_until", retry_until(job)?);

    if let Some(disk) = job.request_disk.filter(|d| *d != 0) {
        cmds.insert("request_disk".into(), format!("{}MB", disk));
    }
    if let Some(memory) = job.request_memory.filter(|m| *m != 0) {
        cmds.insert("request_memory".into(), memory.to_string());
    }

    if let Some(multiplier) = job.memory_multiplier.filter(|m| *m != 0.0) {
        let limit = site
            .memory_limit
            .ok_or_else(|| WorkflowError::MissingMemoryLimit(job.name.clone()))?;
        let memory_max = match job.request_memory_max {
            Some(max) if max != 0 && max < limit => max,
            _ => limit,
        };
        let request = job.request_memory.unwrap_or(DEFAULT_REQUEST_MEMORY);
        let scaling = MemoryScaling::new(request, multiplier, memory_max);
        cmds.insert("request_memory".into(), scaling.request_memory_expr());
        cmds.insert("periodic_release".into(), scaling.release_expr());
        cmds.insert("periodic_remove".into(), scaling.remove_expr());
    }

    set_opt(&mut cmds, "concurrency_limit", job.concurrency_limit.clone());

    if job.executable.transfer_executable {
        cmds.insert("transfer_executable".into(), "True".into());
        cmds.insert("executable".into(), job.executable.src_uri.clone());
    } else {
        cmds.insert(
            "executable".into(),
            fix_env_var_syntax(&job.executable.src_uri),
        );
    }

    if let Some(arguments) = job.arguments.as_deref().filter(|a| !a.is_empty()) {
        let arguments = replace_cmd_vars(arguments, job)?;
        let arguments = replace_file_vars(&arguments, job, site.use_shared);
        cmds.insert("arguments".into(), fix_env_var_syntax(&arguments));
    }

    if !job.environment.is_empty() {
        cmds.insert("environment".into(), environment_command(&job.environment));
    }

    for (key, value) in job.profile.iter().chain(site.profile.iter()) {
        cmds.insert(key.clone(), htc_escape_value(value));
    }

    Ok(cmds)
}

fn script_hook(script: &ScriptSpec) -> ScriptHook {
    ScriptHook {
        executable: fix_env_var_syntax(&script.executable),
        arguments: fix_env_var_syntax(&script.arguments),
        defer: script.defer,
    }
}

/// Node directives that follow from the job's own settings.
pub fn translate_dag_commands(job: &JobSpec) -> DagCommands {
    DagCommands {
        pre: job.pre_script.as_ref().map(script_hook),
        post: job.post_script.as_ref().map(script_hook),
        abort_dag_on: job
            .abort_on_value
            .map(|value| (value, job.abort_return_value)),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use htcflow_core::workflow::FileBundle;
    use serde_json::json;

    fn job() -> JobSpec {
        let mut job = JobSpec::new("label1_a", "label1");
        job.executable.src_uri = "<ENV:CTRL_DIR>/bin/run.sh".into();
        job
    }

    fn site() -> SiteValues {
        SiteValues {
            use_shared: true,
            memory_limit: Some(8192),
            ..Default::default()
        }
    }

    #[test]
    fn test_retry_unless_exit_forms() {
        let mut j = job();
        assert!(!translate_job_commands(&site(), &j).unwrap().contains_key("retry_until"));

        j.retry_unless_exit = Some(RetryUnlessExit::Code(3));
        assert_eq!(translate_job_commands(&site(), &j).unwrap()["retry_until"], "3");

        j.retry_unless_exit = Some(RetryUnlessExit::Codes(vec![1, 2]));
        assert_eq!(
            translate_job_commands(&site(), &j).unwrap()["retry_until"],
            "member(ExitCode, {1,2})"
        );

        j.retry_unless_exit = Some(RetryUnlessExit::Invalid(json!("1,2")));
        let err = translate_job_commands(&site(), &j).unwrap_err();
        assert!(err.to_string().contains("retryUnlessExit"));
    }

    #[test]
    fn test_one_to_one_fields_and_accounting_fallback() {
        let mut j = job();
        j.mail_to = Some("me@example.org".into());
        j.request_cpus = Some(4);
        j.priority = Some(json!(10));
        j.request_disk = Some(1024);
        j.request_memory = Some(2048);
        j.accounting_user = Some("jdoe".into());
        let mut s = site();
        s.accounting_group = Some("group_dm".into());
        s.accounting_user = Some("site_user".into());

        let cmds = translate_job_commands(&s, &j).unwrap();
        assert_eq!(cmds["notify_user"], "me@example.org");
        assert_eq!(cmds["request_cpus"], "4");
        assert_eq!(cmds["priority"], "10");
        assert_eq!(cmds["request_disk"], "1024MB");
        assert_eq!(cmds["request_memory"], "2048");
        assert_eq!(cmds["accounting_group"], "group_dm");
        assert_eq!(cmds["accounting_group_user"], "jdoe");
        assert_eq!(cmds["executable"], "$ENV(CTRL_DIR)/bin/run.sh");
        assert!(!cmds.contains_key("notification"));
    }

    #[test]
    fn test_memory_autoscaling_needs_a_limit() {
        let mut j = job();
        j.request_memory = Some(2048);
        j.memory_multiplier = Some(2.0);
        j.request_memory_max = Some(4096);

        let cmds = translate_job_commands(&site(), &j).unwrap();
        assert!(cmds["request_memory"].contains("min({int(2048 * pow(2.0, NumJobStarts)), 4096})"));
        assert!(cmds["periodic_release"].ends_with("< 4096"));
        assert!(cmds.contains_key("periodic_remove"));

        let mut s = site();
        s.memory_limit = None;
        assert_eq!(
            translate_job_commands(&s, &j),
            Err(WorkflowError::MissingMemoryLimit("label1_a".into()))
        );
    }

    #[test]
    fn test_argument_placeholders() {
        let mut j = job();
        j.arguments = Some("-b <FILE:butlerConfig> --qgraph <FILE:qgraphFile> -j {qgraphId} --out <FILE:log> <ENV:HOME>".into());
        j.cmdvals.insert("qgraphId".into(), json!(4242));
        let mut butler = WorkflowFile::new("butlerConfig", "/repo/exec_butler");
        butler.bundle = Some(FileBundle {
            entry: "butler.yaml".into(),
            members: vec!["gen3.sqlite3".into()],
        });
        let mut qgraph = WorkflowFile::new("qgraphFile", "/submit/run/a.qgraph");
        qgraph.job_shared = true;
        let mut log = WorkflowFile::new("log", "s3://bucket/log.txt");
        log.wms_transfer = false;
        j.inputs = vec![butler, qgraph];
        j.outputs = vec![log];

        let cmds = translate_job_commands(&site(), &j).unwrap();
        assert_eq!(
            cmds["arguments"],
            "-b butler.yaml --qgraph /submit/run/a.qgraph -j 4242 --out s3://bucket/log.txt $ENV(HOME)"
        );

        let mut s = site();
        s.use_shared = false;
        let cmds = translate_job_commands(&s, &j).unwrap();
        assert_eq!(
            cmds["arguments"],
            "-b exec_butler --qgraph a.qgraph -j 4242 --out s3://bucket/log.txt $ENV(HOME)"
        );
    }

    #[test]
    fn test_missing_command_value_is_an_error() {
        let mut j = job();
        j.arguments = Some("run {missing} {{literal}}".into());
        assert_eq!(
            translate_job_commands(&site(), &j),
            Err(WorkflowError::UnresolvedCommandVariable {
                job: "label1_a".into(),
                variable: "missing".into()
            })
        );
        j.cmdvals.insert("missing".into(), json!("x"));
        assert_eq!(
            translate_job_commands(&site(), &j).unwrap()["arguments"],
            "run x {literal}"
        );
    }

    #[test]
    fn test_environment_quoting() {
        let mut env = BTreeMap::new();
        env.insert("TEST_INT".to_string(), json!(1));
        env.insert("TEST_STR".to_string(), json!("TWO"));
        assert_eq!(environment_command(&env), "\"TEST_INT=1 TEST_STR='TWO'\"");

        let mut env = BTreeMap::new();
        env.insert("A_QUOTES".to_string(), json!("spacey 'quoted' \"double\" value"));
        env.insert("B_PATH".to_string(), json!("<ENV:CTRL_BPS_DIR>/tests"));
        assert_eq!(
            environment_command(&env),
            "\"A_QUOTES='spacey ''quoted'' \"\"double\"\" value' B_PATH='$ENV(CTRL_BPS_DIR)/tests'\""
        );
    }

    #[test]
    fn test_profile_values_are_escaped() {
        let mut j = job();
        j.profile.insert("requirements".into(), json!("(Machine == \"node1\")"));
        let mut s = site();
        s.profile.insert("+Extra".into(), json!(1));
        let cmds = translate_job_commands(&s, &j).unwrap();
        assert_eq!(cmds["requirements"], "(Machine == \"\"node1\"\")");
    }

    #[test]
    fn test_transfer_input_files() {
        let root = Path::new("/submit/run");
        let mut j = job();
        let mut shared = WorkflowFile::new("shared", "/submit/run/shared.txt");
        shared.job_shared = true;
        let mut skipped = WorkflowFile::new("remote", "s3://bucket/x");
        skipped.wms_transfer = false;
        let mut butler = WorkflowFile::new("butlerConfig", "/repo/exec_butler");
        butler.bundle = Some(FileBundle {
            entry: "butler.yaml".into(),
            members: vec!["gen3.sqlite3".into()],
        });
        j.inputs = vec![
            WorkflowFile::new("qgraph", "/submit/run/a.qgraph"),
            shared,
            skipped,
            butler,
        ];

        assert_eq!(
            transfer_input_files(&j, true, root).unwrap().as_deref(),
            Some("file:///submit/run/a.qgraph,file:///repo/exec_butler/butler.yaml,file:///repo/exec_butler/gen3.sqlite3")
        );

        j.inputs.truncate(2);
        assert_eq!(
            transfer_input_files(&j, false, root).unwrap().as_deref(),
            Some("a.qgraph,shared.txt")
        );

        j.inputs = vec![WorkflowFile::new("x", "/elsewhere/x")];
        assert!(matches!(
            transfer_input_files(&j, false, root),
            Err(WorkflowError::InputOutsideSubmitRoot { .. })
        ));
        j.inputs.clear();
        assert_eq!(transfer_input_files(&j, true, root).unwrap(), None);
    }

    #[test]
    fn test_directories_cannot_be_copied_by_the_plugin() {
        let dir = std::env::temp_dir();
        let mut j = job();
        j.inputs = vec![WorkflowFile::new("dir", dir.display().to_string())];
        assert!(matches!(
            transfer_input_files(&j, true, Path::new("/submit")),
            Err(WorkflowError::DirectoryTransfer(_))
        ));
    }

    #[test]
    fn test_dag_commands() {
        let mut j = job();
        j.abort_on_value = Some(3);
        j.abort_return_value = Some(4);
        j.pre_script = Some(ScriptSpec {
            executable: "<ENV:HOME>/pre.sh".into(),
            arguments: "$JOB".into(),
            defer: Some((1, 60)),
        });
        let cmds = translate_dag_commands(&j);
        assert_eq!(cmds.abort_dag_on, Some((3, Some(4))));
        let pre = cmds.pre.unwrap();
        assert_eq!(pre.executable, "$ENV(HOME)/pre.sh");
        assert_eq!(pre.defer, Some((1, 60)));
        assert!(cmds.post.is_none());
    }
}
