//! Helper scripts DAGMan runs around nested DAGs and the final job. They are
//! written to `scripts/` in every submit directory.

use htcflow_core::constants::scripts;

/// POST script of a non-blocking group: remembers the nested DAG's return
/// code and lets the parent DAG continue.
pub const SUBDAG_POST: &str = r#"#!/bin/sh
# Usage: subdag_post.sh <group job name> <return code>
group_job_name="$1"
return_code="$2"
echo "$return_code" > "${group_job_name}.status"
exit 0
"#;

/// Executable of a group's check job: fails with the group's return code.
pub const CHECK_GROUP_STATUS: &str = r#"#!/bin/sh
# Usage: check_group_status.sh <group job name>
group_job_name="$1"
status_file="${group_job_name}.status"
if [ ! -f "$status_file" ]; then
    echo "No status recorded for ${group_job_name}" >&2
    exit 1
fi
return_code=$(cat "$status_file")
if [ "$return_code" != "0" ]; then
    echo "${group_job_name} failed with return code ${return_code}" >&2
    exit 1
fi
exit 0
"#;

/// POST script of the final job. A successful final job does not hide
/// failures in the rest of the workflow.
pub const FINAL_POST: &str = r#"#!/bin/sh
# Usage: final_post.sh <final job name> <DAG status> <return code>
final_job_name="$1"
dag_status="$2"
return_code="$3"
if [ "$return_code" != "0" ]; then
    echo "${final_job_name} failed with return code ${return_code}" >&2
    exit "$return_code"
fi
if [ "$dag_status" != "0" ]; then
    echo "Workflow finished with DAG status ${dag_status}" >&2
    exit 1
fi
exit 0
"#;

/// Submit description of the check jobs. `scripts_dir` is the absolute
/// `scripts/` directory of the published submit directory.
pub fn check_group_status_sub(scripts_dir: &str) -> String {
    format!(
        "universe = local\n\
         executable = {}/{}\n\
         arguments = $(group_job_name)\n\
         output = $(group_job_name)_check.$(Cluster).out\n\
         error = $(group_job_name)_check.$(Cluster).err\n\
         log = $(group_job_name)_check.$(Cluster).log\n\
         getenv = True\n\
         +bps_job_type = \"check\"\n\
         queue\n",
        scripts_dir,
        scripts::CHECK_GROUP_STATUS
    )
}

/// Every helper file as `(file name, content, executable)`.
pub fn helper_files(scripts_dir: &str) -> Vec<(&'static str, String, bool)> {
    vec![
        (scripts::SUBDAG_POST, SUBDAG_POST.to_string(), true),
        (scripts::FINAL_POST, FINAL_POST.to_string(), true),
        (scripts::CHECK_GROUP_STATUS, CHECK_GROUP_STATUS.to_string(), true),
        (
            scripts::CHECK_GROUP_STATUS_SUB,
            check_group_status_sub(scripts_dir),
            false,
        ),
    ]
}
