pub mod suffixes {
    pub const DAG: &str = ".dag";
    pub const SUB: &str = ".sub";
    pub const NODE_STATUS: &str = ".node_status";
    pub const DAGMAN_LOG: &str = ".dag.dagman.log";
    pub const NODES_LOG: &str = ".dag.nodes.log";
    pub const DAGMAN_OUT: &str = ".dag.dagman.out";
    pub const DAG_SUBMIT: &str = ".dag.condor.sub";
    pub const METRICS: &str = ".dag.metrics";
    pub const RESCUE: &str = ".rescue";
    pub const INFO_JSON: &str = ".info.json";
}

pub mod dirs {
    pub const JOBS: &str = "jobs";
    pub const SUBDAGS: &str = "subdags";
    pub const BACKUPS: &str = "backups";
    pub const SCRIPTS: &str = "scripts";
}

pub mod prefixes {
    /// Jobs whose names carry this prefix are workflow machinery, not payload.
    pub const WMS: &str = "wms_";
    pub const CHECK_STATUS: &str = "wms_check_status_";
}

pub mod attrs {
    pub const JOB_NAME: &str = "bps_job_name";
    pub const JOB_LABEL: &str = "bps_job_label";
    pub const JOB_QUANTA: &str = "bps_job_quanta";
    pub const JOB_TYPE: &str = "bps_job_type";
    pub const JOB_SUMMARY: &str = "bps_job_summary";
    pub const RUN_SUMMARY: &str = "bps_run_summary";
    pub const RUN_QUANTA: &str = "bps_run_quanta";
    pub const RUN: &str = "bps_run";
    pub const OPERATOR: &str = "bps_operator";
    pub const PROJECT: &str = "bps_project";
    pub const CAMPAIGN: &str = "bps_campaign";
    pub const PAYLOAD: &str = "bps_payload";
    pub const ISJOB: &str = "bps_isjob";
    pub const PROVISIONING_JOB: &str = "bps_provisioning_job";
    pub const WMS_SERVICE: &str = "bps_wms_service";
    pub const WMS_WORKFLOW: &str = "bps_wms_workflow";
    pub const WORKFLOW_JOB_SUMMARY: &str = "workflow_job_summary";
    pub const JOB_HELD_TIME: &str = "job_held_time";
    pub const JOB_RELEASED_TIME: &str = "job_released_time";
    pub const JOB_EVICTED_TIME: &str = "job_evicted_time";
}

pub mod job_types {
    pub const PAYLOAD: &str = "payload";
    pub const NOOP: &str = "noop";
    pub const SUBDAG: &str = "subdag";
    pub const FINAL: &str = "final";
    pub const SERVICE: &str = "service";
    /// Status check job placed after a non-blocking group.
    pub const CHECK: &str = "check";
}

pub mod hold_codes {
    pub const USER: i64 = 1;
    pub const SIGNAL: i64 = 3;
    /// Hold reason code/subcode pairs meaning the job went over its memory
    /// request.
    pub const MEMORY: [(i64, i64); 2] = [(34, 0), (3, 34)];
    pub const MEMORY_SUBCODE: i64 = 34;
}

pub mod markers {
    pub const NOT_IDLE: &str = "not_idle";
    pub const DAGMAN_ERROR_0: &str = "DAGMAN error 0";
    pub const JOB_ABORTED: &str = "ULOG_JOB_ABORTED";
    pub const REMOVED_BY_DAGMAN: &str = "Removed by DAGMan";
    pub const OTHER_JOB_REMOVE: &str = "OtherJobRemoveRequirements";
    pub const DAGMAN_JOB_ID: &str = "DAGManJobId";
    pub const TMP_SUBMIT: &str = "Cannot submit from /tmp";
    pub const SUBMIT_FAILED: &str = "ERROR: submit attempt failed";
}

pub mod labels {
    pub const INIT: &str = "init";
    pub const PIPETASK_INIT: &str = "pipetaskInit";
    pub const PROVISIONING: &str = "provisioningJob";
    pub const PEGASUS: &str = "pegasus";
}

pub mod scripts {
    pub const SUBDAG_POST: &str = "subdag_post.sh";
    pub const FINAL_POST: &str = "final_post.sh";
    pub const CHECK_GROUP_STATUS: &str = "check_group_status.sh";
    pub const CHECK_GROUP_STATUS_SUB: &str = "check_group_status.sub";
    pub const PROVISIONING: &str = "provisioningJob.bash";
}

/// Values identifying the tooling that produced a run.
pub mod wms {
    pub const SERVICE: &str = "htcflow::HTCondorService";
    pub const WORKFLOW: &str = "htcflow_dag::DagBuilder";
}

pub const MISSING_ID: &str = "MISSING";
pub const MISSING_VALUE: &str = "MISS";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_constants() {
        assert_eq!(suffixes::DAGMAN_LOG, ".dag.dagman.log");
        assert!(suffixes::DAG_SUBMIT.starts_with(suffixes::DAG));
    }

    #[test]
    fn test_memory_hold_codes() {
        assert!(hold_codes::MEMORY.contains(&(34, 0)));
        assert!(hold_codes::MEMORY.contains(&(hold_codes::SIGNAL, hold_codes::MEMORY_SUBCODE)));
    }
}
