use crate::classad::ClassAd;
use crate::constants::markers;
use crate::model::{JobStatus, NodeStatus, WorkflowState};

/// Maps a merged job record to one canonical state.
///
/// The scheduler's own `JobStatus` is consulted first; when it is absent or
/// unrecognised, the DAG node status (if any) decides. Records carrying
/// neither classify as [`WorkflowState::Misfit`].
pub fn classify(ad: &ClassAd) -> WorkflowState {
    let mut state = WorkflowState::Misfit;
    if ad.contains("JobStatus") {
        state = classify_job_status(ad);
    }
    if state == WorkflowState::Misfit && ad.contains("NodeStatus") {
        state = classify_node_status(ad);
    }
    state
}

pub fn classify_job_status(ad: &ClassAd) -> WorkflowState {
    let Some(code) = ad.get_i64("JobStatus") else {
        tracing::debug!("Job '{}': JobStatus is not a number", ad.display_id());
        return WorkflowState::Misfit;
    };
    match JobStatus::from_code(code) {
        Some(JobStatus::Idle) => WorkflowState::Pending,
        Some(JobStatus::Running) => WorkflowState::Running,
        Some(JobStatus::Removed) => WorkflowState::Deleted,
        Some(JobStatus::Held) => WorkflowState::Held,
        Some(JobStatus::Completed) => {
            let by_signal = ad.get_bool("ExitBySignal").unwrap_or(false)
                && ad.get_i64("ExitSignal").unwrap_or(0) != 0;
            let failed = by_signal
                || ad.get_i64("ExitCode").unwrap_or(0) != 0
                || ad.get_i64("DAG_Status").unwrap_or(0) != 0;
            if failed {
                WorkflowState::Failed
            } else {
                WorkflowState::Succeeded
            }
        }
        Some(JobStatus::TransferringOutput) | Some(JobStatus::Suspended) | None => {
            tracing::debug!(
                "Job '{}': JobStatus {} has no canonical state",
                ad.display_id(),
                code
            );
            WorkflowState::Misfit
        }
    }
}

pub fn classify_node_status(ad: &ClassAd) -> WorkflowState {
    let Some(status) = ad.get_i64("NodeStatus").and_then(NodeStatus::from_code) else {
        tracing::debug!("Job '{}': unrecognised NodeStatus", ad.display_id());
        return WorkflowState::Misfit;
    };
    let details = ad.get_str("StatusDetails").unwrap_or("");
    match status {
        NodeStatus::NotReady => WorkflowState::Unready,
        NodeStatus::Ready => WorkflowState::Ready,
        NodeStatus::Prerun | NodeStatus::Postrun => WorkflowState::Misfit,
        NodeStatus::Done => WorkflowState::Succeeded,
        NodeStatus::Futile => WorkflowState::Pruned,
        NodeStatus::Submitted => {
            if ad.get_i64("JobProcsHeld").unwrap_or(0) > 0 {
                WorkflowState::Held
            } else if details == markers::NOT_IDLE {
                WorkflowState::Running
            } else if ad.get_i64("JobProcsQueued").unwrap_or(0) > 0 {
                WorkflowState::Pending
            } else {
                WorkflowState::Misfit
            }
        }
        // The node status reflects the POST script; its details carry the
        // job's own outcome.
        NodeStatus::Error => {
            if details.contains(markers::DAGMAN_ERROR_0) {
                WorkflowState::Succeeded
            } else if details.contains(markers::JOB_ABORTED) {
                WorkflowState::Deleted
            } else {
                WorkflowState::Failed
            }
        }
    }
}
