use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Canonical state of a run or a job, independent of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Unknown,
    Misfit,
    Unready,
    Ready,
    Pending,
    Running,
    Held,
    Succeeded,
    Failed,
    Pruned,
    Deleted,
}

impl WorkflowState {
    pub const ALL: [WorkflowState; 11] = [
        WorkflowState::Unknown,
        WorkflowState::Misfit,
        WorkflowState::Unready,
        WorkflowState::Ready,
        WorkflowState::Pending,
        WorkflowState::Running,
        WorkflowState::Held,
        WorkflowState::Succeeded,
        WorkflowState::Failed,
        WorkflowState::Pruned,
        WorkflowState::Deleted,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::Unknown => "UNKNOWN",
            WorkflowState::Misfit => "MISFIT",
            WorkflowState::Unready => "UNREADY",
            WorkflowState::Ready => "READY",
            WorkflowState::Pending => "PENDING",
            WorkflowState::Running => "RUNNING",
            WorkflowState::Held => "HELD",
            WorkflowState::Succeeded => "SUCCEEDED",
            WorkflowState::Failed => "FAILED",
            WorkflowState::Pruned => "PRUNED",
            WorkflowState::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWorkflowStateError(pub String);

impl fmt::Display for ParseWorkflowStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid workflow state: '{}'", self.0)
    }
}

impl std::error::Error for ParseWorkflowStateError {}

impl FromStr for WorkflowState {
    type Err = ParseWorkflowStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowState::ALL
            .iter()
            .find(|state| state.name().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| ParseWorkflowStateError(s.to_string()))
    }
}

pub type StateCounts = BTreeMap<WorkflowState, i64>;

/// State counts with every canonical state present and set to zero.
pub fn zeroed_state_counts() -> StateCounts {
    WorkflowState::ALL.iter().map(|s| (*s, 0)).collect()
}

/// Scheduler-native `JobStatus` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Idle = 1,
    Running = 2,
    Removed = 3,
    Completed = 4,
    Held = 5,
    TransferringOutput = 6,
    Suspended = 7,
}

impl JobStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(JobStatus::Idle),
            2 => Some(JobStatus::Running),
            3 => Some(JobStatus::Removed),
            4 => Some(JobStatus::Completed),
            5 => Some(JobStatus::Held),
            6 => Some(JobStatus::TransferringOutput),
            7 => Some(JobStatus::Suspended),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }
}

/// DAG node status codes as written to the node status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    NotReady = 0,
    Ready = 1,
    Prerun = 2,
    Submitted = 3,
    Postrun = 4,
    Done = 5,
    Error = 6,
    Futile = 7,
}

impl NodeStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(NodeStatus::NotReady),
            1 => Some(NodeStatus::Ready),
            2 => Some(NodeStatus::Prerun),
            3 => Some(NodeStatus::Submitted),
            4 => Some(NodeStatus::Postrun),
            5 => Some(NodeStatus::Done),
            6 => Some(NodeStatus::Error),
            7 => Some(NodeStatus::Futile),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }
}

/// Scheduler job id, `ClusterId.ProcId`.
///
/// Nodes that were never submitted are given negative cluster ids so they can
/// be tracked alongside real jobs.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct JobId {
    pub cluster: i64,
    pub proc: i64,
}

impl JobId {
    pub fn new(cluster: i64, proc: i64) -> Self {
        Self { cluster, proc }
    }

    pub fn is_placeholder(&self) -> bool {
        self.cluster < 0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.cluster, self.proc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseJobIdError(pub String);

impl fmt::Display for ParseJobIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid job id: '{}'. Expected 'ClusterId' or 'ClusterId.ProcId'",
            self.0
        )
    }
}

impl std::error::Error for ParseJobIdError {}

impl FromStr for JobId {
    type Err = ParseJobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseJobIdError(s.to_string());
        let trimmed = s.trim();
        let (cluster, proc) = match trimmed.split_once('.') {
            Some((c, p)) => (c, p),
            None => (trimmed, "0"),
        };
        let cluster = cluster.parse::<i64>().map_err(|_| err())?;
        let proc = proc.parse::<i64>().map_err(|_| err())?;
        Ok(JobId { cluster, proc })
    }
}

impl TryFrom<&str> for JobId {
    type Error = ParseJobIdError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_parse_forms() {
        assert_eq!("1163.0".parse::<JobId>(), Ok(JobId::new(1163, 0)));
        assert_eq!("42".parse::<JobId>(), Ok(JobId::new(42, 0)));
        assert_eq!("-3.0".parse::<JobId>(), Ok(JobId::new(-3, 0)));
        assert!("host#1.0#123".parse::<JobId>().is_err());
    }

    #[test]
    fn test_job_id_ordering_and_display() {
        let mut ids = vec![JobId::new(10, 1), JobId::new(-1, 0), JobId::new(10, 0)];
        ids.sort();
        let shown: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
        assert_eq!(shown, vec!["-1.0", "10.0", "10.1"]);
        assert!(ids[0].is_placeholder());
    }

    #[test]
    fn test_workflow_state_names_round_trip() {
        for state in WorkflowState::ALL {
            assert_eq!(state.name().parse::<WorkflowState>(), Ok(state));
        }
        assert!("bogus".parse::<WorkflowState>().is_err());
    }

    #[test]
    fn test_zeroed_state_counts_cover_every_state() {
        let counts = zeroed_state_counts();
        assert_eq!(counts.len(), 11);
        assert!(counts.values().all(|v| *v == 0));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(JobStatus::from_code(5), Some(JobStatus::Held));
        assert_eq!(JobStatus::from_code(0), None);
        assert_eq!(NodeStatus::from_code(7), Some(NodeStatus::Futile));
        assert_eq!(NodeStatus::Error.code(), 6);
    }
}
