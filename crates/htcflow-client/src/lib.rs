//! Talks to HTCondor on behalf of the command line: submits prepared runs,
//! reports on them from scheduler records and submit-directory files, and
//! restarts failed runs from their rescue DAGs.

pub mod error;
pub mod ids;
pub mod records;
pub mod report;
pub mod restart;
pub mod scheduler;
pub mod submit;

pub use error::{ClientError, Result};
pub use ids::{wms_id_to_dir, wms_id_type, WmsIdType};
pub use report::{JobReport, ReportAssembler, ReportOutput, RunReport, ServiceNote};
pub use restart::{RestartCoordinator, RestartOutcome};
pub use scheduler::{CondorCli, ScheddScope, Scheduler, SchedulerPool};
pub use submit::{submit, Submission};
