//! Shared fixtures for the htcflow test suites.

pub mod builders;
pub mod fake_scheduler;
pub mod submit_dir;

pub use builders::{classad, JobSpecBuilder, WorkflowBuilder};
pub use fake_scheduler::{Call, FakeScheduler};
pub use submit_dir::{events, SubmitDirFixture};

use std::sync::Once;

static TRACING: Once = Once::new();

/// Routes `tracing` output through the test harness' captured writer.
/// Safe to call from every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
