pub mod builder;
pub mod dag;
pub mod error;
pub mod policy;
pub mod prepare;
pub mod provision;
pub mod scripts;
pub mod site;
pub mod translate;
pub mod writer;

pub use builder::DagBuilder;
pub use dag::{Dag, DagCommands, ScriptHook, SubmitJob};
pub use error::{DagError, Result};
pub use prepare::{prepare, Prepared};
pub use site::{PoolInfo, SiteCache};
pub use writer::DagWriter;
