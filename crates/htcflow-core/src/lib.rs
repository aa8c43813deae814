pub mod classad;
pub mod classify;
pub mod config;
pub mod constants;
pub mod errors;
pub mod handlers;
pub mod logging;
pub mod model;
pub mod summary;
pub mod workflow;
