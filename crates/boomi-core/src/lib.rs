// crates/boomi-core/src/lib.rs
pub mod cache;
pub mod context;
pub mod db;
pub mod error;
pub mod files;
pub mod filters;
pub mod http;
pub mod jobs;
pub mod options;
pub mod report;
pub mod runner;
pub mod sink;
pub mod source;
pub mod transform;
pub mod upsert;

pub use context::JobContext;
pub use error::PipelineError;
pub use jobs::{all_job_descriptors, all_jobs, find_job, run_job, Job, JobDescriptor};
pub use options::JobOptions;
pub use report::RunReport;
