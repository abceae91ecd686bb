pub mod job;

pub use job::{JobRequest, JobResponse};
