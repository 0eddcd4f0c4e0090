//! Render job orchestration: request validation, admission, the per-job
//! pipeline and the in-memory job registry.

pub mod admission;
pub mod registry;
pub mod request;
pub mod runner;
pub mod service;

pub use admission::{Admission, AdmissionPermit, AdmissionTicket};
pub use registry::{JobRecord, JobRegistry, JobStatus};
pub use request::{create_job_dir, plan_job, RenderRequest};
pub use runner::JobRunner;
pub use service::{JobService, Rejected, Rendered};
