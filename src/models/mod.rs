//! Core data models for product acquisition.

mod job;
mod product;

pub use job::{AcquisitionJob, JobKind, JobStatus};
pub use product::{AcquisitionSource, CanonicalProduct, DomFragment, RawPayload, TemplateProduct};
