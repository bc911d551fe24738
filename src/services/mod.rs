pub mod loader;
pub mod pipeline;
pub mod report;

pub use loader::{load_batch, LoadError, LoadedBatch, Manifest};
pub use pipeline::{DetectionPipeline, DetectionRun, GroupOutcome, GroupReport};
pub use report::{DetectionReport, ReportError};
