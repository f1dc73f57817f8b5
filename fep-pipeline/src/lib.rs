//! Transaction dispatch pipeline: ordered stages with short-circuit
//! semantics, a short-horizon duplicate detector, and the concrete stage
//! handlers that drive a transaction from decode to response (spec §4.7-
//! §4.9, C7-C9).

pub mod context;
pub mod duplicate;
pub mod error;
pub mod handlers;
pub mod pipeline;
pub mod repository;
pub mod stage;

pub use context::PipelineContext;
pub use duplicate::{DuplicateDetector, Fingerprint};
pub use error::{PipelineError, ValidationFailure};
pub use pipeline::Pipeline;
pub use stage::{Handler, Stage};
