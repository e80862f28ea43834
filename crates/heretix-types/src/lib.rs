//! Core data model shared across the claim-verification pipeline.
//!
//! Every other crate in the workspace depends on the types defined here
//! instead of redefining its own wire formats. Keeping them in one place is
//! what lets [`heretix_gate`]-style JSON output and the HTTP surface agree on
//! field names without a translation layer.

mod claim;
mod config;
mod doc;
mod error;
mod prompt;
mod record;
mod sample;

pub use claim::Claim;
pub use config::{Lens, ProviderCapabilities, RunConfig};
pub use doc::{Doc, WebReplicate};
pub use error::TypesError;
pub use prompt::{PromptBundle, PromptTemplate};
pub use record::{AggregationResult, CombinedBlock, PriorBlock, RunRecord, WebBlock};
pub use sample::{CachedSample, Sample};
