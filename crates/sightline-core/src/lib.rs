//! sightline-core — image resolution, face matching, and batch distribution.
//!
//! The pipeline turns one stored image into zero or more identity matches:
//! resolve the best rendition, detect face regions, crop each region, search
//! the identity index, and write accepted matches back onto the owning
//! document. Batch mode distributes the same pipeline over a work queue,
//! bracketed by the billable recognition model's lifecycle.

pub mod config;
pub mod consumer;
pub mod error;
pub mod extractor;
pub mod lifecycle;
pub mod matcher;
pub mod pipeline;
pub mod producer;
pub mod resolver;
pub mod services;
pub mod types;
pub mod writer;

pub use config::Config;
pub use error::{PipelineError, Result};
pub use pipeline::ImagePipeline;
pub use types::{FaceRegion, IdentityMatch, MatchOutcome};
