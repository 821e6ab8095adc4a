//! Research pipeline and domain logic for FeatureLens.
//!
//! This crate ties together validation, scraping, link discovery, two-pass
//! extraction, and embedding into the per-feature research cycle run by
//! [`Researcher`]. The external AI capabilities sit behind the traits in
//! [`capabilities`]; [`providers`] holds the concrete backends.

pub mod capabilities;
pub mod embeddings;
pub mod extractor;
pub mod features;
pub mod pipeline;
pub mod providers;

pub use capabilities::{EmbeddingCapability, ExtractionCapability, ExtractionRequest, FeatureSource};
pub use embeddings::{EmbeddingGenerator, EmbeddingOutcome};
pub use extractor::{ContentExtractor, Extraction};
pub use features::{FileFeatureSource, StaticFeatureSource};
pub use pipeline::{
    ResearchOptions, ResearchProgress, ResearchSettings, Researcher, SilentProgress,
};
