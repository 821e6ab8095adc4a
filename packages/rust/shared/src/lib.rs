//! Shared types, error model, and configuration for FeatureLens.
//!
//! This crate is the foundation depended on by all other FeatureLens crates.
//! It provides:
//! - [`FeatureLensError`]: the unified error type
//! - Domain types ([`Feature`], [`SourceContent`], [`ExtractedContent`],
//!   [`EmbeddingSet`], [`ContentResearch`])
//! - Configuration ([`AppConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DiscoveryConfig, EmbeddingConfig, EmbeddingProvider, ExtractionConfig,
    ExtractionProvider, OriginRule, ResearchConfig, ScrapingConfig, config_dir, config_file_path,
    expand_home, host_matches, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{FeatureLensError, Result};
pub use types::{
    CURRENT_SCHEMA_VERSION, CodeExample, Completeness, ComplexityTier, ContentResearch,
    DiscoveredLink, DiscoveryMethod, Embedding, EmbeddingKind, EmbeddingSet, ExtractedContent,
    Feature, Gap, Health, Insights, PageStructure, ResearchDepth, ResearchStatus, SourceContent,
    SourceKind, SourceStatus, SparseVector, Stage, StageIssue, UseCase,
};
