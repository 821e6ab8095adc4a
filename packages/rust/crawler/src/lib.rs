//! Fetching side of the research pipeline.
//!
//! This crate provides:
//! - [`RateLimiter`]: per-origin request pacing shared by all cycles
//! - [`SourceValidator`]: scheme, allow-list, private-host, and duplicate checks
//! - [`Scraper`]: paced, retrying page fetcher that returns cleaned [`SourceContent`]
//! - [`adapters`]: content-region detection (origin rules, Docusaurus, Read the Docs, generic)
//!
//! [`SourceContent`]: featurelens_shared::SourceContent

pub mod adapters;
pub mod engine;
pub mod rate_limiter;
pub mod validator;

pub use adapters::{AdapterRegistry, PlatformAdapter, Region};
pub use engine::{Scraper, compute_hash, parse_page};
pub use rate_limiter::{RateLimiter, origin_key};
pub use validator::{SeenSet, SourceValidator, Validation, normalize_url};
