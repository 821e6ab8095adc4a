//! Feature sources: where the pipeline reads feature records from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use featurelens_shared::{Feature, FeatureLensError, Result};

use crate::capabilities::FeatureSource;

/// Reads `<dir>/<id>.json`, one feature per file.
#[derive(Debug, Clone)]
pub struct FileFeatureSource {
    dir: PathBuf,
}

impl FileFeatureSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let safe = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !id.starts_with('.');
        if !safe {
            return Err(FeatureLensError::validation(format!("invalid feature id '{id}'")));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }
}

#[async_trait]
impl FeatureSource for FileFeatureSource {
    async fn get_feature(&self, id: &str) -> Result<Feature> {
        let path = self.path_for(id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FeatureLensError::FeatureNotFound {
                    feature_id: id.to_string(),
                });
            }
            Err(e) => return Err(FeatureLensError::io(&path, e)),
        };

        let feature: Feature = serde_json::from_str(&content)
            .map_err(|e| FeatureLensError::parse(format!("{}: {e}", path.display())))?;
        if feature.id != id {
            return Err(FeatureLensError::validation(format!(
                "{} holds feature '{}', expected '{id}'",
                path.display(),
                feature.id
            )));
        }

        debug!(feature_id = id, links = feature.documentation_links.len(), "feature loaded");
        Ok(feature)
    }
}

/// In-memory feature map.
#[derive(Debug, Clone, Default)]
pub struct StaticFeatureSource {
    features: HashMap<String, Feature>,
}

impl StaticFeatureSource {
    pub fn new(features: impl IntoIterator<Item = Feature>) -> Self {
        Self {
            features: features.into_iter().map(|f| (f.id.clone(), f)).collect(),
        }
    }

    pub fn insert(&mut self, feature: Feature) {
        self.features.insert(feature.id.clone(), feature);
    }
}

#[async_trait]
impl FeatureSource for StaticFeatureSource {
    async fn get_feature(&self, id: &str) -> Result<Feature> {
        self.features
            .get(id)
            .cloned()
            .ok_or_else(|| FeatureLensError::FeatureNotFound {
                feature_id: id.to_string(),
            })
    }
}
