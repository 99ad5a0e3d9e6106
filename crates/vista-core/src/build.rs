//! Build cache: bundle an entry and publish it content-addressed.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bundler::Bundler;
use crate::containment::ProjectRoot;
use crate::error::{Result, VistaError};
use crate::metrics::METRICS;
use crate::obs;
use crate::store::{ArtifactStore, Version};

/// Options accepted by [`BuildService::build`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    /// Must stay `true`: non-ASCII sources are always rejected.
    #[serde(default = "default_ascii_only")]
    pub ascii_only: bool,
}

fn default_ascii_only() -> bool {
    true
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self { ascii_only: true }
    }
}

/// A published bundle. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildArtifact {
    #[serde(skip)]
    pub entry: PathBuf,
    pub bundle_url: String,
    pub version: Version,
    #[serde(rename = "sha256")]
    pub content_hash: String,
    #[serde(skip)]
    pub size: usize,
}

/// Bundles entries under the project root and publishes them to a store.
pub struct BuildService {
    root: ProjectRoot,
    store: Arc<dyn ArtifactStore>,
    public_base: String,
}

impl BuildService {
    pub fn new(root: ProjectRoot, store: Arc<dyn ArtifactStore>, public_base: &str) -> Self {
        Self {
            root,
            store,
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }

    /// Stable, cache-forever URL for a version.
    pub fn bundle_url(&self, version: &Version) -> String {
        format!("{}/bundles/{version}.js", self.public_base)
    }

    /// Bundle `entry` and publish the result.
    ///
    /// Identical output always yields the same version and URL; republishing
    /// does not rewrite the stored artifact.
    pub async fn build(&self, entry: &str, options: &BuildOptions) -> Result<BuildArtifact> {
        if !options.ascii_only {
            return Err(VistaError::Input(
                "asciiOnly cannot be disabled: non-ASCII sources are rejected".into(),
            ));
        }
        let entry_path = self.root.resolve(entry)?;
        if !entry_path.is_file() {
            return Err(VistaError::NotFound(format!("entry {entry} is not a file")));
        }

        let root = self.root.clone();
        let store = self.store.clone();
        let path = entry_path.clone();
        let (digest, size) = tokio::task::spawn_blocking(move || -> Result<_> {
            let bytes = Bundler::new(&root).bundle(&path)?;
            let digest = store.put(&bytes)?;
            Ok((digest, bytes.len()))
        })
        .await
        .map_err(|e| VistaError::Internal(format!("build task failed: {e}")))??;

        let version = digest.version();
        let artifact = BuildArtifact {
            entry: entry_path,
            bundle_url: self.bundle_url(&version),
            version,
            content_hash: digest.to_hex(),
            size,
        };
        METRICS.inc_builds_published();
        obs::emit_build_published(entry, artifact.version.as_str(), artifact.size);
        Ok(artifact)
    }

    /// Read a published bundle back for serving.
    pub async fn fetch(&self, version: &str) -> Result<Vec<u8>> {
        let version: Version = version.parse()?;
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.get(&version))
            .await
            .map_err(|e| VistaError::Internal(format!("fetch task failed: {e}")))?
            .map_err(VistaError::from)
    }
}
