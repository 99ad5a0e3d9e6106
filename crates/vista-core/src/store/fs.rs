use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{ArtifactStore, Digest, Result, StoreError, Version};

/// Filesystem-backed artifact store with git-style 2-char sharding.
///
/// Layout: `<root>/bundles/<first 2 hex chars>/<remaining version chars>.js`
pub struct FsArtifactStore {
    bundles_dir: PathBuf,
}

impl FsArtifactStore {
    /// Create a store rooted at `root`. Creates `root/bundles/` if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let bundles_dir = root.as_ref().join("bundles");
        fs::create_dir_all(&bundles_dir)?;
        Ok(Self { bundles_dir })
    }

    fn artifact_path(&self, version: &Version) -> PathBuf {
        let v = version.as_str();
        self.bundles_dir.join(&v[..2]).join(format!("{}.js", &v[2..]))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, data: &[u8]) -> Result<Digest> {
        let digest = Digest::compute(data);
        let path = self.artifact_path(&digest.version());

        if path.exists() {
            // Same version token, different bytes: a truncated-hash collision.
            let existing = fs::read(&path)?;
            if Digest::compute(&existing) != digest {
                return Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("version collision for {}", digest.version()),
                )));
            }
            return Ok(digest);
        }

        let shard_dir = match path.parent() {
            Some(dir) => dir,
            None => return Err(StoreError::InvalidVersion(digest.version().to_string())),
        };
        fs::create_dir_all(shard_dir)?;

        // Atomic write: temp file in the same directory, then rename into place.
        let mut tmp = NamedTempFile::new_in(shard_dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;

        Ok(digest)
    }

    fn get(&self, version: &Version) -> Result<Vec<u8>> {
        let path = self.artifact_path(version);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(version.clone())
            } else {
                StoreError::Io(e)
            }
        })
    }
}
