//! Process-wide configuration, loaded once at startup.
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML file,
//! `VISTA_*` environment variables. The binary layers CLI flags on top.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, VistaError};

/// Minimum accepted signing secret length in bytes.
pub const MIN_SECRET_LEN: usize = 16;

pub const DEFAULT_CAPABILITY_TTL_SECS: u64 = 300;
pub const DEFAULT_VCS_TIMEOUT_MS: u64 = 10_000;

/// Immutable signing key for capability URLs.
///
/// `Debug` never prints the key material.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct SigningSecret(String);

impl SigningSecret {
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LEN {
            return Err(VistaError::Input(format!(
                "signing secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        Ok(Self(secret))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret(<redacted>)")
    }
}

/// Raw, partially-specified configuration as read from a TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub project_root: Option<PathBuf>,
    pub signing_secret: Option<SigningSecret>,
    pub artifact_dir: Option<PathBuf>,
    pub public_base: Option<String>,
    pub capability_ttl_secs: Option<u64>,
    pub vcs_timeout_ms: Option<u64>,
    pub git_binary: Option<String>,
}

impl ConfigFile {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| VistaError::Input(format!("invalid config: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            VistaError::Input(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    /// Overlay `VISTA_*` variables read through `lookup`.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("VISTA_PROJECT_ROOT") {
            self.project_root = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("VISTA_SIGNING_SECRET") {
            self.signing_secret = Some(SigningSecret::new(v)?);
        }
        if let Some(v) = lookup("VISTA_ARTIFACT_DIR") {
            self.artifact_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("VISTA_PUBLIC_BASE") {
            self.public_base = Some(v);
        }
        if let Some(v) = lookup("VISTA_CAPABILITY_TTL_SECS") {
            let secs = v
                .parse()
                .map_err(|_| VistaError::Input(format!("VISTA_CAPABILITY_TTL_SECS: {v}")))?;
            self.capability_ttl_secs = Some(secs);
        }
        if let Some(v) = lookup("VISTA_VCS_TIMEOUT_MS") {
            let ms = v
                .parse()
                .map_err(|_| VistaError::Input(format!("VISTA_VCS_TIMEOUT_MS: {v}")))?;
            self.vcs_timeout_ms = Some(ms);
        }
        Ok(self)
    }

    /// Fill defaults and validate.
    pub fn finish(self) -> Result<VistaConfig> {
        let project_root = self
            .project_root
            .ok_or_else(|| VistaError::Input("project_root is required".into()))?;
        let signing_secret = self
            .signing_secret
            .ok_or_else(|| VistaError::Input("signing_secret is required".into()))?;
        // Re-validate: a TOML-sourced secret bypasses `SigningSecret::new`.
        let signing_secret = SigningSecret::new(signing_secret.0)?;
        let artifact_dir = self
            .artifact_dir
            .unwrap_or_else(|| project_root.join(".vista").join("artifacts"));
        let capability_ttl_secs = self
            .capability_ttl_secs
            .unwrap_or(DEFAULT_CAPABILITY_TTL_SECS);
        if capability_ttl_secs == 0 {
            return Err(VistaError::Input("capability_ttl_secs must be > 0".into()));
        }
        let vcs_timeout_ms = self.vcs_timeout_ms.unwrap_or(DEFAULT_VCS_TIMEOUT_MS);
        if vcs_timeout_ms == 0 {
            return Err(VistaError::Input("vcs_timeout_ms must be > 0".into()));
        }

        Ok(VistaConfig {
            project_root,
            signing_secret,
            artifact_dir,
            public_base: self
                .public_base
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            capability_ttl: Duration::from_secs(capability_ttl_secs),
            vcs_timeout: Duration::from_millis(vcs_timeout_ms),
            git_binary: self.git_binary.unwrap_or_else(|| "git".to_string()),
        })
    }
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct VistaConfig {
    pub project_root: PathBuf,
    pub signing_secret: SigningSecret,
    pub artifact_dir: PathBuf,
    /// URL prefix for bundle and capability URLs; empty means relative URLs.
    pub public_base: String,
    pub capability_ttl: Duration,
    pub vcs_timeout: Duration,
    pub git_binary: String,
}

impl VistaConfig {
    /// Minimal config for a project root, with defaults for everything else.
    pub fn new(project_root: impl Into<PathBuf>, secret: SigningSecret) -> Self {
        let project_root = project_root.into();
        Self {
            artifact_dir: project_root.join(".vista").join("artifacts"),
            project_root,
            signing_secret: secret,
            public_base: String::new(),
            capability_ttl: Duration::from_secs(DEFAULT_CAPABILITY_TTL_SECS),
            vcs_timeout: Duration::from_millis(DEFAULT_VCS_TIMEOUT_MS),
            git_binary: "git".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "0123456789abcdef-secret";

    #[test]
    fn test_defaults_applied() {
        let file = ConfigFile::from_toml(&format!(
            "project_root = \"/srv/app\"\nsigning_secret = \"{SECRET}\"\n"
        ))
        .unwrap();
        let cfg = file.finish().unwrap();
        assert_eq!(cfg.capability_ttl, Duration::from_secs(300));
        assert_eq!(cfg.vcs_timeout, Duration::from_secs(10));
        assert_eq!(cfg.artifact_dir, PathBuf::from("/srv/app/.vista/artifacts"));
        assert_eq!(cfg.git_binary, "git");
        assert_eq!(cfg.public_base, "");
    }

    #[test]
    fn test_env_overrides_file() {
        let file = ConfigFile::from_toml("project_root = \"/srv/app\"\npublic_base = \"http://a/\"\n")
            .unwrap();
        let env: HashMap<&str, &str> = [
            ("VISTA_SIGNING_SECRET", SECRET),
            ("VISTA_PUBLIC_BASE", "https://preview.example/"),
            ("VISTA_CAPABILITY_TTL_SECS", "60"),
        ]
        .into_iter()
        .collect();
        let cfg = file
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap()
            .finish()
            .unwrap();
        assert_eq!(cfg.public_base, "https://preview.example");
        assert_eq!(cfg.capability_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_short_secret_rejected() {
        let file = ConfigFile::from_toml("project_root = \"/srv\"\nsigning_secret = \"short\"\n")
            .unwrap();
        assert!(file.finish().is_err());
        assert!(SigningSecret::new("short").is_err());
    }

    #[test]
    fn test_missing_root_rejected() {
        let err = ConfigFile::default().finish().unwrap_err();
        assert!(err.to_string().contains("project_root"));
    }

    #[test]
    fn test_zero_durations_rejected() {
        let base = format!("project_root = \"/srv/app\"\nsigning_secret = \"{SECRET}\"\n");
        for extra in ["capability_ttl_secs = 0", "vcs_timeout_ms = 0"] {
            let file = ConfigFile::from_toml(&format!("{base}{extra}\n")).unwrap();
            let err = file.finish().unwrap_err();
            assert!(matches!(err, VistaError::Input(_)), "{extra}");
            assert!(err.to_string().contains(extra.split(' ').next().unwrap()));
        }
        let env = ConfigFile::from_toml(&base)
            .unwrap()
            .apply_env(|k| (k == "VISTA_VCS_TIMEOUT_MS").then(|| "0".to_string()))
            .unwrap();
        assert!(env.finish().is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(ConfigFile::from_toml("projct_root = \"/srv\"").is_err());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = SigningSecret::new(SECRET).unwrap();
        assert!(!format!("{secret:?}").contains("0123"));
    }
}
