//! Error taxonomy shared by every Vista operation.
//!
//! Each variant maps to a distinct shape at the HTTP edge so a consumer can
//! tell "fetch a fresh capability" ([`VistaError::Expired`]) apart from "do not
//! retry" ([`VistaError::AccessDenied`]) and from transient failures
//! ([`VistaError::Internal`]).

use crate::store::StoreError;

/// Vista domain errors.
#[derive(Debug, thiserror::Error)]
pub enum VistaError {
    /// Malformed or missing request parameters.
    #[error("invalid input: {0}")]
    Input(String),

    /// Path escapes the project root, or the capability is invalid.
    ///
    /// The message never contains the requested path.
    #[error("access denied")]
    AccessDenied,

    /// Capability signature is valid but its expiry has passed.
    #[error("capability expired")]
    Expired,

    #[error("not found: {0}")]
    NotFound(String),

    /// Bundler diagnostic, returned verbatim.
    #[error("build failed: {0}")]
    Build(String),

    /// The version-control binary could not be invoked or rejected the call.
    #[error("vcs error: {0}")]
    Vcs(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VistaError {
    /// Stable, machine-readable kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            VistaError::Input(_) => "input_error",
            VistaError::AccessDenied => "access_denied",
            VistaError::Expired => "capability_expired",
            VistaError::NotFound(_) => "not_found",
            VistaError::Build(_) => "build_error",
            VistaError::Vcs(_) => "vcs_error",
            VistaError::Internal(_) => "internal_error",
        }
    }

    /// Whether the same request may succeed later (fresh capability, transient I/O).
    pub fn is_retryable(&self) -> bool {
        matches!(self, VistaError::Expired | VistaError::Internal(_))
    }
}

impl From<std::io::Error> for VistaError {
    fn from(err: std::io::Error) -> Self {
        VistaError::Internal(err.to_string())
    }
}

impl From<StoreError> for VistaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(version) => VistaError::NotFound(format!("artifact {version}")),
            StoreError::InvalidVersion(v) => VistaError::Input(format!("invalid version: {v}")),
            StoreError::Io(e) => VistaError::Internal(e.to_string()),
        }
    }
}

/// Result type for Vista operations.
pub type Result<T> = std::result::Result<T, VistaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_denied_does_not_leak_detail() {
        let err = VistaError::AccessDenied;
        assert_eq!(err.to_string(), "access denied");
        assert_eq!(err.kind(), "access_denied");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_expired_is_retryable_and_distinct() {
        let err = VistaError::Expired;
        assert!(err.is_retryable());
        assert_ne!(err.kind(), VistaError::AccessDenied.kind());
    }

    #[test]
    fn test_build_diagnostic_is_verbatim() {
        let err = VistaError::Build("cannot resolve \"left-pad\" from src/main.js".into());
        assert!(err.to_string().contains("cannot resolve \"left-pad\""));
    }

    #[test]
    fn test_store_error_mapping() {
        let err: VistaError = StoreError::InvalidVersion("zz".into()).into();
        assert_eq!(err.kind(), "input_error");
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "ro fs");
        let err: VistaError = StoreError::Io(io).into();
        assert_eq!(err.kind(), "internal_error");
    }
}
