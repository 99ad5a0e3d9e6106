//! Capability URLs for read-only file access.
//!
//! A capability is `(path, expiry, signature)` where the signature is
//! HMAC-SHA256 over `path ":" expiry` under the process signing secret.
//! Nothing is stored server-side: redemption recomputes the signature, so a
//! capability is reusable until it expires and cannot be revoked early.
//!
//! Check order on redemption: parameter parsing, lexical containment,
//! signature, expiry, and only then any filesystem access.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::SigningSecret;
use crate::containment::ProjectRoot;
use crate::error::{Result, VistaError};
use crate::metrics::METRICS;
use crate::obs;
use crate::vcs::{DiffOptions, VcsService};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEX_LEN: usize = 64;

/// Source of the current time in epoch seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Settable clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Keyed signer over `(path, expiry)` pairs.
#[derive(Debug, Clone)]
pub struct Signer {
    secret: SigningSecret,
}

impl Signer {
    pub fn new(secret: SigningSecret) -> Self {
        Self { secret }
    }

    fn mac(&self, path: &str, expiry: &str) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(path.as_bytes());
        mac.update(b":");
        mac.update(expiry.as_bytes());
        mac
    }

    /// Hex-encoded signature.
    pub fn sign(&self, path: &str, expiry: i64) -> String {
        hex::encode(self.mac(path, &expiry.to_string()).finalize().into_bytes())
    }

    /// Constant-time verification against the expiry text exactly as
    /// received, so `+N` or `0N` never verify for a signature over `N`.
    ///
    /// Only the canonical form (64 lowercase hex characters) is accepted.
    pub fn verify(&self, path: &str, expiry: &str, signature: &str) -> bool {
        if !is_canonical_signature(signature) {
            return false;
        }
        match hex::decode(signature) {
            Ok(bytes) => self.mac(path, expiry).verify_slice(&bytes).is_ok(),
            Err(_) => false,
        }
    }
}

fn is_canonical_signature(signature: &str) -> bool {
    signature.len() == SIGNATURE_HEX_LEN
        && signature
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// A request for file access.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRequest {
    pub path: String,
    /// Return the working-tree diff inline instead of a capability URL.
    #[serde(default)]
    pub diff: bool,
    #[serde(default)]
    pub ignore_whitespace: bool,
}

/// Either inline content (diffs) or a capability URL (files).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FileAccess {
    Inline { content: String },
    Capability { url: String, expiry: i64 },
}

/// Issued capability, with the pieces embedded in its URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub path: String,
    pub expiry: i64,
    pub signature: String,
    pub url: String,
}

/// Raw redemption parameters, exactly as received.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedeemParams {
    pub path: Option<String>,
    pub sig: Option<String>,
    pub expiry: Option<String>,
}

/// A successfully redeemed capability.
#[derive(Debug)]
pub struct RedeemedFile {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// Issues and redeems capabilities for files under the project root.
pub struct CapabilityService {
    root: ProjectRoot,
    signer: Signer,
    vcs: VcsService,
    ttl: Duration,
    public_base: String,
    clock: Arc<dyn Clock>,
}

impl CapabilityService {
    pub fn new(
        root: ProjectRoot,
        secret: SigningSecret,
        vcs: VcsService,
        ttl: Duration,
        public_base: &str,
    ) -> Self {
        Self {
            root,
            signer: Signer::new(secret),
            vcs,
            ttl,
            public_base: public_base.trim_end_matches('/').to_string(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Serve a [`FileRequest`]: diffs inline, files as capability URLs.
    pub async fn request(&self, req: &FileRequest) -> Result<FileAccess> {
        if req.diff {
            let content = self
                .vcs
                .diff(
                    &req.path,
                    DiffOptions {
                        ignore_whitespace: req.ignore_whitespace,
                    },
                )
                .await
                .inspect_err(deny_log)?;
            return Ok(FileAccess::Inline { content });
        }
        let cap = self.issue(&req.path, self.ttl)?;
        Ok(FileAccess::Capability {
            url: cap.url,
            expiry: cap.expiry,
        })
    }

    /// Issue a capability for one regular file, valid for `ttl`.
    pub fn issue(&self, path: &str, ttl: Duration) -> Result<Capability> {
        // Lexical check first: an escaping path never reaches the filesystem.
        self.root.contain(path).inspect_err(deny_log)?;
        let canonical = self.root.resolve(path).inspect_err(deny_log)?;
        if !canonical.is_file() {
            return Err(VistaError::NotFound(format!("{path} is not a regular file")));
        }
        let subject = canonical
            .to_str()
            .ok_or_else(|| VistaError::Input("path is not valid UTF-8".into()))?
            .to_string();

        let ttl_secs = i64::try_from(ttl.as_secs())
            .map_err(|_| VistaError::Input("ttl out of range".into()))?;
        let expiry = self.clock.now().saturating_add(ttl_secs);
        let signature = self.signer.sign(&subject, expiry);
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("path", &subject)
            .append_pair("sig", &signature)
            .append_pair("expiry", &expiry.to_string())
            .finish();
        let url = format!("{}/files/raw?{query}", self.public_base);

        METRICS.inc_capabilities_issued();
        obs::emit_capability_issued(&subject, expiry);
        Ok(Capability {
            path: subject,
            expiry,
            signature,
            url,
        })
    }

    /// Redeem a capability for the file's bytes.
    pub async fn redeem(&self, params: &RedeemParams) -> Result<RedeemedFile> {
        let (path, sig, expiry_text, expiry) = parse_params(params)?;

        if let Err(e) = self.root.contain(path) {
            deny_log(&e);
            return Err(e);
        }
        if !self.signer.verify(path, expiry_text, sig) {
            let e = VistaError::AccessDenied;
            deny_log(&e);
            return Err(e);
        }
        if self.clock.now() > expiry {
            let e = VistaError::Expired;
            deny_log(&e);
            return Err(e);
        }

        let canonical = self.root.resolve(path).inspect_err(deny_log)?;
        let meta = tokio::fs::metadata(&canonical).await?;
        if !meta.is_file() {
            return Err(VistaError::NotFound("not a regular file".into()));
        }
        let bytes = tokio::fs::read(&canonical).await?;
        Ok(RedeemedFile {
            path: canonical,
            bytes,
        })
    }
}

/// Returns `(path, sig, expiry_text, expiry)`; the text is what was signed.
fn parse_params(params: &RedeemParams) -> Result<(&str, &str, &str, i64)> {
    let path = non_empty(params.path.as_deref(), "path")?;
    let sig = non_empty(params.sig.as_deref(), "sig")?;
    let expiry_text = non_empty(params.expiry.as_deref(), "expiry")?;
    let expiry = expiry_text
        .parse::<i64>()
        .map_err(|_| VistaError::Input("expiry must be an integer".into()))?;
    Ok((path, sig, expiry_text, expiry))
}

fn non_empty<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(VistaError::Input(format!("missing parameter: {name}"))),
    }
}

fn deny_log(err: &VistaError) {
    if matches!(err, VistaError::AccessDenied | VistaError::Expired) {
        METRICS.inc_redemptions_denied();
        obs::emit_capability_denied(err.kind());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> Signer {
        Signer::new(SigningSecret::new("unit-test-secret-0123456789").unwrap())
    }

    #[test]
    fn test_signature_is_deterministic_hex() {
        let s = signer();
        let a = s.sign("/srv/app/a.js", 1_700_000_000);
        assert_eq!(a, s.sign("/srv/app/a.js", 1_700_000_000));
        assert_eq!(a.len(), 64);
        assert!(s.verify("/srv/app/a.js", "1700000000", &a));
    }

    #[test]
    fn test_signature_binds_path_and_expiry() {
        let s = signer();
        let sig = s.sign("/srv/app/a.js", 100);
        assert!(!s.verify("/srv/app/b.js", "100", &sig));
        assert!(!s.verify("/srv/app/a.js", "101", &sig));
        assert!(!s.verify("/srv/app/a.js", "100", "zz"));
        assert!(!s.verify("/srv/app/a.js", "100", ""));
    }

    #[test]
    fn test_non_canonical_encodings_do_not_verify() {
        let s = signer();
        let sig = s.sign("/srv/app/a.js", 100);
        assert!(s.verify("/srv/app/a.js", "100", &sig));
        assert!(!s.verify("/srv/app/a.js", "100", &sig.to_ascii_uppercase()));
        assert!(!s.verify("/srv/app/a.js", "+100", &sig));
        assert!(!s.verify("/srv/app/a.js", "0100", &sig));
        assert!(!s.verify("/srv/app/a.js", "100", &format!("{sig}0")));
    }

    #[test]
    fn test_different_secret_does_not_verify() {
        let other = Signer::new(SigningSecret::new("another-secret-abcdefghij").unwrap());
        let sig = signer().sign("/p", 1);
        assert!(!other.verify("/p", "1", &sig));
    }

    #[test]
    fn test_missing_params_are_input_errors() {
        let full = RedeemParams {
            path: Some("/p".into()),
            sig: Some("ab".into()),
            expiry: Some("12".into()),
        };
        assert!(parse_params(&full).is_ok());
        for broken in [
            RedeemParams { path: None, ..full.clone() },
            RedeemParams { sig: Some(String::new()), ..full.clone() },
            RedeemParams { expiry: Some("soon".into()), ..full.clone() },
        ] {
            assert!(matches!(parse_params(&broken), Err(VistaError::Input(_))));
        }
    }

    #[test]
    fn test_manual_clock() {
        let c = ManualClock::new(10);
        c.advance(5);
        assert_eq!(c.now(), 15);
        c.set(1);
        assert_eq!(c.now(), 1);
    }
}
