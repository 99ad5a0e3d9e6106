//! End-to-end capability issuance and redemption against a real project root.

use std::sync::Arc;
use std::time::Duration;

use vista_core::{
    CapabilityService, FileAccess, FileRequest, ManualClock, ProjectRoot, RedeemParams,
    SigningSecret, VcsService, VistaError,
};

const NOW: i64 = 1_700_000_000;

struct Fixture {
    _dir: tempfile::TempDir,
    clock: Arc<ManualClock>,
    svc: CapabilityService,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/app.js"), "export const answer = 42;\n").unwrap();
    std::fs::create_dir_all(dir.path().join("assets")).unwrap();

    let root = ProjectRoot::new(dir.path()).unwrap();
    let vcs = VcsService::new(root.clone(), "git", Duration::from_secs(10));
    let clock = Arc::new(ManualClock::new(NOW));
    let svc = CapabilityService::new(
        root,
        SigningSecret::new("integration-secret-0123456789").unwrap(),
        vcs,
        Duration::from_secs(300),
        "https://preview.example",
    )
    .with_clock(clock.clone());
    Fixture {
        _dir: dir,
        clock,
        svc,
    }
}

fn params(path: &str, sig: &str, expiry: &str) -> RedeemParams {
    RedeemParams {
        path: Some(path.to_string()),
        sig: Some(sig.to_string()),
        expiry: Some(expiry.to_string()),
    }
}

/// Flip one character to a different character of the same class.
fn mutate(s: &str, idx: usize) -> String {
    let mut chars: Vec<char> = s.chars().collect();
    chars[idx] = match chars[idx] {
        '0' => '1',
        '9' => '8',
        c if c.is_ascii_digit() => ((c as u8) + 1) as char,
        'a' => 'b',
        'f' => 'e',
        c if c.is_ascii_hexdigit() => ((c as u8) + 1) as char,
        '/' => '_',
        c => ((c as u8) ^ 0x01) as char,
    };
    chars.into_iter().collect()
}

/// Every single-character variant of `s`: substitutions, case flips of
/// letters, and `alphabet` characters inserted at each position.
fn variants(s: &str, alphabet: &str) -> Vec<String> {
    let mut out: Vec<String> = (0..s.len()).map(|i| mutate(s, i)).collect();
    for (i, c) in s.char_indices() {
        if c.is_ascii_alphabetic() {
            let mut flipped = s.to_string();
            let swapped = if c.is_ascii_lowercase() {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            flipped.replace_range(i..i + 1, &swapped.to_string());
            out.push(flipped);
        }
    }
    for i in 0..=s.len() {
        for c in alphabet.chars() {
            let mut inserted = s.to_string();
            inserted.insert(i, c);
            out.push(inserted);
        }
    }
    out
}

#[test]
fn issued_url_embeds_path_sig_and_expiry() {
    let f = fixture();
    let cap = f.svc.issue("src/app.js", Duration::from_secs(300)).unwrap();
    assert_eq!(cap.expiry, NOW + 300);
    assert!(cap.path.ends_with("src/app.js"));
    assert!(cap.url.starts_with("https://preview.example/files/raw?path="));
    assert!(cap.url.contains(&format!("sig={}", cap.signature)));
    assert!(cap.url.contains(&format!("expiry={}", cap.expiry)));
}

#[tokio::test]
async fn redeem_twice_within_ttl_then_expire() {
    let f = fixture();
    let cap = f.svc.issue("src/app.js", Duration::from_secs(300)).unwrap();
    let p = params(&cap.path, &cap.signature, &cap.expiry.to_string());

    let first = f.svc.redeem(&p).await.unwrap();
    let second = f.svc.redeem(&p).await.unwrap();
    assert_eq!(first.bytes, b"export const answer = 42;\n");
    assert_eq!(first.bytes, second.bytes);

    // Exactly at expiry is still valid; one second later is not.
    f.clock.set(cap.expiry);
    assert!(f.svc.redeem(&p).await.is_ok());
    f.clock.advance(1);
    let err = f.svc.redeem(&p).await.unwrap_err();
    assert!(matches!(err, VistaError::Expired));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn any_single_character_mutation_is_denied() {
    let f = fixture();
    let cap = f.svc.issue("src/app.js", Duration::from_secs(300)).unwrap();
    let expiry = cap.expiry.to_string();

    for sig in variants(&cap.signature, "0aF") {
        let p = params(&cap.path, &sig, &expiry);
        assert!(
            matches!(f.svc.redeem(&p).await, Err(VistaError::AccessDenied)),
            "signature variant {sig} verified"
        );
    }
    for exp in variants(&expiry, "09") {
        let p = params(&cap.path, &cap.signature, &exp);
        assert!(
            matches!(f.svc.redeem(&p).await, Err(VistaError::AccessDenied)),
            "expiry variant {exp} verified"
        );
    }
    for path in variants(&cap.path, "x/.") {
        let p = params(&path, &cap.signature, &expiry);
        assert!(
            matches!(f.svc.redeem(&p).await, Err(VistaError::AccessDenied)),
            "path variant {path} verified"
        );
    }
}

#[tokio::test]
async fn alternate_encodings_of_a_valid_capability_are_denied() {
    let f = fixture();
    let cap = f.svc.issue("src/app.js", Duration::from_secs(300)).unwrap();
    let expiry = cap.expiry.to_string();

    let encodings = [
        params(&cap.path, &cap.signature.to_ascii_uppercase(), &expiry),
        params(&cap.path, &cap.signature, &format!("+{expiry}")),
        params(&cap.path, &cap.signature, &format!("0{expiry}")),
        params(&cap.path, &cap.signature, &format!("00{expiry}")),
    ];
    for p in encodings {
        assert!(
            matches!(f.svc.redeem(&p).await, Err(VistaError::AccessDenied)),
            "{p:?} verified"
        );
    }
    // The canonical form still redeems.
    let p = params(&cap.path, &cap.signature, &expiry);
    assert!(f.svc.redeem(&p).await.is_ok());
}

#[tokio::test]
async fn traversal_is_denied_at_issuance() {
    let f = fixture();
    for bad in ["../../etc/passwd", "src/../../../etc/passwd", "/etc/passwd"] {
        assert!(
            matches!(
                f.svc.issue(bad, Duration::from_secs(60)),
                Err(VistaError::AccessDenied)
            ),
            "{bad} issued"
        );
        let req = FileRequest {
            path: bad.to_string(),
            diff: false,
            ignore_whitespace: false,
        };
        assert!(matches!(f.svc.request(&req).await, Err(VistaError::AccessDenied)));
    }
}

#[tokio::test]
async fn redeem_outside_root_is_denied_even_with_valid_signature_shape() {
    let f = fixture();
    let cap = f.svc.issue("src/app.js", Duration::from_secs(300)).unwrap();
    let p = params("/etc/passwd", &cap.signature, &cap.expiry.to_string());
    assert!(matches!(f.svc.redeem(&p).await, Err(VistaError::AccessDenied)));
}

#[tokio::test]
async fn missing_or_malformed_params_are_input_errors() {
    let f = fixture();
    let cap = f.svc.issue("src/app.js", Duration::from_secs(300)).unwrap();
    let cases = [
        RedeemParams::default(),
        RedeemParams {
            path: Some(cap.path.clone()),
            sig: Some(cap.signature.clone()),
            expiry: None,
        },
        params(&cap.path, &cap.signature, "tomorrow"),
    ];
    for p in cases {
        assert!(matches!(f.svc.redeem(&p).await, Err(VistaError::Input(_))));
    }
}

#[tokio::test]
async fn deleted_file_redeems_as_not_found() {
    let f = fixture();
    let cap = f.svc.issue("src/app.js", Duration::from_secs(300)).unwrap();
    std::fs::remove_file(&cap.path).unwrap();
    let p = params(&cap.path, &cap.signature, &cap.expiry.to_string());
    assert!(matches!(f.svc.redeem(&p).await, Err(VistaError::NotFound(_))));
}

#[tokio::test]
async fn directories_are_not_regular_files() {
    let f = fixture();
    assert!(matches!(
        f.svc.issue("assets", Duration::from_secs(60)),
        Err(VistaError::NotFound(_))
    ));
    let req = FileRequest {
        path: "src/app.js".into(),
        diff: false,
        ignore_whitespace: false,
    };
    assert!(matches!(
        f.svc.request(&req).await.unwrap(),
        FileAccess::Capability { expiry, .. } if expiry == NOW + 300
    ));
}
