//! Repository identity checks.
//!
//! A repository is identified by the certificate its index declares. The
//! first successful synchronization trusts whatever certificate it sees
//! (unless a fingerprint was pinned in configuration); every later index
//! must carry the same certificate.

use reposync_schema::Repository;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TrustError {
    #[error("Index declares no signing certificate")]
    MissingCertificate,

    #[error("Signing certificate fingerprint {actual} does not match pinned fingerprint {expected}")]
    PinMismatch { expected: String, actual: String },

    #[error("Signing certificate changed: trusted {expected}, index declares {actual}")]
    CertificateChanged { expected: String, actual: String },
}

/// How an accepted certificate relates to the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// No certificate was stored yet; the observed one becomes trusted.
    FirstUse,
    /// The observed certificate equals the stored one.
    Matches,
}

/// Lowercase hex SHA-256 fingerprint of a certificate.
///
/// Certificates are published hex-encoded; the digest is taken over the
/// decoded bytes, or over the raw text if it is not valid hex.
pub fn fingerprint(cert: &str) -> String {
    let cert = cert.trim();
    let digest = match hex::decode(cert) {
        Ok(raw) => Sha256::digest(raw),
        Err(_) => Sha256::digest(cert.as_bytes()),
    };
    hex::encode(digest)
}

/// Normalize a user-supplied fingerprint (`AB:CD ...` or `abcd...`).
fn normalize_fingerprint(fp: &str) -> String {
    fp.chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Decide whether `observed` may be trusted for `repo`.
///
/// # Errors
///
/// Returns [`TrustError`] if no certificate was declared, the certificate
/// does not match a pinned fingerprint, or it differs from the trusted one.
pub fn verify(repo: &Repository, observed: Option<&str>) -> Result<TrustDecision, TrustError> {
    let observed = observed
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or(TrustError::MissingCertificate)?;
    let actual = fingerprint(observed);

    if let Some(pinned) = &repo.pinned_fingerprint {
        let expected = normalize_fingerprint(pinned);
        if expected != actual {
            return Err(TrustError::PinMismatch { expected, actual });
        }
    }

    match &repo.signing_cert {
        None => Ok(TrustDecision::FirstUse),
        Some(trusted) if trusted.trim().eq_ignore_ascii_case(observed) => {
            Ok(TrustDecision::Matches)
        }
        Some(trusted) => Err(TrustError::CertificateChanged {
            expected: fingerprint(trusted),
            actual,
        }),
    }
}
