// SPDX-License-Identifier: EUPL-1.2

//! RSA signature verification and content hashing for issued certificates.
//!
//! A university signs the hex-encoded SHA-256 content hash of each
//! certificate it issues with its RSA private key (RSASSA-PKCS1-v1_5 over
//! SHA-256). Verifiers check that signature against the university's
//! registered public key.
//!
//! ## Canonical record format
//!
//! The content hash is the SHA-256 digest of the record serialized with the
//! JSON Canonicalization Scheme (RFC 8785): object keys sorted at every depth,
//! no insignificant whitespace, ECMAScript number formatting:
//! ```text
//! {"certificateNumber":"CERT-2024-001","cgpa":3.8,"courseName":"Computer Science",...}
//! ```

use base64::{engine::general_purpose::STANDARD, Engine};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Failures inside the crypto layer. Never surfaced to API callers:
/// [`verify_signature`] collapses every variant to `false`.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("unreadable public key: {0}")]
    KeyFormat(String),

    #[error("bad signature encoding: {0}")]
    SignatureEncoding(#[from] base64::DecodeError),

    #[error("signature does not match digest")]
    Mismatch,

    #[error("record has no canonical JSON form: {0}")]
    Canonicalize(String),
}

/// Verify an RSA signature over `data`.
///
/// - `data`           — the attested bytes (for certificates: the stored hex content hash)
/// - `signature_b64`  — standard base64 signature as produced by the issuer
/// - `public_key_pem` — SPKI (`BEGIN PUBLIC KEY`) or PKCS#1 (`BEGIN RSA PUBLIC KEY`) PEM
///
/// Fail-closed: malformed keys, malformed signatures and digest mismatches
/// all return `false`.
pub fn verify_signature(data: &[u8], signature_b64: &str, public_key_pem: &str) -> bool {
    match check_signature(data, signature_b64, public_key_pem) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "signature rejected");
            false
        }
    }
}

fn check_signature(
    data: &[u8],
    signature_b64: &str,
    public_key_pem: &str,
) -> Result<(), CryptoError> {
    let public_key = parse_public_key(public_key_pem)?;

    let signature = STANDARD.decode(signature_b64.trim())?;
    let digest = Sha256::digest(data);

    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
        .map_err(|_| CryptoError::Mismatch)
}

fn parse_public_key(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    let pem = pem.trim();
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|spki_err| {
            RsaPublicKey::from_pkcs1_pem(pem).map_err(|pkcs1_err| {
                CryptoError::KeyFormat(format!("spki: {spki_err}; pkcs1: {pkcs1_err}"))
            })
        })
}

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// RFC 8785 (JCS) canonical JSON bytes of `record`.
pub fn canonical_bytes<T: Serialize>(record: &T) -> Result<Vec<u8>, CryptoError> {
    serde_jcs::to_vec(record).map_err(|e| CryptoError::Canonicalize(e.to_string()))
}

/// Compute the content hash of a record: SHA-256 over its JCS canonical form, hex-encoded.
///
/// Key order in the input never affects the result.
pub fn compute_hash<T: Serialize>(record: &T) -> Result<String, CryptoError> {
    Ok(sha256_hex(&canonical_bytes(record)?))
}

/// Compare two hex digests, ignoring case and surrounding whitespace.
pub fn digests_equal(actual_hex: &str, expected_hex: &str) -> bool {
    actual_hex.trim().eq_ignore_ascii_case(expected_hex.trim())
}

/// Recompute the content hash of `record` and compare it with `expected_hex`.
///
/// Returns `false` when the record cannot be serialized.
pub fn hash_matches<T: Serialize>(record: &T, expected_hex: &str) -> bool {
    match compute_hash(record) {
        Ok(actual) => digests_equal(&actual, expected_hex),
        Err(e) => {
            tracing::warn!(error = %e, "hash recomputation failed");
            false
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
