//! Shared fixtures for unit tests: a throwaway issuer key pair, signed
//! certificates and directory/audit fakes that fail in controlled ways.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::audit::{AuditLog, MemoryAuditLog};
use crate::crypto;
use crate::directory::{CertificateDirectory, UniversityDirectory};
use crate::error::{AuditError, DirectoryError};
use crate::models::{
    Certificate, CertificateStatus, DailyStatistics, NewLogEntry, University,
    VerificationLogEntry,
};

struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
    public_pem: String,
}

fn generate() -> KeyPair {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("generate RSA key");
    let public = RsaPublicKey::from(&private);
    let public_pem = public
        .to_public_key_pem(LineEnding::LF)
        .expect("encode public key");
    KeyPair {
        private,
        public,
        public_pem,
    }
}

fn issuer() -> &'static KeyPair {
    static KEY: OnceLock<KeyPair> = OnceLock::new();
    KEY.get_or_init(generate)
}

fn stranger() -> &'static KeyPair {
    static KEY: OnceLock<KeyPair> = OnceLock::new();
    KEY.get_or_init(generate)
}

/// SPKI PEM of the issuer key every test university carries.
pub fn test_key_pem() -> &'static str {
    &issuer().public_pem
}

pub fn test_public_key() -> &'static RsaPublicKey {
    &issuer().public
}

/// SPKI PEM of an unrelated key.
pub fn other_key_pem() -> &'static str {
    &stranger().public_pem
}

/// Sign `data` with the issuer key; base64 output.
pub fn sign(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let signature = issuer()
        .private
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .expect("sign");
    STANDARD.encode(signature)
}

/// An active certificate with a correct content hash and issuer signature.
pub fn certificate(id: &str, code: &str, university_id: &str) -> Certificate {
    let mut cert = Certificate {
        id: id.into(),
        certificate_number: format!("CERT-2024-{id}"),
        student_id: format!("S-{id}"),
        university_id: university_id.into(),
        student_name: "Ada Lovelace".into(),
        course_name: "Computer Science".into(),
        specialization: Some("Distributed Systems".into()),
        grade: "A".into(),
        cgpa: Some(3.8),
        issue_date: "2024-06-30".into(),
        completion_date: Some("2024-05-31".into()),
        certificate_hash: String::new(),
        digital_signature: String::new(),
        timestamp_token: None,
        verification_code: code.into(),
        pdf_path: None,
        status: CertificateStatus::Active,
        revocation_reason: None,
    };
    cert.certificate_hash = crypto::compute_hash(&cert.canonical_record()).expect("hash record");
    cert.digital_signature = sign(cert.certificate_hash.as_bytes());
    cert
}

pub fn university(id: &str) -> University {
    University {
        id: id.into(),
        name: format!("University {id}"),
        email: Some(format!("registrar@{}.example.edu", id.to_lowercase())),
        address: None,
        phone: None,
        public_key: test_key_pem().to_string(),
        verified: true,
    }
}

/// Poll until the fire-and-forget audit writes have landed.
pub async fn wait_for_entries(log: &MemoryAuditLog, count: usize) -> Vec<VerificationLogEntry> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let entries = log.entries().await;
            if entries.len() >= count {
                return entries;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected {count} audit entries"))
}

// ── Fakes ─────────────────────────────────────────────────────────────────────

/// Directory whose backend refuses every connection.
pub struct UnreachableDirectory;

#[async_trait]
impl CertificateDirectory for UnreachableDirectory {
    async fn get_by_id(&self, _id: &str) -> Result<Certificate, DirectoryError> {
        Err(DirectoryError::Transport("connection refused".into()))
    }

    async fn get_by_code(&self, _code: &str) -> Result<Certificate, DirectoryError> {
        Err(DirectoryError::Transport("connection refused".into()))
    }
}

#[async_trait]
impl UniversityDirectory for UnreachableDirectory {
    async fn get_by_id(&self, _id: &str) -> Result<University, DirectoryError> {
        Err(DirectoryError::Transport("connection refused".into()))
    }

    async fn get_public_key(&self, _university_id: &str) -> Result<String, DirectoryError> {
        Err(DirectoryError::Transport("connection refused".into()))
    }
}

/// Directory that never answers.
pub struct StalledDirectory;

#[async_trait]
impl CertificateDirectory for StalledDirectory {
    async fn get_by_id(&self, _id: &str) -> Result<Certificate, DirectoryError> {
        std::future::pending().await
    }

    async fn get_by_code(&self, _code: &str) -> Result<Certificate, DirectoryError> {
        std::future::pending().await
    }
}

#[async_trait]
impl UniversityDirectory for StalledDirectory {
    async fn get_by_id(&self, _id: &str) -> Result<University, DirectoryError> {
        std::future::pending().await
    }

    async fn get_public_key(&self, _university_id: &str) -> Result<String, DirectoryError> {
        std::future::pending().await
    }
}

/// Audit store that is down.
pub struct FailingAuditLog;

#[async_trait]
impl AuditLog for FailingAuditLog {
    async fn record(&self, _entry: NewLogEntry) -> Result<(), AuditError> {
        Err(AuditError::Database(sqlx::Error::PoolClosed))
    }

    async fn statistics(&self, _since_days: i64) -> Result<Vec<DailyStatistics>, AuditError> {
        Err(AuditError::Database(sqlx::Error::PoolClosed))
    }

    async fn history(
        &self,
        _certificate_id: &str,
        _limit: i64,
    ) -> Result<Vec<VerificationLogEntry>, AuditError> {
        Err(AuditError::Database(sqlx::Error::PoolClosed))
    }

    async fn purge(&self, _older_than_days: i64) -> Result<u64, AuditError> {
        Err(AuditError::Database(sqlx::Error::PoolClosed))
    }

    async fn ping(&self) -> Result<(), AuditError> {
        Err(AuditError::Database(sqlx::Error::PoolClosed))
    }
}
