//! Certificate and university directories.
//!
//! The verification engine only talks to these traits. Production wires the
//! HTTP clients in `directory_http`; local runs and tests use the in-memory
//! maps below, optionally seeded from a JSON fixtures file:
//!
//! ```json
//! { "universities": [ { "id": "U1", "name": "...", "publicKey": "-----BEGIN PUBLIC KEY-----..." } ],
//!   "certificates": [ { "id": "C1", "verificationCode": "AB12CD34", ... } ] }
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::DirectoryError;
use crate::models::{Certificate, University};

/// Resolves issued certificates.
#[async_trait]
pub trait CertificateDirectory: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Certificate, DirectoryError>;

    async fn get_by_code(&self, code: &str) -> Result<Certificate, DirectoryError>;
}

/// Resolves issuing universities and their signing keys.
#[async_trait]
pub trait UniversityDirectory: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<University, DirectoryError>;

    /// PEM public key of the university.
    async fn get_public_key(&self, university_id: &str) -> Result<String, DirectoryError>;
}

// ── In-memory ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct CertificateIndex {
    by_id: HashMap<String, Certificate>,
    id_by_code: HashMap<String, String>,
}

/// `HashMap`-backed certificate directory.
#[derive(Default)]
pub struct MemoryCertificateDirectory {
    index: RwLock<CertificateIndex>,
}

impl MemoryCertificateDirectory {
    pub fn new(certificates: impl IntoIterator<Item = Certificate>) -> Self {
        let mut index = CertificateIndex::default();
        for certificate in certificates {
            index
                .id_by_code
                .insert(certificate.verification_code.clone(), certificate.id.clone());
            index.by_id.insert(certificate.id.clone(), certificate);
        }
        Self {
            index: RwLock::new(index),
        }
    }

    /// Insert or replace a certificate (status transitions are replacements).
    pub async fn upsert(&self, certificate: Certificate) {
        let mut index = self.index.write().await;
        index
            .id_by_code
            .insert(certificate.verification_code.clone(), certificate.id.clone());
        index.by_id.insert(certificate.id.clone(), certificate);
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.by_id.len()
    }
}

#[async_trait]
impl CertificateDirectory for MemoryCertificateDirectory {
    async fn get_by_id(&self, id: &str) -> Result<Certificate, DirectoryError> {
        self.index
            .read()
            .await
            .by_id
            .get(id)
            .cloned()
            .ok_or(DirectoryError::NotFound)
    }

    async fn get_by_code(&self, code: &str) -> Result<Certificate, DirectoryError> {
        let index = self.index.read().await;
        index
            .id_by_code
            .get(code)
            .and_then(|id| index.by_id.get(id))
            .cloned()
            .ok_or(DirectoryError::NotFound)
    }
}

/// `HashMap`-backed university directory.
#[derive(Default)]
pub struct MemoryUniversityDirectory {
    by_id: RwLock<HashMap<String, University>>,
}

impl MemoryUniversityDirectory {
    pub fn new(universities: impl IntoIterator<Item = University>) -> Self {
        Self {
            by_id: RwLock::new(universities.into_iter().map(|u| (u.id.clone(), u)).collect()),
        }
    }

    pub async fn len(&self) -> usize {
        self.by_id.read().await.len()
    }
}

#[async_trait]
impl UniversityDirectory for MemoryUniversityDirectory {
    async fn get_by_id(&self, id: &str) -> Result<University, DirectoryError> {
        self.by_id
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(DirectoryError::NotFound)
    }

    async fn get_public_key(&self, university_id: &str) -> Result<String, DirectoryError> {
        self.by_id
            .read()
            .await
            .get(university_id)
            .map(|u| u.public_key.clone())
            .ok_or(DirectoryError::NotFound)
    }
}

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// Contents of a `DIRECTORY_FIXTURES` file.
#[derive(Debug, Default, Deserialize)]
pub struct Fixtures {
    #[serde(default)]
    pub universities: Vec<University>,
    #[serde(default)]
    pub certificates: Vec<Certificate>,
}

impl Fixtures {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let fixtures: Self = serde_json::from_str(raw).context("invalid fixtures JSON")?;

        let mut codes = std::collections::HashSet::new();
        for certificate in &fixtures.certificates {
            anyhow::ensure!(
                codes.insert(certificate.verification_code.as_str()),
                "duplicate verification code in fixtures: {}",
                certificate.verification_code
            );
        }
        Ok(fixtures)
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading fixtures from {}", path.display()))?;
        Self::parse(&raw)
    }

    pub fn into_directories(self) -> (MemoryCertificateDirectory, MemoryUniversityDirectory) {
        (
            MemoryCertificateDirectory::new(self.certificates),
            MemoryUniversityDirectory::new(self.universities),
        )
    }
}
