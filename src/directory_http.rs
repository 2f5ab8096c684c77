//! HTTP clients for the certificate and university registries.
//!
//! Both registries wrap payloads in `{ "success": bool, "data": ... }`.
//! Status mapping lives here and nowhere else:
//!
//! - `404`, `success: false`, or missing `data` → [`DirectoryError::NotFound`]
//! - client timeout → [`DirectoryError::Timeout`]
//! - anything else that is not a decodable 2xx → [`DirectoryError::Transport`]

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::directory::{CertificateDirectory, UniversityDirectory};
use crate::error::DirectoryError;
use crate::models::{Certificate, University};

const USER_AGENT: &str = concat!("certificate-verifier/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyPayload {
    public_key: String,
}

/// Shared JSON-over-HTTP plumbing for one registry.
#[derive(Debug, Clone)]
struct RegistryClient {
    client: reqwest::Client,
    base_url: Url,
}

impl RegistryClient {
    fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("invalid registry URL: {base_url}"))?;
        anyhow::ensure!(!base_url.cannot_be_a_base(), "registry URL cannot be a base: {base_url}");

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("building HTTP client")?;

        Ok(Self { client, base_url })
    }

    /// Append percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn fetch<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, DirectoryError> {
        let url = self.endpoint(segments);
        debug!(%url, "directory request");

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            debug!(%url, "directory record not found");
            return Err(DirectoryError::NotFound);
        }
        if !status.is_success() {
            return Err(DirectoryError::Transport(format!("{url} returned {status}")));
        }

        match response.json::<Envelope<T>>().await? {
            Envelope {
                success: true,
                data: Some(data),
            } => Ok(data),
            _ => Err(DirectoryError::NotFound),
        }
    }
}

// ── Certificates ──────────────────────────────────────────────────────────────

/// Certificate registry client.
///
/// - `GET {base}/api/certificates/{id}`
/// - `GET {base}/api/certificates/code/{code}`
#[derive(Debug, Clone)]
pub struct HttpCertificateDirectory {
    inner: RegistryClient,
}

impl HttpCertificateDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            inner: RegistryClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl CertificateDirectory for HttpCertificateDirectory {
    async fn get_by_id(&self, id: &str) -> Result<Certificate, DirectoryError> {
        self.inner.fetch(&["api", "certificates", id]).await
    }

    async fn get_by_code(&self, code: &str) -> Result<Certificate, DirectoryError> {
        self.inner.fetch(&["api", "certificates", "code", code]).await
    }
}

// ── Universities ──────────────────────────────────────────────────────────────

/// University registry client.
///
/// - `GET {base}/api/universities/{id}`
/// - `GET {base}/api/universities/{id}/public-key`
#[derive(Debug, Clone)]
pub struct HttpUniversityDirectory {
    inner: RegistryClient,
}

impl HttpUniversityDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            inner: RegistryClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl UniversityDirectory for HttpUniversityDirectory {
    async fn get_by_id(&self, id: &str) -> Result<University, DirectoryError> {
        self.inner.fetch(&["api", "universities", id]).await
    }

    async fn get_public_key(&self, university_id: &str) -> Result<String, DirectoryError> {
        let payload: PublicKeyPayload = self
            .inner
            .fetch(&["api", "universities", university_id, "public-key"])
            .await?;
        Ok(payload.public_key)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
