//! Redis read-through cache for university records.
//!
//! University public keys are immutable once certificates reference them, so
//! records can be cached for `CACHE_TTL_SECS`. Certificates are never cached:
//! their status changes on revocation. Any Redis failure degrades to a direct
//! directory lookup.

use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::directory::UniversityDirectory;
use crate::error::DirectoryError;
use crate::models::University;

pub struct CachedUniversityDirectory {
    inner: Arc<dyn UniversityDirectory>,
    /// `None` when `REDIS_URL` is not set; every call goes straight to `inner`.
    cache: Option<ConnectionManager>,
    ttl_secs: u64,
}

impl CachedUniversityDirectory {
    pub fn new(
        inner: Arc<dyn UniversityDirectory>,
        cache: Option<ConnectionManager>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            inner,
            cache,
            ttl_secs,
        }
    }

    fn key(id: &str) -> String {
        format!("certificate-verifier:university:{id}")
    }

    async fn cached(&self, id: &str) -> Option<University> {
        let mut con = self.cache.clone()?;
        let raw: Option<String> = match redis::cmd("GET")
            .arg(Self::key(id))
            .query_async(&mut con)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(university_id = %id, "university cache read failed: {e}");
                return None;
            }
        };

        match serde_json::from_str(&raw?) {
            Ok(university) => Some(university),
            Err(e) => {
                tracing::warn!(university_id = %id, "discarding unreadable cache entry: {e}");
                None
            }
        }
    }

    async fn store(&self, university: &University) {
        let Some(mut con) = self.cache.clone() else {
            return;
        };
        let payload = match serde_json::to_string(university) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("university not cacheable: {e}");
                return;
            }
        };

        let result: redis::RedisResult<()> = redis::cmd("SET")
            .arg(Self::key(&university.id))
            .arg(payload)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut con)
            .await;
        if let Err(e) = result {
            tracing::warn!(university_id = %university.id, "university cache write failed: {e}");
        }
    }
}

#[async_trait]
impl UniversityDirectory for CachedUniversityDirectory {
    async fn get_by_id(&self, id: &str) -> Result<University, DirectoryError> {
        if let Some(university) = self.cached(id).await {
            tracing::debug!(university_id = %id, "university cache hit");
            return Ok(university);
        }
        let university = self.inner.get_by_id(id).await?;
        self.store(&university).await;
        Ok(university)
    }

    async fn get_public_key(&self, university_id: &str) -> Result<String, DirectoryError> {
        if let Some(university) = self.cached(university_id).await {
            return Ok(university.public_key);
        }
        self.inner.get_public_key(university_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryUniversityDirectory;
    use crate::testing::university;

    #[tokio::test]
    async fn without_redis_reads_through() {
        let inner = Arc::new(MemoryUniversityDirectory::new([university("U1")]));
        let dir = CachedUniversityDirectory::new(inner, None, 3600);

        assert_eq!(dir.get_by_id("U1").await.unwrap().id, "U1");
        assert!(dir.get_public_key("U1").await.is_ok());
        assert!(matches!(dir.get_by_id("U2").await, Err(DirectoryError::NotFound)));
    }

    #[test]
    fn cache_keys_are_namespaced() {
        assert_eq!(
            CachedUniversityDirectory::key("U1"),
            "certificate-verifier:university:U1"
        );
    }
}
