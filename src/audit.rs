//! Append-only log of verification attempts.
//!
//! Every verification attempt, successful or not, lands here once. The log
//! feeds per-day statistics and per-certificate history, and is trimmed by a
//! retention purge. Entries are never updated.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::AuditError;
use crate::models::{
    DailyStatistics, NewLogEntry, VerificationLogEntry, VerificationOutcome,
};

#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append one attempt.
    async fn record(&self, entry: NewLogEntry) -> Result<(), AuditError>;

    /// Per-day aggregates over the trailing `since_days`, newest day first.
    async fn statistics(&self, since_days: i64) -> Result<Vec<DailyStatistics>, AuditError>;

    /// Most recent attempts for one certificate, newest first.
    async fn history(
        &self,
        certificate_id: &str,
        limit: i64,
    ) -> Result<Vec<VerificationLogEntry>, AuditError>;

    /// Delete entries older than `older_than_days`; returns the number removed.
    async fn purge(&self, older_than_days: i64) -> Result<u64, AuditError>;

    /// Reachability probe for health checks.
    async fn ping(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Process-local audit log, used when no `DATABASE_URL` is configured.
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: RwLock<Vec<VerificationLogEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append with an explicit timestamp (backfills, tests).
    pub async fn record_at(&self, entry: NewLogEntry, timestamp: DateTime<Utc>) {
        self.entries
            .write()
            .await
            .push(VerificationLogEntry::from_new(entry, timestamp));
    }

    pub async fn entries(&self) -> Vec<VerificationLogEntry> {
        self.entries.read().await.clone()
    }
}

/// `now - days`, saturating at the earliest representable instant.
fn days_ago(days: i64) -> DateTime<Utc> {
    Duration::try_days(days)
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Default)]
struct DayBucket {
    total: i64,
    valid: i64,
    invalid: i64,
    error: i64,
    latency_sum: i64,
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record(&self, entry: NewLogEntry) -> Result<(), AuditError> {
        self.record_at(entry, Utc::now()).await;
        Ok(())
    }

    async fn statistics(&self, since_days: i64) -> Result<Vec<DailyStatistics>, AuditError> {
        let cutoff = days_ago(since_days);
        let mut days: BTreeMap<NaiveDate, DayBucket> = BTreeMap::new();

        for entry in self.entries.read().await.iter().filter(|e| e.timestamp >= cutoff) {
            let bucket = days.entry(entry.timestamp.date_naive()).or_default();
            bucket.total += 1;
            bucket.latency_sum += entry.response_time_ms;
            match entry.result {
                VerificationOutcome::Valid => bucket.valid += 1,
                VerificationOutcome::Invalid => bucket.invalid += 1,
                VerificationOutcome::Error => bucket.error += 1,
            }
        }

        Ok(days
            .into_iter()
            .rev()
            .map(|(date, b)| DailyStatistics {
                date,
                total_verifications: b.total,
                valid_count: b.valid,
                invalid_count: b.invalid,
                error_count: b.error,
                avg_response_time_ms: Some(b.latency_sum as f64 / b.total as f64),
            })
            .collect())
    }

    async fn history(
        &self,
        certificate_id: &str,
        limit: i64,
    ) -> Result<Vec<VerificationLogEntry>, AuditError> {
        let mut matching: Vec<_> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.certificate_id == certificate_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(matching)
    }

    async fn purge(&self, older_than_days: i64) -> Result<u64, AuditError> {
        let cutoff = days_ago(older_than_days);
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}
