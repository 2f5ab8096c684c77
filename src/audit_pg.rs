//! PostgreSQL-backed audit log (`verification_logs` table).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::error::AuditError;
use crate::models::{DailyStatistics, NewLogEntry, VerificationLogEntry};

pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Raw row; enum columns arrive as text and are parsed on the way out.
#[derive(Debug, sqlx::FromRow)]
struct LogRow {
    id: Uuid,
    certificate_id: String,
    verification_method: String,
    verifier_ip: Option<String>,
    result: String,
    error_message: Option<String>,
    response_time_ms: i64,
    verified_at: DateTime<Utc>,
}

impl TryFrom<LogRow> for VerificationLogEntry {
    type Error = AuditError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            certificate_id: row.certificate_id,
            verification_method: row
                .verification_method
                .parse()
                .map_err(AuditError::CorruptRow)?,
            verifier_ip: row.verifier_ip,
            result: row.result.parse().map_err(AuditError::CorruptRow)?,
            error_message: row.error_message,
            response_time_ms: row.response_time_ms,
            timestamp: row.verified_at,
        })
    }
}

fn days_param(days: i64) -> i32 {
    i32::try_from(days).unwrap_or(i32::MAX)
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn record(&self, entry: NewLogEntry) -> Result<(), AuditError> {
        sqlx::query(
            "INSERT INTO verification_logs
               (id, certificate_id, verification_method, verifier_ip, result,
                error_message, response_time_ms)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::new_v4())
        .bind(&entry.certificate_id)
        .bind(entry.verification_method.as_str())
        .bind(&entry.verifier_ip)
        .bind(entry.result.as_str())
        .bind(&entry.error_message)
        .bind(entry.response_time_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn statistics(&self, since_days: i64) -> Result<Vec<DailyStatistics>, AuditError> {
        let rows = sqlx::query_as::<_, DailyStatistics>(
            "SELECT
               (verified_at AT TIME ZONE 'UTC')::date           AS date,
               COUNT(*)                                         AS total_verifications,
               COUNT(*) FILTER (WHERE result = 'valid')         AS valid_count,
               COUNT(*) FILTER (WHERE result = 'invalid')       AS invalid_count,
               COUNT(*) FILTER (WHERE result = 'error')         AS error_count,
               AVG(response_time_ms)::float8                    AS avg_response_time_ms
             FROM verification_logs
             WHERE verified_at >= NOW() - ($1::int * INTERVAL '1 day')
             GROUP BY 1
             ORDER BY 1 DESC",
        )
        .bind(days_param(since_days))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn history(
        &self,
        certificate_id: &str,
        limit: i64,
    ) -> Result<Vec<VerificationLogEntry>, AuditError> {
        sqlx::query_as::<_, LogRow>(
            "SELECT id, certificate_id, verification_method, verifier_ip, result,
                    error_message, response_time_ms, verified_at
             FROM verification_logs
             WHERE certificate_id = $1
             ORDER BY verified_at DESC
             LIMIT $2",
        )
        .bind(certificate_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(VerificationLogEntry::try_from)
        .collect()
    }

    async fn purge(&self, older_than_days: i64) -> Result<u64, AuditError> {
        let result = sqlx::query(
            "DELETE FROM verification_logs
             WHERE verified_at < NOW() - ($1::int * INTERVAL '1 day')",
        )
        .bind(days_param(older_than_days))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), AuditError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{VerificationMethod, VerificationOutcome};

    fn row(method: &str, result: &str) -> LogRow {
        LogRow {
            id: Uuid::new_v4(),
            certificate_id: "C1".into(),
            verification_method: method.into(),
            verifier_ip: None,
            result: result.into(),
            error_message: Some("certificate not found".into()),
            response_time_ms: 12,
            verified_at: Utc::now(),
        }
    }

    #[test]
    fn rows_convert_to_entries() {
        let entry = VerificationLogEntry::try_from(row("code", "invalid")).unwrap();
        assert_eq!(entry.verification_method, VerificationMethod::Code);
        assert_eq!(entry.result, VerificationOutcome::Invalid);
        assert_eq!(entry.response_time_ms, 12);
    }

    #[test]
    fn unknown_enum_text_is_corrupt() {
        assert!(matches!(
            VerificationLogEntry::try_from(row("fax", "valid")),
            Err(AuditError::CorruptRow(_))
        ));
        assert!(matches!(
            VerificationLogEntry::try_from(row("id", "maybe")),
            Err(AuditError::CorruptRow(_))
        ));
    }

    #[test]
    fn day_window_saturates() {
        assert_eq!(days_param(30), 30);
        assert_eq!(days_param(i64::MAX), i32::MAX);
    }
}
