//! Certificate verification engine.
//!
//! Each request walks a fixed pipeline and stops at the first failing stage:
//!
//! ```text
//! LOOKUP → STATUS_CHECK → UNIVERSITY_LOOKUP → SIGNATURE_CHECK → DONE
//! ```
//!
//! A missing certificate or university is a verdict (`valid: false`). A
//! directory that cannot answer (transport failure, timeout) is not: the
//! caller gets [`VerifyError::DirectoryUnavailable`] and the audit entry is
//! recorded as `error`, never as `invalid`.
//!
//! Every terminal state is written to the audit log exactly once, off the
//! response path. Audit failures are logged here and go no further.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::audit::AuditLog;
use crate::crypto;
use crate::directory::{CertificateDirectory, UniversityDirectory};
use crate::error::{DirectoryError, FieldError, VerifyError};
use crate::models::{
    validate_certificate_id, validate_verification_code, BulkItemResult, BulkVerificationResponse,
    BulkVerifyRequest, Certificate, DailyStatistics, IntegrityResponse, Lookup, NewLogEntry,
    SignatureVerifyRequest, UniversitySummary, VerificationLogEntry, VerificationMethod,
    VerificationOutcome, VerificationResult, VerifyRequest, UNKNOWN_CERTIFICATE,
};

pub const CERTIFICATE_NOT_FOUND: &str = "certificate not found";
pub const UNIVERSITY_NOT_FOUND: &str = "university not found";
pub const SIGNATURE_FAILED: &str = "digital signature verification failed";
/// Reason given for bulk items that could not reach a verdict.
pub const VERIFICATION_UNAVAILABLE: &str = "verification could not be completed, please retry";

pub const MAX_STATISTICS_DAYS: i64 = 365;
pub const MAX_HISTORY_LIMIT: i64 = 100;
/// Longest purge window accepted (about a century).
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Tunables for the engine, taken from [`crate::config::Config`].
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Largest accepted bulk batch.
    pub max_bulk: usize,
    /// Bulk items verified concurrently.
    pub bulk_concurrency: usize,
    /// Upper bound on any single directory call.
    pub lookup_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_bulk: 100,
            bulk_concurrency: 8,
            lookup_timeout: Duration::from_secs(5),
        }
    }
}

/// Terminal state of one pipeline run, before it is audited.
struct Attempt {
    /// Certificate id for the audit entry (lookup key or sentinel if unresolved).
    certificate_id: String,
    outcome: Result<VerificationResult, DirectoryError>,
}

impl Attempt {
    fn verdict(certificate_id: impl Into<String>, result: VerificationResult) -> Self {
        Self {
            certificate_id: certificate_id.into(),
            outcome: Ok(result),
        }
    }

    fn failed(certificate_id: impl Into<String>, error: DirectoryError) -> Self {
        Self {
            certificate_id: certificate_id.into(),
            outcome: Err(error),
        }
    }
}

/// Stateless verifier; cheap to clone, safe to share across requests.
#[derive(Clone)]
pub struct VerificationEngine {
    certificates: Arc<dyn CertificateDirectory>,
    universities: Arc<dyn UniversityDirectory>,
    audit: Arc<dyn AuditLog>,
    settings: EngineSettings,
}

impl VerificationEngine {
    pub fn new(
        certificates: Arc<dyn CertificateDirectory>,
        universities: Arc<dyn UniversityDirectory>,
        audit: Arc<dyn AuditLog>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            certificates,
            universities,
            audit,
            settings,
        }
    }

    // ── Single verification ──────────────────────────────────────────────────

    /// Verify by `certificateId` XOR `verificationCode`.
    pub async fn verify(
        &self,
        request: &VerifyRequest,
        verifier_ip: Option<String>,
    ) -> Result<VerificationResult, VerifyError> {
        let lookup = request.lookup("").map_err(VerifyError::Validation)?;
        let method = match lookup {
            Lookup::Id(_) => VerificationMethod::Id,
            Lookup::Code(_) => VerificationMethod::Code,
        };
        self.verify_lookup(lookup, method, verifier_ip).await
    }

    pub async fn verify_by_id(
        &self,
        certificate_id: &str,
        verifier_ip: Option<String>,
    ) -> Result<VerificationResult, VerifyError> {
        validate_certificate_id(certificate_id)
            .map_err(|msg| VerifyError::invalid("certificateId", msg))?;
        self.verify_lookup(
            Lookup::Id(certificate_id.to_string()),
            VerificationMethod::Id,
            verifier_ip,
        )
        .await
    }

    /// Resolves the code, then continues through the same stages as
    /// [`Self::verify_by_id`] with the resolved certificate.
    pub async fn verify_by_code(
        &self,
        verification_code: &str,
        verifier_ip: Option<String>,
    ) -> Result<VerificationResult, VerifyError> {
        validate_verification_code(verification_code)
            .map_err(|msg| VerifyError::invalid("verificationCode", msg))?;
        self.verify_lookup(
            Lookup::Code(verification_code.to_string()),
            VerificationMethod::Code,
            verifier_ip,
        )
        .await
    }

    async fn verify_lookup(
        &self,
        lookup: Lookup,
        method: VerificationMethod,
        verifier_ip: Option<String>,
    ) -> Result<VerificationResult, VerifyError> {
        let started = Instant::now();
        let attempt = self.run_pipeline(&lookup, method).await;
        self.finish(attempt, method, verifier_ip, started)
    }

    async fn run_pipeline(&self, lookup: &Lookup, method: VerificationMethod) -> Attempt {
        // LOOKUP
        let (fetched, audit_key) = match lookup {
            Lookup::Id(id) => (
                self.bounded(self.certificates.get_by_id(id)).await,
                id.as_str(),
            ),
            Lookup::Code(code) => (
                self.bounded(self.certificates.get_by_code(code)).await,
                UNKNOWN_CERTIFICATE,
            ),
        };
        let certificate = match fetched {
            Ok(certificate) => certificate,
            Err(DirectoryError::NotFound) => {
                return Attempt::verdict(
                    audit_key,
                    VerificationResult::invalid(method, CERTIFICATE_NOT_FOUND),
                );
            }
            Err(e) => return Attempt::failed(audit_key, e),
        };

        self.check_resolved(certificate, method).await
    }

    /// STATUS_CHECK → UNIVERSITY_LOOKUP → SIGNATURE_CHECK for a resolved certificate.
    async fn check_resolved(&self, certificate: Certificate, method: VerificationMethod) -> Attempt {
        let id = certificate.id.clone();

        if let Some(reason) = certificate.status_rejection() {
            return Attempt::verdict(
                id,
                VerificationResult::invalid(method, reason).with_certificate(&certificate),
            );
        }

        let university = match self
            .bounded(self.universities.get_by_id(&certificate.university_id))
            .await
        {
            Ok(university) => university,
            Err(DirectoryError::NotFound) => {
                warn!(
                    certificate_id = %id,
                    university_id = %certificate.university_id,
                    "certificate references unknown university"
                );
                return Attempt::verdict(
                    id,
                    VerificationResult::invalid(method, UNIVERSITY_NOT_FOUND)
                        .with_certificate(&certificate),
                );
            }
            Err(e) => return Attempt::failed(id, e),
        };
        let summary = UniversitySummary::from(&university);

        let signature_ok = crypto::verify_signature(
            certificate.certificate_hash.as_bytes(),
            &certificate.digital_signature,
            &university.public_key,
        );
        if !signature_ok {
            return Attempt::verdict(
                id,
                VerificationResult::invalid(method, SIGNATURE_FAILED)
                    .with_certificate(&certificate)
                    .with_university(Some(summary)),
            );
        }

        Attempt::verdict(
            id,
            VerificationResult::valid(method, Some(summary)).with_certificate(&certificate),
        )
    }

    // ── Direct signature ─────────────────────────────────────────────────────

    /// UNIVERSITY_LOOKUP + SIGNATURE_CHECK over a caller-supplied hash and signature.
    pub async fn verify_signature_direct(
        &self,
        request: &SignatureVerifyRequest,
        verifier_ip: Option<String>,
    ) -> Result<VerificationResult, VerifyError> {
        request.validate().map_err(VerifyError::Validation)?;
        let method = VerificationMethod::Signature;
        let started = Instant::now();

        let attempt = match self
            .bounded(self.universities.get_public_key(&request.university_id))
            .await
        {
            Ok(public_key) => {
                let university = self.university_summary(&request.university_id).await;
                let verified = crypto::verify_signature(
                    request.certificate_hash.as_bytes(),
                    &request.digital_signature,
                    &public_key,
                );
                let result = if verified {
                    VerificationResult::valid(method, university)
                } else {
                    VerificationResult::invalid(method, SIGNATURE_FAILED).with_university(university)
                };
                Attempt::verdict(UNKNOWN_CERTIFICATE, result)
            }
            Err(DirectoryError::NotFound) => Attempt::verdict(
                UNKNOWN_CERTIFICATE,
                VerificationResult::invalid(method, UNIVERSITY_NOT_FOUND),
            ),
            Err(e) => Attempt::failed(UNKNOWN_CERTIFICATE, e),
        };

        self.finish(attempt, method, verifier_ip, started)
    }

    /// Display details for a university whose key already resolved.
    /// Missing details do not change the verdict.
    async fn university_summary(&self, university_id: &str) -> Option<UniversitySummary> {
        match self.bounded(self.universities.get_by_id(university_id)).await {
            Ok(university) => Some((&university).into()),
            Err(e) => {
                warn!(%university_id, error = %e, "university details unavailable");
                None
            }
        }
    }

    // ── Bulk ─────────────────────────────────────────────────────────────────

    /// Verify a batch. The whole batch is rejected before any item runs if it
    /// is empty, over `max_bulk`, or contains a malformed item. Items then run
    /// concurrently and independently; results come back in input order.
    pub async fn verify_bulk(
        &self,
        request: BulkVerifyRequest,
        verifier_ip: Option<String>,
    ) -> Result<BulkVerificationResponse, VerifyError> {
        let items = request.certificates;
        if items.is_empty() {
            return Err(VerifyError::invalid(
                "certificates",
                "must contain at least 1 item",
            ));
        }
        if items.len() > self.settings.max_bulk {
            return Err(VerifyError::invalid(
                "certificates",
                format!(
                    "must contain at most {} items, got {}",
                    self.settings.max_bulk,
                    items.len()
                ),
            ));
        }

        let mut lookups = Vec::with_capacity(items.len());
        let mut errors: Vec<FieldError> = Vec::new();
        for (i, item) in items.iter().enumerate() {
            match item.lookup(&format!("certificates[{i}].")) {
                Ok(lookup) => lookups.push(lookup),
                Err(mut item_errors) => errors.append(&mut item_errors),
            }
        }
        if !errors.is_empty() {
            return Err(VerifyError::Validation(errors));
        }

        let permits = Arc::new(Semaphore::new(self.settings.bulk_concurrency.max(1)));
        let handles: Vec<_> = lookups
            .into_iter()
            .map(|lookup| {
                let engine = self.clone();
                let permits = Arc::clone(&permits);
                let verifier_ip = verifier_ip.clone();
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await.ok();
                    engine
                        .verify_lookup(lookup, VerificationMethod::Bulk, verifier_ip)
                        .await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (index, (handle, item)) in handles.into_iter().zip(items).enumerate() {
            let (result, system_error) = match handle.await {
                Ok(Ok(result)) => (result, false),
                Ok(Err(e)) => {
                    warn!(index, error = %e, "bulk item could not be verified");
                    (unavailable(), true)
                }
                Err(e) => {
                    error!(index, error = %e, "bulk item task failed");
                    (unavailable(), true)
                }
            };
            results.push(BulkItemResult {
                certificate_id: item.certificate_id,
                verification_code: item.verification_code,
                result,
                system_error,
            });
        }

        let response = BulkVerificationResponse::from_results(results);
        info!(
            total = response.total_requested,
            valid = response.valid_certificates,
            "bulk verification completed"
        );
        Ok(response)
    }

    // ── Integrity ────────────────────────────────────────────────────────────

    /// Recompute the content hash of a caller-supplied record.
    pub fn check_record_integrity(
        &self,
        record: &Value,
        expected_hash: &str,
    ) -> Result<IntegrityResponse, VerifyError> {
        let computed_hash = crypto::compute_hash(record)
            .map_err(|e| VerifyError::Internal(anyhow::anyhow!(e)))?;
        Ok(IntegrityResponse {
            hash_matches: crypto::digests_equal(&computed_hash, expected_hash),
            computed_hash,
        })
    }

    /// Recompute a stored certificate's content hash from its current fields
    /// and compare it with the hash fixed at issuance.
    pub async fn check_stored_integrity(
        &self,
        certificate_id: &str,
    ) -> Result<Option<IntegrityResponse>, VerifyError> {
        validate_certificate_id(certificate_id)
            .map_err(|msg| VerifyError::invalid("certificateId", msg))?;
        let certificate = match self.bounded(self.certificates.get_by_id(certificate_id)).await {
            Ok(certificate) => certificate,
            Err(DirectoryError::NotFound) => return Ok(None),
            Err(e) => return Err(VerifyError::DirectoryUnavailable(e.to_string())),
        };

        let response =
            self.check_record_integrity(&certificate.canonical_record(), &certificate.certificate_hash)?;
        if !response.hash_matches {
            warn!(%certificate_id, "stored certificate no longer matches its content hash");
        }
        Ok(Some(response))
    }

    // ── Audit queries ────────────────────────────────────────────────────────

    pub async fn statistics(&self, days: i64) -> Result<Vec<DailyStatistics>, VerifyError> {
        Ok(self.audit.statistics(days.clamp(1, MAX_STATISTICS_DAYS)).await?)
    }

    pub async fn history(
        &self,
        certificate_id: &str,
        limit: i64,
    ) -> Result<Vec<VerificationLogEntry>, VerifyError> {
        validate_certificate_id(certificate_id)
            .map_err(|msg| VerifyError::invalid("certificateId", msg))?;
        Ok(self
            .audit
            .history(certificate_id, limit.clamp(1, MAX_HISTORY_LIMIT))
            .await?)
    }

    pub async fn purge(&self, older_than_days: u32) -> Result<u64, VerifyError> {
        if !(1..=MAX_RETENTION_DAYS).contains(&older_than_days) {
            return Err(VerifyError::invalid(
                "olderThanDays",
                format!("must be between 1 and {MAX_RETENTION_DAYS}"),
            ));
        }
        let deleted = self.audit.purge(i64::from(older_than_days)).await?;
        info!(deleted, older_than_days, "purged verification log");
        Ok(deleted)
    }

    pub async fn audit_reachable(&self) -> bool {
        self.audit.ping().await.is_ok()
    }

    // ── Internals ────────────────────────────────────────────────────────────

    /// Apply the lookup timeout; an elapsed timer is a transport failure.
    async fn bounded<T>(
        &self,
        lookup: impl Future<Output = Result<T, DirectoryError>>,
    ) -> Result<T, DirectoryError> {
        tokio::time::timeout(self.settings.lookup_timeout, lookup)
            .await
            .unwrap_or(Err(DirectoryError::Timeout))
    }

    /// Audit the attempt and turn it into the caller-facing result.
    fn finish(
        &self,
        attempt: Attempt,
        method: VerificationMethod,
        verifier_ip: Option<String>,
        started: Instant,
    ) -> Result<VerificationResult, VerifyError> {
        let latency_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        let Attempt {
            certificate_id,
            outcome,
        } = attempt;

        let (result, error_message) = match &outcome {
            Ok(r) if r.valid => (VerificationOutcome::Valid, None),
            Ok(r) => (VerificationOutcome::Invalid, r.reason.clone()),
            Err(e) => (VerificationOutcome::Error, Some(e.to_string())),
        };

        info!(
            %certificate_id,
            %method,
            result = result.as_str(),
            latency_ms,
            "verification completed"
        );

        self.record(NewLogEntry {
            certificate_id,
            verification_method: method,
            verifier_ip,
            result,
            error_message,
            response_time_ms: latency_ms,
        });

        outcome.map_err(|e| VerifyError::DirectoryUnavailable(e.to_string()))
    }

    /// Fire-and-forget audit write.
    fn record(&self, entry: NewLogEntry) {
        let audit = Arc::clone(&self.audit);
        tokio::spawn(async move {
            let certificate_id = entry.certificate_id.clone();
            if let Err(e) = audit.record(entry).await {
                warn!(%certificate_id, error = %e, "failed to record verification attempt");
            }
        });
    }
}

fn unavailable() -> VerificationResult {
    VerificationResult::invalid(VerificationMethod::Bulk, VERIFICATION_UNAVAILABLE)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
