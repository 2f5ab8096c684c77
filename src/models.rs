//! Domain models for the Certificate Verifier.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::FieldError;

/// Sentinel certificate id for log entries whose certificate never resolved.
pub const UNKNOWN_CERTIFICATE: &str = "unknown";

const MAX_ID_LEN: usize = 128;

// ── Certificates ──────────────────────────────────────────────────────────────

/// Lifecycle status of an issued certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    Active,
    Revoked,
    Suspended,
    /// Anything the certificate registry reports that we do not recognise.
    #[serde(other)]
    Unknown,
}

/// A certificate as held by the certificate registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: String,
    pub certificate_number: String,
    pub student_id: String,
    pub university_id: String,
    pub student_name: String,
    pub course_name: String,
    #[serde(default)]
    pub specialization: Option<String>,
    pub grade: String,
    #[serde(default)]
    pub cgpa: Option<f64>,
    /// ISO-8601 date, kept verbatim so the content hash stays reproducible.
    pub issue_date: String,
    #[serde(default)]
    pub completion_date: Option<String>,
    /// Hex SHA-256 of [`Certificate::canonical_record`], fixed at issuance.
    pub certificate_hash: String,
    /// Base64 RSA signature over `certificate_hash`.
    pub digital_signature: String,
    #[serde(default)]
    pub timestamp_token: Option<String>,
    pub verification_code: String,
    #[serde(default)]
    pub pdf_path: Option<String>,
    pub status: CertificateStatus,
    #[serde(default)]
    pub revocation_reason: Option<String>,
}

impl Certificate {
    /// The attested fields covered by `certificate_hash`.
    pub fn canonical_record(&self) -> Value {
        json!({
            "certificateNumber": self.certificate_number,
            "studentId": self.student_id,
            "studentName": self.student_name,
            "universityId": self.university_id,
            "courseName": self.course_name,
            "specialization": self.specialization,
            "grade": self.grade,
            "cgpa": self.cgpa,
            "issueDate": self.issue_date,
            "completionDate": self.completion_date,
        })
    }

    /// Why this certificate's status disqualifies it, or `None` when active.
    pub fn status_rejection(&self) -> Option<String> {
        match self.status {
            CertificateStatus::Active => None,
            CertificateStatus::Revoked => Some(format!(
                "certificate has been revoked: {}",
                self.revocation_reason
                    .as_deref()
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or("reason not specified")
            )),
            CertificateStatus::Suspended => Some("certificate is currently suspended".into()),
            CertificateStatus::Unknown => Some("certificate is not in active status".into()),
        }
    }
}

/// Public view of a certificate returned to verifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSnapshot {
    pub id: String,
    pub certificate_number: String,
    pub student_name: String,
    pub course_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialization: Option<String>,
    pub grade: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cgpa: Option<f64>,
    pub issue_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<String>,
    pub university_id: String,
    pub verification_code: String,
    pub certificate_hash: String,
    pub status: CertificateStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<String>,
}

impl From<&Certificate> for CertificateSnapshot {
    fn from(c: &Certificate) -> Self {
        Self {
            id: c.id.clone(),
            certificate_number: c.certificate_number.clone(),
            student_name: c.student_name.clone(),
            course_name: c.course_name.clone(),
            specialization: c.specialization.clone(),
            grade: c.grade.clone(),
            cgpa: c.cgpa,
            issue_date: c.issue_date.clone(),
            completion_date: c.completion_date.clone(),
            university_id: c.university_id.clone(),
            verification_code: c.verification_code.clone(),
            certificate_hash: c.certificate_hash.clone(),
            status: c.status,
            revocation_reason: c.revocation_reason.clone(),
        }
    }
}

// ── Universities ──────────────────────────────────────────────────────────────

/// A registered issuing university.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct University {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// PEM-encoded RSA public key
    pub public_key: String,
    /// Whether the platform has vetted this institution
    #[serde(default)]
    pub verified: bool,
}

/// Public view of a university returned to verifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniversitySummary {
    pub id: String,
    pub name: String,
    pub verified: bool,
}

impl From<&University> for UniversitySummary {
    fn from(u: &University) -> Self {
        Self {
            id: u.id.clone(),
            name: u.name.clone(),
            verified: u.verified,
        }
    }
}

// ── Verification ──────────────────────────────────────────────────────────────

/// How a verification was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMethod {
    Id,
    Code,
    Signature,
    Bulk,
}

impl VerificationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Code => "code",
            Self::Signature => "signature",
            Self::Bulk => "bulk",
        }
    }
}

impl fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(Self::Id),
            "code" => Ok(Self::Code),
            "signature" => Ok(Self::Signature),
            "bulk" => Ok(Self::Bulk),
            other => Err(format!("unknown verification method '{other}'")),
        }
    }
}

/// Audit classification of a verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationOutcome {
    Valid,
    Invalid,
    /// The system could not reach a verdict (directory unreachable, timeout).
    Error,
}

impl VerificationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Error => "error",
        }
    }
}

impl FromStr for VerificationOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valid" => Ok(Self::Valid),
            "invalid" => Ok(Self::Invalid),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown verification result '{other}'")),
        }
    }
}

/// The verdict of one verification request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub university: Option<UniversitySummary>,
    pub verification_method: VerificationMethod,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VerificationResult {
    pub fn valid(method: VerificationMethod, university: Option<UniversitySummary>) -> Self {
        Self {
            valid: true,
            certificate: None,
            university,
            verification_method: method,
            timestamp: Utc::now(),
            reason: None,
        }
    }

    pub fn invalid(method: VerificationMethod, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            certificate: None,
            university: None,
            verification_method: method,
            timestamp: Utc::now(),
            reason: Some(reason.into()),
        }
    }

    pub fn with_certificate(mut self, certificate: &Certificate) -> Self {
        self.certificate = Some(certificate.into());
        self
    }

    pub fn with_university(mut self, university: Option<UniversitySummary>) -> Self {
        self.university = university;
        self
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// How a single certificate is to be looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Id(String),
    Code(String),
}

/// Request body for `POST /api/verify` and each bulk item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_code: Option<String>,
}

impl VerifyRequest {
    /// Resolve the request into exactly one lookup key.
    ///
    /// `prefix` is prepended to reported field paths (e.g. `certificates[3].`).
    pub fn lookup(&self, prefix: &str) -> Result<Lookup, Vec<FieldError>> {
        match (self.certificate_id.as_deref(), self.verification_code.as_deref()) {
            (Some(id), None) => validate_certificate_id(id)
                .map(|()| Lookup::Id(id.to_string()))
                .map_err(|msg| vec![FieldError::new(format!("{prefix}certificateId"), msg)]),
            (None, Some(code)) => validate_verification_code(code)
                .map(|()| Lookup::Code(code.to_string()))
                .map_err(|msg| vec![FieldError::new(format!("{prefix}verificationCode"), msg)]),
            (Some(_), Some(_)) => Err(vec![FieldError::new(
                item_field(prefix),
                "provide either certificateId or verificationCode, not both",
            )]),
            (None, None) => Err(vec![FieldError::new(
                item_field(prefix),
                "either certificateId or verificationCode is required",
            )]),
        }
    }
}

/// Field path for errors about the request as a whole: the bulk item
/// (`certificates[3]`) or, at top level, the body.
fn item_field(prefix: &str) -> &str {
    match prefix.trim_end_matches('.') {
        "" => "body",
        item => item,
    }
}

/// Request body for `POST /api/verify/bulk`.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkVerifyRequest {
    #[serde(default)]
    pub certificates: Vec<VerifyRequest>,
}

/// Request body for `POST /api/verify/signature`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureVerifyRequest {
    pub certificate_hash: String,
    pub digital_signature: String,
    pub university_id: String,
}

impl SignatureVerifyRequest {
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if !hex_hash_pattern().is_match(&self.certificate_hash) {
            errors.push(FieldError::new(
                "certificateHash",
                "must be a 64-character hex SHA-256 digest",
            ));
        }
        let signature = self.digital_signature.trim();
        if signature.is_empty() || !base64_pattern().is_match(signature) {
            errors.push(FieldError::new("digitalSignature", "must be base64 encoded"));
        }
        if let Err(msg) = validate_certificate_id(&self.university_id) {
            errors.push(FieldError::new("universityId", msg));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Request body for `POST /api/verify/integrity`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityRequest {
    pub record: Value,
    pub certificate_hash: String,
}

/// Response for the `/api/verify/integrity` endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityResponse {
    pub hash_matches: bool,
    pub computed_hash: String,
}

/// Request body for `POST /api/verify/logs/purge`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeRequest {
    #[serde(default)]
    pub older_than_days: Option<u32>,
}

/// Query string for `GET /api/verify/statistics`.
#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    pub days: Option<i64>,
}

/// Query string for `GET /api/verify/history/:certificate_id`.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

// ── Bulk output ───────────────────────────────────────────────────────────────

/// One bulk item's verdict, echoing the key it was requested by.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_code: Option<String>,
    #[serde(flatten)]
    pub result: VerificationResult,
    /// `true` when no verdict could be reached for this item.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub system_error: bool,
}

/// Response for `POST /api/verify/bulk`; `results` is in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkVerificationResponse {
    pub total_requested: usize,
    pub valid_certificates: usize,
    pub invalid_certificates: usize,
    pub results: Vec<BulkItemResult>,
}

impl BulkVerificationResponse {
    pub fn from_results(results: Vec<BulkItemResult>) -> Self {
        let total_requested = results.len();
        let valid_certificates = results.iter().filter(|r| r.result.valid).count();
        Self {
            total_requested,
            valid_certificates,
            invalid_certificates: total_requested - valid_certificates,
            results,
        }
    }
}

// ── Audit log ─────────────────────────────────────────────────────────────────

/// A verification attempt about to be appended to the audit log.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub certificate_id: String,
    pub verification_method: VerificationMethod,
    pub verifier_ip: Option<String>,
    pub result: VerificationOutcome,
    pub error_message: Option<String>,
    pub response_time_ms: i64,
}

/// A persisted verification attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationLogEntry {
    pub id: Uuid,
    pub certificate_id: String,
    pub verification_method: VerificationMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_ip: Option<String>,
    pub result: VerificationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub response_time_ms: i64,
    pub timestamp: DateTime<Utc>,
}

impl VerificationLogEntry {
    pub fn from_new(entry: NewLogEntry, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            certificate_id: entry.certificate_id,
            verification_method: entry.verification_method,
            verifier_ip: entry.verifier_ip,
            result: entry.result,
            error_message: entry.error_message,
            response_time_ms: entry.response_time_ms,
            timestamp,
        }
    }
}

/// Aggregate verification counts for one calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailyStatistics {
    pub date: NaiveDate,
    pub total_verifications: i64,
    pub valid_count: i64,
    pub invalid_count: i64,
    pub error_count: i64,
    pub avg_response_time_ms: Option<f64>,
}

/// Response for `GET /api/verify/statistics`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsResponse {
    pub period_days: i64,
    pub statistics: Vec<DailyStatistics>,
}

/// Response for `GET /api/verify/history/:certificate_id`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub certificate_id: String,
    pub total_records: usize,
    pub history: Vec<VerificationLogEntry>,
}

// ── Field validation ──────────────────────────────────────────────────────────

fn verification_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z0-9]{6,8}$").expect("static pattern"))
}

fn hex_hash_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9a-fA-F]{64}$").expect("static pattern"))
}

fn base64_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:[A-Za-z0-9+/]{4})*(?:[A-Za-z0-9+/]{2}==|[A-Za-z0-9+/]{3}=)?$")
            .expect("static pattern")
    })
}

/// Opaque identifiers: non-empty, bounded, no whitespace.
pub fn validate_certificate_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("must not be empty".into());
    }
    if id.len() > MAX_ID_LEN {
        return Err(format!("must be at most {MAX_ID_LEN} characters"));
    }
    if id.chars().any(char::is_whitespace) {
        return Err("must not contain whitespace".into());
    }
    Ok(())
}

pub fn validate_verification_code(code: &str) -> Result<(), String> {
    if verification_code_pattern().is_match(code) {
        Ok(())
    } else {
        Err("must be 6-8 uppercase letters or digits".into())
    }
}
