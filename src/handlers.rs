//! Axum route handlers for the Certificate Verifier.
//!
//! Handlers extract and validate transport-level input, call the
//! [`VerificationEngine`](crate::engine::VerificationEngine), and serialize the
//! result. Verdicts are `200` whether valid or not.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};

use crate::{
    db::AppState,
    error::VerifyError,
    models::{
        BulkVerificationResponse, BulkVerifyRequest, HistoryQuery, HistoryResponse,
        IntegrityRequest, IntegrityResponse, PurgeRequest, SignatureVerifyRequest,
        StatisticsQuery, StatisticsResponse, VerificationResult, VerifyRequest,
    },
};

const DEFAULT_STATISTICS_DAYS: i64 = 30;
const DEFAULT_HISTORY_LIMIT: i64 = 10;

/// First `X-Forwarded-For` hop, else the socket peer.
pub fn verifier_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

fn client_ip(headers: &HeaderMap, peer: Option<ConnectInfo<SocketAddr>>) -> Option<String> {
    verifier_ip(headers, peer.map(|ConnectInfo(addr)| addr))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, VerifyError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| VerifyError::invalid("body", rejection.body_text()))
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, VerifyError> {
    params
        .map(|Query(value)| value)
        .map_err(|rejection| VerifyError::invalid("query", rejection.body_text()))
}

// ── Health ────────────────────────────────────────────────────────────────────

/// `GET /health` — Liveness plus audit store reachability.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let audit_up = state.engine.audit_reachable().await;
    Json(json!({
        "status": if audit_up { "healthy" } else { "degraded" },
        "service": "certificate-verifier",
        "version": env!("CARGO_PKG_VERSION"),
        "auditStore": if audit_up { "up" } else { "down" },
    }))
}

/// `GET /health/live`
pub async fn live() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /health/ready` — 503 until the audit store answers.
pub async fn ready(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    if state.engine.audit_reachable().await {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not ready", "auditStore": "down" })),
        )
    }
}

// ── Verify ────────────────────────────────────────────────────────────────────

/// `POST /api/verify` — Body: `{ "certificateId": "..." }` or `{ "verificationCode": "..." }`.
pub async fn verify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerificationResult>, VerifyError> {
    let request = body(payload)?;
    let result = state
        .engine
        .verify(&request, client_ip(&headers, peer))
        .await?;
    Ok(Json(result))
}

/// `GET /api/verify/:certificate_id`
pub async fn verify_by_id(
    State(state): State<Arc<AppState>>,
    Path(certificate_id): Path<String>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Result<Json<VerificationResult>, VerifyError> {
    let result = state
        .engine
        .verify_by_id(&certificate_id, client_ip(&headers, peer))
        .await?;
    Ok(Json(result))
}

/// `GET /api/verify/code/:verification_code`
pub async fn verify_by_code(
    State(state): State<Arc<AppState>>,
    Path(verification_code): Path<String>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Result<Json<VerificationResult>, VerifyError> {
    let result = state
        .engine
        .verify_by_code(&verification_code, client_ip(&headers, peer))
        .await?;
    Ok(Json(result))
}

/// `POST /api/verify/bulk` — Body: `{ "certificates": [{...}, ...] }`.
pub async fn verify_bulk(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    payload: Result<Json<BulkVerifyRequest>, JsonRejection>,
) -> Result<Json<BulkVerificationResponse>, VerifyError> {
    let request = body(payload)?;
    let response = state
        .engine
        .verify_bulk(request, client_ip(&headers, peer))
        .await?;
    Ok(Json(response))
}

/// `POST /api/verify/signature`
///
/// Body: `{ "certificateHash": "<64 hex>", "digitalSignature": "<base64>", "universityId": "..." }`
pub async fn verify_signature(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    payload: Result<Json<SignatureVerifyRequest>, JsonRejection>,
) -> Result<Json<VerificationResult>, VerifyError> {
    let request = body(payload)?;
    let result = state
        .engine
        .verify_signature_direct(&request, client_ip(&headers, peer))
        .await?;
    Ok(Json(result))
}

// ── Integrity ─────────────────────────────────────────────────────────────────

/// `POST /api/verify/integrity` — Body: `{ "record": {...}, "certificateHash": "..." }`.
pub async fn check_integrity(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IntegrityRequest>, JsonRejection>,
) -> Result<Json<IntegrityResponse>, VerifyError> {
    let request = body(payload)?;
    let response = state
        .engine
        .check_record_integrity(&request.record, &request.certificate_hash)?;
    Ok(Json(response))
}

/// `GET /api/verify/integrity/:certificate_id`
pub async fn check_stored_integrity(
    State(state): State<Arc<AppState>>,
    Path(certificate_id): Path<String>,
) -> Result<Json<IntegrityResponse>, VerifyError> {
    state
        .engine
        .check_stored_integrity(&certificate_id)
        .await?
        .map(Json)
        .ok_or_else(|| VerifyError::NotFound(format!("certificate {certificate_id}")))
}

// ── Audit log ─────────────────────────────────────────────────────────────────

/// `GET /api/verify/statistics?days=N`
pub async fn statistics(
    State(state): State<Arc<AppState>>,
    params: Result<Query<StatisticsQuery>, QueryRejection>,
) -> Result<Json<StatisticsResponse>, VerifyError> {
    let period_days = query(params)?
        .days
        .unwrap_or(DEFAULT_STATISTICS_DAYS)
        .clamp(1, crate::engine::MAX_STATISTICS_DAYS);
    let statistics = state.engine.statistics(period_days).await?;
    Ok(Json(StatisticsResponse {
        period_days,
        statistics,
    }))
}

/// `GET /api/verify/history/:certificate_id?limit=N`
pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(certificate_id): Path<String>,
    params: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<HistoryResponse>, VerifyError> {
    let limit = query(params)?.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let history = state
        .engine
        .history(&certificate_id, limit)
        .await?;
    Ok(Json(HistoryResponse {
        certificate_id,
        total_records: history.len(),
        history,
    }))
}

/// `POST /api/verify/logs/purge` — Body (optional): `{ "olderThanDays": N }`.
pub async fn purge_logs(
    State(state): State<Arc<AppState>>,
    raw: Bytes,
) -> Result<Json<Value>, VerifyError> {
    let request: PurgeRequest = if raw.iter().all(u8::is_ascii_whitespace) {
        PurgeRequest::default()
    } else {
        serde_json::from_slice(&raw).map_err(|e| VerifyError::invalid("body", e.to_string()))?
    };
    let older_than_days = request.older_than_days.unwrap_or(state.retention_days);
    let deleted = state.engine.purge(older_than_days).await?;
    Ok(Json(json!({ "deleted": deleted, "olderThanDays": older_than_days })))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditLog, MemoryAuditLog};
    use crate::directory::{MemoryCertificateDirectory, MemoryUniversityDirectory};
    use crate::engine::{EngineSettings, VerificationEngine};
    use crate::models::{CertificateStatus, VerificationMethod};
    use crate::testing::{
        certificate, sign, university, wait_for_entries, FailingAuditLog, UnreachableDirectory,
    };
    use axum::http::{HeaderName, HeaderValue};
    use axum_test::TestServer;
    use std::net::{IpAddr, Ipv4Addr};

    fn server_with(audit: Arc<dyn AuditLog>) -> TestServer {
        let mut revoked = certificate("C2", "EF56GH78", "U1");
        revoked.status = CertificateStatus::Revoked;
        revoked.revocation_reason = Some("Academic misconduct".into());

        let engine = VerificationEngine::new(
            Arc::new(MemoryCertificateDirectory::new([
                certificate("C1", "AB12CD34", "U1"),
                revoked,
            ])),
            Arc::new(MemoryUniversityDirectory::new([university("U1")])),
            audit,
            EngineSettings {
                max_bulk: 5,
                ..EngineSettings::default()
            },
        );
        TestServer::new(crate::app(Arc::new(AppState::new(engine, 90)))).unwrap()
    }

    fn server() -> (TestServer, Arc<MemoryAuditLog>) {
        let audit = Arc::new(MemoryAuditLog::new());
        (server_with(audit.clone()), audit)
    }

    #[test]
    fn verifier_ip_prefers_forwarded_header() {
        let peer = Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 5000));
        let mut headers = HeaderMap::new();
        assert_eq!(verifier_ip(&headers, peer).as_deref(), Some("10.0.0.1"));
        assert_eq!(verifier_ip(&headers, None), None);

        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.2".parse().unwrap());
        assert_eq!(verifier_ip(&headers, peer).as_deref(), Some("203.0.113.9"));
    }

    #[tokio::test]
    async fn health_reports_audit_store() {
        let (server, _) = server();
        let resp = server.get("/health").await;
        assert_eq!(resp.status_code(), StatusCode::OK);
        let body: Value = resp.json();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "certificate-verifier");

        assert_eq!(server.get("/health/live").await.status_code(), StatusCode::OK);
        assert_eq!(server.get("/health/ready").await.status_code(), StatusCode::OK);

        let degraded = server_with(Arc::new(FailingAuditLog));
        let body: Value = degraded.get("/health").await.json();
        assert_eq!(body["status"], "degraded");
        assert_eq!(
            degraded.get("/health/ready").await.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn verify_by_id_returns_verdict() {
        let (server, audit) = server();
        let resp = server
            .get("/api/verify/C1")
            .add_header(
                HeaderName::from_static("x-forwarded-for"),
                HeaderValue::from_static("198.51.100.7"),
            )
            .await;
        assert_eq!(resp.status_code(), StatusCode::OK);
        let body: Value = resp.json();
        assert_eq!(body["valid"], true);
        assert_eq!(body["verificationMethod"], "id");
        assert_eq!(body["certificate"]["verificationCode"], "AB12CD34");
        assert_eq!(body["university"]["name"], "University U1");
        assert!(body.get("reason").is_none());

        let entries = wait_for_entries(&audit, 1).await;
        assert_eq!(entries[0].verifier_ip.as_deref(), Some("198.51.100.7"));
    }

    #[tokio::test]
    async fn invalid_verdicts_are_still_200() {
        let (server, _) = server();

        let body: Value = server.get("/api/verify/C2").await.json();
        assert_eq!(body["valid"], false);
        assert!(body["reason"].as_str().unwrap().contains("Academic misconduct"));

        let resp = server.get("/api/verify/missing").await;
        assert_eq!(resp.status_code(), StatusCode::OK);
        assert_eq!(resp.json::<Value>()["reason"], "certificate not found");
    }

    #[tokio::test]
    async fn verify_by_code_route_and_validation() {
        let (server, _) = server();
        let body: Value = server.get("/api/verify/code/AB12CD34").await.json();
        assert_eq!(body["valid"], true);
        assert_eq!(body["verificationMethod"], "code");

        let resp = server.get("/api/verify/code/bad-code").await;
        assert_eq!(resp.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = resp.json();
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(body["details"][0]["field"], "verificationCode");
    }

    #[tokio::test]
    async fn post_verify_enforces_exactly_one_key() {
        let (server, _) = server();
        let ok: Value = server
            .post("/api/verify")
            .json(&json!({ "verificationCode": "AB12CD34" }))
            .await
            .json();
        assert_eq!(ok["valid"], true);

        let both = server
            .post("/api/verify")
            .json(&json!({ "certificateId": "C1", "verificationCode": "AB12CD34" }))
            .await;
        assert_eq!(both.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(both.json::<Value>()["details"][0]["field"], "body");

        let malformed = server.post("/api/verify").text("{not json").await;
        assert_eq!(malformed.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bulk_round_trip() {
        let (server, _) = server();
        let resp = server
            .post("/api/verify/bulk")
            .json(&json!({ "certificates": [
                { "certificateId": "C1" },
                { "certificateId": "nope" },
                { "verificationCode": "EF56GH78" },
            ]}))
            .await;
        assert_eq!(resp.status_code(), StatusCode::OK);
        let body: Value = resp.json();
        assert_eq!(body["totalRequested"], 3);
        assert_eq!(body["validCertificates"], 1);
        assert_eq!(body["invalidCertificates"], 2);
        assert_eq!(body["results"][0]["certificateId"], "C1");
        assert_eq!(body["results"][1]["reason"], "certificate not found");
        assert_eq!(body["results"][2]["verificationCode"], "EF56GH78");
        assert_eq!(body["results"][2]["verificationMethod"], "bulk");
    }

    #[tokio::test]
    async fn oversized_bulk_is_400() {
        let (server, audit) = server();
        let items: Vec<_> = (0..6).map(|_| json!({ "certificateId": "C1" })).collect();
        let resp = server
            .post("/api/verify/bulk")
            .json(&json!({ "certificates": items }))
            .await;
        assert_eq!(resp.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(resp.json::<Value>()["details"][0]["field"], "certificates");

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(audit.entries().await.is_empty());
    }

    #[tokio::test]
    async fn directory_outage_is_503() {
        let engine = VerificationEngine::new(
            Arc::new(UnreachableDirectory),
            Arc::new(MemoryUniversityDirectory::new([university("U1")])),
            Arc::new(MemoryAuditLog::new()),
            EngineSettings::default(),
        );
        let server = TestServer::new(crate::app(Arc::new(AppState::new(engine, 90)))).unwrap();

        let resp = server.get("/api/verify/C1").await;
        assert_eq!(resp.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.json::<Value>()["code"], "DIRECTORY_UNAVAILABLE");
    }

    #[tokio::test]
    async fn signature_endpoint() {
        let (server, _) = server();
        let hash = "b".repeat(64);
        let body: Value = server
            .post("/api/verify/signature")
            .json(&json!({
                "certificateHash": hash,
                "digitalSignature": sign(hash.as_bytes()),
                "universityId": "U1",
            }))
            .await
            .json();
        assert_eq!(body["valid"], true);
        assert_eq!(body["verificationMethod"], "signature");

        let resp = server
            .post("/api/verify/signature")
            .json(&json!({
                "certificateHash": "short",
                "digitalSignature": "",
                "universityId": "U1",
            }))
            .await;
        assert_eq!(resp.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(resp.json::<Value>()["details"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn integrity_endpoints() {
        let (server, _) = server();
        let cert = certificate("C1", "AB12CD34", "U1");

        let body: Value = server
            .post("/api/verify/integrity")
            .json(&json!({
                "record": cert.canonical_record(),
                "certificateHash": cert.certificate_hash,
            }))
            .await
            .json();
        assert_eq!(body["hashMatches"], true);
        assert_eq!(body["computedHash"], cert.certificate_hash.as_str());

        let body: Value = server.get("/api/verify/integrity/C1").await.json();
        assert_eq!(body["hashMatches"], true);
        assert_eq!(
            server.get("/api/verify/integrity/C9").await.status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn statistics_history_and_purge() {
        let (server, audit) = server();
        server.get("/api/verify/C1").await;
        server.get("/api/verify/C1").await;
        wait_for_entries(&audit, 2).await;

        let body: Value = server.get("/api/verify/statistics?days=9999").await.json();
        assert_eq!(body["periodDays"], 365);
        assert_eq!(body["statistics"][0]["validCount"], 2);

        let body: Value = server.get("/api/verify/history/C1?limit=1").await.json();
        assert_eq!(body["certificateId"], "C1");
        assert_eq!(body["totalRecords"], 1);
        assert_eq!(body["history"][0]["verificationMethod"], VerificationMethod::Id.as_str());

        let body: Value = server.post("/api/verify/logs/purge").await.json();
        assert_eq!(body["deleted"], 0);
        assert_eq!(body["olderThanDays"], 90);

        for bad in ["/api/verify/statistics?days=abc", "/api/verify/history/C1?limit=ten"] {
            let resp = server.get(bad).await;
            assert_eq!(resp.status_code(), StatusCode::BAD_REQUEST);
            let body: Value = resp.json();
            assert_eq!(body["code"], "VALIDATION_ERROR");
            assert_eq!(body["details"][0]["field"], "query");
        }

        for window in [0_u64, 4_000_000_000] {
            let resp = server
                .post("/api/verify/logs/purge")
                .json(&json!({ "olderThanDays": window }))
                .await;
            assert_eq!(resp.status_code(), StatusCode::BAD_REQUEST);
            assert_eq!(resp.json::<Value>()["details"][0]["field"], "olderThanDays");
        }
        assert_eq!(audit.entries().await.len(), 2);
    }
}
