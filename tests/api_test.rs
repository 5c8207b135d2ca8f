//! Router-level tests for request validation.
//!
//! Every case here is decided before the job store or the dispatch queue is
//! consulted, so no infrastructure is required.

mod common;

use axum::http::{Method, StatusCode};
use common::*;

fn submit_uri(query: &str) -> String {
    format!("/api/v1/analysis?{query}")
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn api_health_returns_ok() {
    let response = get(build_offline_app(), "/api/v1/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!({ "status": "ok" }));
}

#[tokio::test]
async fn dependency_health_reports_degraded_without_storage() {
    let response = get(build_offline_app(), "/health").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(response).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["checks"]["database"]["status"], "error");
    assert_eq!(json["checks"]["redis"]["status"], "error");
    assert_eq!(json["checks"]["lab_directory"]["labs"], 2);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let response = get(build_offline_app(), "/api/v1/nothing-here").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_requires_patient_then_lab() {
    let response = post_json(build_offline_app(), &submit_uri("lab_id=QML"), r#"{"image":"aGk="}"#).await;
    assert_eq!(expect_error(response, StatusCode::BAD_REQUEST).await, "missing_patient_id");

    let uri = submit_uri(&format!("patient_id={VALID_PATIENT}"));
    let response = post_json(build_offline_app(), &uri, r#"{"image":"aGk="}"#).await;
    assert_eq!(expect_error(response, StatusCode::BAD_REQUEST).await, "missing_lab_id");
}

#[tokio::test]
async fn submit_rejects_unknown_lab_regardless_of_other_fields() {
    let cases = [
        format!("patient_id={VALID_PATIENT}&lab_id=NOPE"),
        "patient_id=abc&lab_id=NOPE&surprise=1".to_string(),
        format!("patient_id={VALID_PATIENT}&lab_id=NOPE&urgent=true"),
    ];
    for query in cases {
        let response = post_json(build_offline_app(), &submit_uri(&query), "not even json").await;
        assert_eq!(expect_error(response, StatusCode::BAD_REQUEST).await, "invalid_lab_id");
    }
}

#[tokio::test]
async fn submit_rejects_malformed_patient_ids() {
    for patient in ["1234567890", "1234567890a", "123456789012"] {
        let uri = submit_uri(&format!("patient_id={patient}&lab_id={KNOWN_LAB}"));
        let response = post_json(build_offline_app(), &uri, r#"{"image":"aGk="}"#).await;
        assert_eq!(expect_error(response, StatusCode::BAD_REQUEST).await, "invalid_patient_id");
    }
}

#[tokio::test]
async fn submit_rejects_unexpected_query_parameters() {
    let uri = submit_uri(&format!("patient_id={VALID_PATIENT}&lab_id={KNOWN_LAB}&priority=high"));
    let response = post_json(build_offline_app(), &uri, r#"{"image":"aGk="}"#).await;
    assert_eq!(expect_error(response, StatusCode::BAD_REQUEST).await, "unexpected_parameter");
}

#[tokio::test]
async fn submit_rejects_bad_bodies() {
    let uri = submit_uri(&format!("patient_id={VALID_PATIENT}&lab_id={KNOWN_LAB}"));

    let response = send(build_offline_app(), Method::POST, &uri, Some("text/plain"), "image").await;
    assert_eq!(expect_error(response, StatusCode::BAD_REQUEST).await, "invalid_content_type");

    let response = post_json(build_offline_app(), &uri, "{}").await;
    assert_eq!(expect_error(response, StatusCode::BAD_REQUEST).await, "missing_image");

    let response = post_json(build_offline_app(), &uri, r#"{"image":"aGk=","notes":"x"}"#).await;
    assert_eq!(expect_error(response, StatusCode::BAD_REQUEST).await, "invalid_request");

    let response = post_json(build_offline_app(), &uri, r#"{"image":"#).await;
    assert_eq!(expect_error(response, StatusCode::BAD_REQUEST).await, "invalid_request");
}

// ---------------------------------------------------------------------------
// Lookups and updates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_analysis_validates_request_id() {
    let response = get(build_offline_app(), "/api/v1/analysis").await;
    assert_eq!(expect_error(response, StatusCode::BAD_REQUEST).await, "missing_request_id");

    let response = get(build_offline_app(), "/api/v1/analysis?request_id=not-a-uuid").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn put_analysis_validates_request_id() {
    let response = send(build_offline_app(), Method::PUT, "/api/v1/analysis?lab_id=QML", None, "").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(
        build_offline_app(),
        Method::PUT,
        "/api/v1/analysis?request_id=1234&lab_id=QML",
        None,
        "",
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn task_endpoints_reject_malformed_ids() {
    let response = get(build_offline_app(), "/api/v1/todos/ical/not-a-task/status").await;
    assert_eq!(expect_error(response, StatusCode::NOT_FOUND).await, "Task not found");

    let response = get(build_offline_app(), "/api/v1/todos/ical/not-a-task/result").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Result queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lab_results_for_unknown_lab_is_404() {
    let response = get(build_offline_app(), "/api/v1/labs/results/NOPE").await;
    assert_eq!(expect_error(response, StatusCode::NOT_FOUND).await, "invalid_lab_id");
}

#[tokio::test]
async fn lab_results_validate_filters() {
    let cases = [
        ("limit=0", "invalid_limit"),
        ("limit=1001", "invalid_limit"),
        ("offset=-3", "invalid_offset"),
        ("result=flu", "invalid_result"),
        ("start=last-week", "invalid_date"),
        ("start=2024-02-01T00:00:00Z&end=2024-01-01T00:00:00Z", "invalid_date_range"),
        ("patient_id=42", "invalid_patient_id"),
        ("urgent=maybe", "invalid_urgent"),
    ];
    for (query, code) in cases {
        let uri = format!("/api/v1/labs/results/{KNOWN_LAB}?{query}");
        let response = get(build_offline_app(), &uri).await;
        assert_eq!(expect_error(response, StatusCode::BAD_REQUEST).await, code, "query {query}");
    }
}

#[tokio::test]
async fn patient_results_validate_filters() {
    let response = get(build_offline_app(), "/api/v1/patients/results").await;
    assert_eq!(expect_error(response, StatusCode::BAD_REQUEST).await, "invalid_patient_id");

    let uri = format!("/api/v1/patients/results?patient_id={VALID_PATIENT}&status=unknown");
    let response = get(build_offline_app(), &uri).await;
    assert_eq!(expect_error(response, StatusCode::BAD_REQUEST).await, "invalid_result");

    let uri = format!("/api/v1/patients/results?patient_id={VALID_PATIENT}&end=31/12/2024");
    let response = get(build_offline_app(), &uri).await;
    assert_eq!(expect_error(response, StatusCode::BAD_REQUEST).await, "invalid_date");
}

#[tokio::test]
async fn summary_checks_lab_and_dates_first() {
    let response = get(build_offline_app(), "/api/v1/labs/results/NOPE/summary").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let uri = format!("/api/v1/labs/results/{KNOWN_LAB}/summary?start=soon");
    let response = get(build_offline_app(), &uri).await;
    assert_eq!(expect_error(response, StatusCode::BAD_REQUEST).await, "invalid_date");
}
