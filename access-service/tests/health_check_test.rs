mod common;

use axum::http::{Method, StatusCode};
use common::{empty_request, TestApp};

#[tokio::test]
async fn test_health_check_without_database() {
    let app = TestApp::spawn().await;

    let res = app.send(empty_request(Method::GET, "/health", None)).await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["status"], "healthy");
    assert_eq!(res.body["checks"]["postgresql"], "not_configured");
}

#[tokio::test]
async fn test_responses_carry_security_headers_and_request_id() {
    let app = TestApp::spawn().await;

    let res = app.send(empty_request(Method::GET, "/health", None)).await;

    assert_eq!(res.header("x-content-type-options"), Some("nosniff"));
    assert_eq!(res.header("x-frame-options"), Some("DENY"));
    assert!(res.header("x-request-id").is_some());
}

#[tokio::test]
async fn test_openapi_document_lists_license_routes() {
    let app = TestApp::spawn().await;

    let res = app
        .send(empty_request(Method::GET, "/.well-known/openapi.json", None))
        .await;

    assert_eq!(res.status, StatusCode::OK);
    assert!(res.body["paths"]["/license/verify"].is_object());
    assert!(res.body["paths"]["/auth/2fa/setup"].is_object());
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_activation_counter() {
    let app = TestApp::spawn().await;
    app.seed_license("METRIC1", 30).await;
    app.activate("METRIC1", "metrics.example", None).await;

    let res = app.send(empty_request(Method::GET, "/metrics", None)).await;

    assert_eq!(res.status, StatusCode::OK);
    let body = res.body.as_str().unwrap_or_default();
    assert!(body.contains("license_activations_total"));
}
