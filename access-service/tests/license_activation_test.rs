mod common;

use access_service::models::{LicenseStatus, SecurityEventType};
use access_service::services::{LicenseStore, SecurityEventStore};
use axum::http::{Method, StatusCode};
use common::{empty_request, json_request, with_header, TestApp, TEST_ADMIN_API_KEY};
use serde_json::json;

#[tokio::test]
async fn test_first_activation_binds_domain() {
    let app = TestApp::spawn().await;
    app.seed_license("ABC123", 30).await;

    let res = app
        .activate("ABC123", "https://www.ClientA.com/wp-admin", Some("203.0.113.10"))
        .await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["valid"], true);
    assert_eq!(res.body["license"]["status"], "ACTIVE");
    assert_eq!(res.body["license"]["siteUrl"], "clienta.com");
    assert_eq!(res.body["license"]["isAssociated"], true);

    let stored = app.licenses.find_by_key("ABC123").await.unwrap().unwrap();
    assert_eq!(stored.site_url.as_deref(), Some("clienta.com"));
    assert_eq!(stored.status, LicenseStatus::Active);
}

#[tokio::test]
async fn test_repeat_activation_from_bound_domain_succeeds() {
    let app = TestApp::spawn().await;
    app.seed_license("ABC123", 30).await;

    let first = app.activate("ABC123", "clienta.com", None).await;
    assert_eq!(first.status, StatusCode::OK);

    let second = app.activate("ABC123", "http://clienta.com/", None).await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.body["valid"], true);

    let stored = app.licenses.find_by_key("ABC123").await.unwrap().unwrap();
    assert!(stored.last_verified_at.is_some());
}

#[tokio::test]
async fn test_activation_from_other_domain_is_forbidden() {
    let app = TestApp::spawn().await;
    app.seed_license("ABC123", 30).await;

    app.activate("ABC123", "clienta.com", None).await;
    let res = app.activate("ABC123", "clientb.com", None).await;

    assert_eq!(res.status, StatusCode::FORBIDDEN);
    // The winning domain never leaks to the caller
    assert!(!res.body.to_string().contains("clienta.com"));

    let stored = app.licenses.find_by_key("ABC123").await.unwrap().unwrap();
    assert_eq!(stored.site_url.as_deref(), Some("clienta.com"));

    let mismatches = app.audit.records_for("license.activate");
    assert!(mismatches.iter().any(|r| r.outcome == "domain_mismatch"
        && r.details["authorized_domain"] == "clienta.com"));
}

#[tokio::test]
async fn test_expired_license_is_forbidden_and_marked() {
    let app = TestApp::spawn().await;
    app.seed_expired_license("OLD999").await;

    let res = app.activate("OLD999", "clienta.com", None).await;

    assert_eq!(res.status, StatusCode::FORBIDDEN);
    let stored = app.licenses.find_by_key("OLD999").await.unwrap().unwrap();
    assert_eq!(stored.status, LicenseStatus::Expired);
    assert!(stored.site_url.is_none());
}

#[tokio::test]
async fn test_unknown_key_returns_not_found() {
    let app = TestApp::spawn().await;

    let res = app.activate("NOPE00", "clienta.com", Some("198.51.100.7")).await;

    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert!(res.body["error"].is_string());
}

#[tokio::test]
async fn test_invalid_domain_is_rejected() {
    let app = TestApp::spawn().await;
    app.seed_license("ABC123", 30).await;

    let res = app.activate("ABC123", "not a host!", None).await;

    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    let stored = app.licenses.find_by_key("ABC123").await.unwrap().unwrap();
    assert!(stored.site_url.is_none());
}

#[tokio::test]
async fn test_missing_fields_fail_validation() {
    let app = TestApp::spawn().await;

    let res = app
        .send(json_request(
            Method::POST,
            "/license/verify",
            &json!({ "license_key": "", "domain": "clienta.com" }),
            None,
        ))
        .await;

    assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_status_lookup_does_not_bind() {
    let app = TestApp::spawn().await;
    app.seed_license("ABC123", 30).await;

    let res = app
        .send(empty_request(Method::GET, "/license/verify?license_key=ABC123", None))
        .await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["license"]["status"], "INACTIVE");
    assert_eq!(res.body["license"]["isAssociated"], false);

    let stored = app.licenses.find_by_key("ABC123").await.unwrap().unwrap();
    assert!(stored.site_url.is_none());
}

#[tokio::test]
async fn test_status_lookup_reports_expiry_without_writing() {
    let app = TestApp::spawn().await;
    app.seed_expired_license("OLD999").await;

    let res = app
        .send(empty_request(Method::GET, "/license/verify?license_key=OLD999", None))
        .await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["valid"], false);
    assert_eq!(res.body["license"]["status"], "EXPIRED");

    let stored = app.licenses.find_by_key("OLD999").await.unwrap().unwrap();
    assert_eq!(stored.status, LicenseStatus::Inactive);
}

#[tokio::test]
async fn test_status_lookup_unknown_key_counts_as_failed_access() {
    let app = TestApp::spawn().await;

    let res = app
        .send(empty_request(
            Method::GET,
            "/license/verify?license_key=NOPE00",
            Some("198.51.100.9"),
        ))
        .await;

    assert_eq!(res.status, StatusCode::NOT_FOUND);
    let events = app
        .state
        .monitor
        .store()
        .events("198.51.100.9", SecurityEventType::FailedAccess);
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_admin_routes_require_api_key() {
    let app = TestApp::spawn().await;

    let body = json!({
        "client_name": "Acme Corp",
        "start_date": "2026-01-01T00:00:00Z",
        "end_date": "2027-01-01T00:00:00Z"
    });

    let missing = app
        .send(json_request(Method::POST, "/admin/licenses", &body, None))
        .await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);

    let wrong = app
        .send(with_header(
            json_request(Method::POST, "/admin/licenses", &body, None),
            "x-admin-api-key",
            "not-the-key",
        ))
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_create_disassociate_and_rebind() {
    let app = TestApp::spawn().await;

    let created = app
        .send(with_header(
            json_request(
                Method::POST,
                "/admin/licenses",
                &json!({
                    "license_key": "NEWKEY1",
                    "client_name": "Acme Corp",
                    "start_date": "2026-01-01T00:00:00Z",
                    "end_date": "2099-01-01T00:00:00Z"
                }),
                None,
            ),
            "x-admin-api-key",
            TEST_ADMIN_API_KEY,
        ))
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["licenseKey"], "NEWKEY1");
    assert_eq!(created.body["status"], "INACTIVE");

    assert_eq!(app.activate("NEWKEY1", "clienta.com", None).await.status, StatusCode::OK);
    assert_eq!(
        app.activate("NEWKEY1", "clientb.com", None).await.status,
        StatusCode::FORBIDDEN
    );

    let released = app
        .send(with_header(
            empty_request(Method::POST, "/admin/licenses/NEWKEY1/disassociate", None),
            "x-admin-api-key",
            TEST_ADMIN_API_KEY,
        ))
        .await;
    assert_eq!(released.status, StatusCode::OK);
    assert_eq!(released.body["isAssociated"], false);
    assert!(released.body["siteUrl"].is_null());

    let rebound = app.activate("NEWKEY1", "clientb.com", None).await;
    assert_eq!(rebound.status, StatusCode::OK);
    assert_eq!(rebound.body["license"]["siteUrl"], "clientb.com");
}

#[tokio::test]
async fn test_admin_duplicate_key_conflicts() {
    let app = TestApp::spawn().await;
    app.seed_license("ABC123", 30).await;

    let res = app
        .send(with_header(
            json_request(
                Method::POST,
                "/admin/licenses",
                &json!({
                    "license_key": "ABC123",
                    "client_name": "Someone Else",
                    "start_date": "2026-01-01T00:00:00Z",
                    "end_date": "2099-01-01T00:00:00Z"
                }),
                None,
            ),
            "x-admin-api-key",
            TEST_ADMIN_API_KEY,
        ))
        .await;

    assert_eq!(res.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_admin_extends_expired_license() {
    let app = TestApp::spawn().await;
    app.seed_expired_license("OLD999").await;
    assert_eq!(
        app.activate("OLD999", "clienta.com", None).await.status,
        StatusCode::FORBIDDEN
    );

    let res = app
        .send(with_header(
            json_request(
                Method::PATCH,
                "/admin/licenses/OLD999/validity",
                &json!({
                    "start_date": "2026-01-01T00:00:00Z",
                    "end_date": "2099-01-01T00:00:00Z"
                }),
                None,
            ),
            "x-admin-api-key",
            TEST_ADMIN_API_KEY,
        ))
        .await;
    assert_eq!(res.status, StatusCode::OK);

    let activated = app.activate("OLD999", "clienta.com", None).await;
    assert_eq!(activated.status, StatusCode::OK);
    assert_eq!(activated.body["license"]["status"], "ACTIVE");
}

fn set_validity(key: &str, start: &str, end: &str) -> axum::http::Request<axum::body::Body> {
    with_header(
        json_request(
            Method::PATCH,
            &format!("/admin/licenses/{}/validity", key),
            &json!({ "start_date": start, "end_date": end }),
            None,
        ),
        "x-admin-api-key",
        TEST_ADMIN_API_KEY,
    )
}

#[tokio::test]
async fn test_renewing_bound_expired_license_reactivates_it() {
    let app = TestApp::spawn().await;
    app.seed_license("RENEW1", 30).await;
    assert_eq!(
        app.activate("RENEW1", "clienta.com", None).await.status,
        StatusCode::OK
    );

    let lapsed = app
        .send(set_validity("RENEW1", "2020-01-01T00:00:00Z", "2021-01-01T00:00:00Z"))
        .await;
    assert_eq!(lapsed.status, StatusCode::OK);

    let refused = app.activate("RENEW1", "clienta.com", None).await;
    assert_eq!(refused.status, StatusCode::FORBIDDEN);
    let stored = app.licenses.find_by_key("RENEW1").await.unwrap().unwrap();
    assert_eq!(stored.status, LicenseStatus::Expired);

    let renewed = app
        .send(set_validity("RENEW1", "2020-01-01T00:00:00Z", "2099-01-01T00:00:00Z"))
        .await;
    assert_eq!(renewed.status, StatusCode::OK);
    let stored = app.licenses.find_by_key("RENEW1").await.unwrap().unwrap();
    assert_eq!(stored.status, LicenseStatus::Active);
    assert_eq!(stored.site_url.as_deref(), Some("clienta.com"));

    let activated = app.activate("RENEW1", "clienta.com", None).await;
    assert_eq!(activated.status, StatusCode::OK);
    assert_eq!(activated.body["valid"], true);
    assert_eq!(activated.body["license"]["status"], "ACTIVE");
    assert_eq!(activated.body["license"]["valid"], true);

    let checked = app
        .send(empty_request(Method::GET, "/license/verify?license_key=RENEW1", None))
        .await;
    assert_eq!(checked.status, StatusCode::OK);
    assert_eq!(checked.body["valid"], true);
}

#[tokio::test]
async fn test_admin_unknown_license_is_not_found() {
    let app = TestApp::spawn().await;

    let res = app
        .send(with_header(
            empty_request(Method::POST, "/admin/licenses/MISSING/disassociate", None),
            "x-admin-api-key",
            TEST_ADMIN_API_KEY,
        ))
        .await;

    assert_eq!(res.status, StatusCode::NOT_FOUND);
}
