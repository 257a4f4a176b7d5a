mod common;

use access_service::models::SecurityEventType;
use axum::http::{Method, StatusCode};
use common::{from_peer, json_request, with_header, TestApp, ADMIN_EMAIL, TEST_ADMIN_API_KEY};
use serde_json::json;

#[tokio::test]
async fn test_license_tier_allows_thirty_per_minute() {
    let app = TestApp::spawn().await;
    app.seed_license("ABC123", 30).await;

    for i in 0..30 {
        let res = app.activate("ABC123", "clienta.com", Some("203.0.113.20")).await;
        assert_eq!(res.status, StatusCode::OK, "request {} should pass", i + 1);
        assert_eq!(res.header("x-ratelimit-limit"), Some("30"));
        assert_eq!(
            res.header("x-ratelimit-remaining"),
            Some((29 - i).to_string().as_str())
        );
    }

    let res = app.activate("ABC123", "clienta.com", Some("203.0.113.20")).await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.header("x-ratelimit-remaining"), Some("0"));
    assert!(res.header("x-ratelimit-reset").is_some());

    let retry_after: u64 = res
        .header("retry-after")
        .expect("Retry-After header")
        .parse()
        .unwrap();
    assert!(retry_after >= 1 && retry_after <= 60);
    assert_eq!(res.body["retry_after"], retry_after);
}

#[tokio::test]
async fn test_limits_are_tracked_per_client() {
    let app = TestApp::spawn().await;
    app.seed_license("ABC123", 30).await;

    for _ in 0..30 {
        app.activate("ABC123", "clienta.com", Some("203.0.113.21")).await;
    }
    assert_eq!(
        app.activate("ABC123", "clienta.com", Some("203.0.113.21")).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );

    let other = app.activate("ABC123", "clienta.com", Some("203.0.113.22")).await;
    assert_eq!(other.status, StatusCode::OK);
}

#[tokio::test]
async fn test_first_forwarded_hop_is_the_client() {
    let app = TestApp::spawn().await;
    app.seed_license("ABC123", 30).await;

    for _ in 0..30 {
        app.activate("ABC123", "clienta.com", Some("203.0.113.23, 10.0.0.1")).await;
    }

    let res = app.activate("ABC123", "clienta.com", Some("203.0.113.23")).await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_forwarded_header_from_untrusted_peer_is_ignored() {
    let app = TestApp::spawn().await;
    app.seed_license("ABC123", 30).await;

    let activation = |i: u32| {
        let body = json!({ "license_key": "ABC123", "domain": "clienta.com" });
        let spoofed = format!("198.51.100.{}", i);
        from_peer(
            json_request(Method::POST, "/license/verify", &body, Some(spoofed.as_str())),
            "192.0.2.77:51000",
        )
    };

    for i in 0..30 {
        let res = app.send(activation(i)).await;
        assert_eq!(res.status, StatusCode::OK, "request {} should pass", i + 1);
    }

    let res = app.send(activation(200)).await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.header("x-ratelimit-remaining"), Some("0"));
}

#[tokio::test]
async fn test_login_tier_is_critical() {
    let app = TestApp::spawn().await;
    app.create_admin().await;

    let body = json!({ "email": ADMIN_EMAIL, "password": "wrong password" });
    for _ in 0..5 {
        let res = app
            .send(json_request(Method::POST, "/auth/login", &body, Some("203.0.113.30")))
            .await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }

    let res = app
        .send(json_request(Method::POST, "/auth/login", &body, Some("203.0.113.30")))
        .await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.header("x-ratelimit-limit"), Some("5"));
}

#[tokio::test]
async fn test_admin_rate_limit_runs_before_key_check() {
    let app = TestApp::spawn().await;
    let body = json!({
        "client_name": "Acme Corp",
        "start_date": "2026-01-01T00:00:00Z",
        "end_date": "2027-01-01T00:00:00Z"
    });

    let res = app
        .send(json_request(Method::POST, "/admin/licenses", &body, Some("203.0.113.40")))
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.header("x-ratelimit-limit"), Some("300"));

    let res = app
        .send(with_header(
            json_request(Method::POST, "/admin/licenses", &body, Some("203.0.113.40")),
            "x-admin-api-key",
            TEST_ADMIN_API_KEY,
        ))
        .await;
    assert_eq!(res.status, StatusCode::CREATED);
    assert_eq!(res.header("x-ratelimit-remaining"), Some("298"));
}

#[tokio::test]
async fn test_repeated_rejections_raise_alert() {
    let app = TestApp::spawn().await;
    app.seed_license("ABC123", 30).await;

    for _ in 0..30 {
        app.activate("ABC123", "clienta.com", Some("203.0.113.50")).await;
    }
    for _ in 0..3 {
        let res = app.activate("ABC123", "clienta.com", Some("203.0.113.50")).await;
        assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    }

    // Rejections are reported to the monitor off the request path
    let mut violations = Vec::new();
    for _ in 0..50 {
        violations = app
            .notifier
            .alerts()
            .into_iter()
            .filter(|a| a.event_type == SecurityEventType::RateLimitViolation)
            .collect();
        if !violations.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].identifier, "203.0.113.50");
    assert_eq!(violations[0].event_count, 3);
}
