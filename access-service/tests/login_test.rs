mod common;

use access_service::services::totp;
use axum::http::{header, Method, StatusCode};
use chrono::Utc;
use common::{
    empty_request, json_request, with_bearer, with_header, TestApp, ADMIN_EMAIL, ADMIN_PASSWORD,
};
use serde_json::json;

fn login_body(token: Option<&str>, remember_device: bool) -> serde_json::Value {
    json!({
        "email": ADMIN_EMAIL,
        "password": ADMIN_PASSWORD,
        "token": token,
        "remember_device": remember_device,
    })
}

#[tokio::test]
async fn test_login_without_two_factor_issues_session() {
    let app = TestApp::spawn().await;
    app.create_admin().await;

    let res = app
        .send(json_request(Method::POST, "/auth/login", &login_body(None, false), None))
        .await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["token_type"], "Bearer");
    assert_eq!(res.body["second_factor"], "not_required");
    assert!(res.body["access_token"].as_str().unwrap().len() > 20);
}

#[tokio::test]
async fn test_wrong_password_is_unauthorized() {
    let app = TestApp::spawn().await;
    app.create_admin().await;

    let res = app
        .send(json_request(
            Method::POST,
            "/auth/login",
            &json!({ "email": ADMIN_EMAIL, "password": "guess" }),
            None,
        ))
        .await;

    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert!(res.body.get("two_factor_required").is_none());
    assert_eq!(app.audit.records_for("auth.login")[0].outcome, "failure");
}

#[tokio::test]
async fn test_missing_code_asks_for_second_factor() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    app.enable_two_factor(&admin).await;

    let res = app
        .send(json_request(Method::POST, "/auth/login", &login_body(None, false), None))
        .await;

    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["two_factor_required"], true);
    assert!(res.body.get("access_token").is_none());
}

#[tokio::test]
async fn test_login_with_totp_code() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    let (secret, _) = app.enable_two_factor(&admin).await;

    let code = totp::current_code(&secret, Utc::now()).unwrap();
    let res = app
        .send(json_request(
            Method::POST,
            "/auth/login",
            &login_body(Some(&code), false),
            None,
        ))
        .await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["second_factor"], "totp");
    assert_eq!(res.body["device_remembered"], false);
    assert!(res.trusted_device_cookie().is_none());
}

#[tokio::test]
async fn test_login_with_wrong_code_is_unauthorized() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    let (secret, _) = app.enable_two_factor(&admin).await;

    let stale = totp::code_at(&secret, totp::counter_at(Utc::now()) + 100).unwrap();
    let res = app
        .send(json_request(
            Method::POST,
            "/auth/login",
            &login_body(Some(&stale), false),
            None,
        ))
        .await;

    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert!(res.body.get("two_factor_required").is_none());
}

#[tokio::test]
async fn test_backup_code_logs_in_once() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    let (_, codes) = app.enable_two_factor(&admin).await;

    // Lowercase and dashed input is normalized
    let typed = format!("{}-{}", &codes[0][..4], &codes[0][4..]).to_lowercase();
    let first = app
        .send(json_request(
            Method::POST,
            "/auth/login",
            &login_body(Some(&typed), false),
            None,
        ))
        .await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body["second_factor"], "backup_code");

    let replay = app
        .send(json_request(
            Method::POST,
            "/auth/login",
            &login_body(Some(&codes[0]), false),
            None,
        ))
        .await;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_remembered_device_skips_second_factor() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    let (secret, _) = app.enable_two_factor(&admin).await;

    let code = totp::current_code(&secret, Utc::now()).unwrap();
    let first = app
        .send(with_header(
            json_request(
                Method::POST,
                "/auth/login",
                &login_body(Some(&code), true),
                None,
            ),
            "user-agent",
            "Mozilla/5.0 (X11; Linux x86_64) Firefox/131.0",
        ))
        .await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body["device_remembered"], true);

    let set_cookie = first
        .headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("trusted_device="))
        .unwrap()
        .to_string();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("Secure"));
    assert!(set_cookie.contains("SameSite=Strict"));

    let device_token = first.trusted_device_cookie().unwrap();
    let second = app
        .send(with_header(
            json_request(Method::POST, "/auth/login", &login_body(None, false), None),
            "cookie",
            &format!("trusted_device={}", device_token),
        ))
        .await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.body["second_factor"], "trusted_device");

    let bearer = second.body["access_token"].as_str().unwrap().to_string();
    let devices = app
        .send(with_bearer(
            empty_request(Method::GET, "/auth/devices", None),
            &bearer,
        ))
        .await;
    assert_eq!(devices.status, StatusCode::OK);
    let list = devices.body.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(
        list[0]["userAgent"],
        "Mozilla/5.0 (X11; Linux x86_64) Firefox/131.0"
    );
}

#[tokio::test]
async fn test_revoked_device_no_longer_vouches() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    let (secret, _) = app.enable_two_factor(&admin).await;

    let code = totp::current_code(&secret, Utc::now()).unwrap();
    let first = app
        .send(json_request(
            Method::POST,
            "/auth/login",
            &login_body(Some(&code), true),
            None,
        ))
        .await;
    let device_token = first.trusted_device_cookie().unwrap();
    let bearer = first.body["access_token"].as_str().unwrap().to_string();

    let devices = app
        .send(with_bearer(
            empty_request(Method::GET, "/auth/devices", None),
            &bearer,
        ))
        .await;
    let device_id = devices.body[0]["deviceId"].as_str().unwrap().to_string();

    let revoked = app
        .send(with_bearer(
            empty_request(Method::DELETE, &format!("/auth/devices/{}", device_id), None),
            &bearer,
        ))
        .await;
    assert_eq!(revoked.status, StatusCode::NO_CONTENT);

    let again = app
        .send(with_bearer(
            empty_request(Method::DELETE, &format!("/auth/devices/{}", device_id), None),
            &bearer,
        ))
        .await;
    assert_eq!(again.status, StatusCode::NOT_FOUND);

    let res = app
        .send(with_header(
            json_request(Method::POST, "/auth/login", &login_body(None, false), None),
            "cookie",
            &format!("trusted_device={}", device_token),
        ))
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["two_factor_required"], true);
}

#[tokio::test]
async fn test_device_of_other_user_is_ignored() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    app.enable_two_factor(&admin).await;

    let other = app
        .state
        .auth_service
        .ensure_user(
            "ops@example.com",
            &secrecy::SecretString::new("another long password".to_string()),
            true,
        )
        .await
        .unwrap();
    let issued = app
        .state
        .auth_service
        .devices()
        .issue(other.user_id, Default::default())
        .await
        .unwrap();

    let res = app
        .send(with_header(
            json_request(Method::POST, "/auth/login", &login_body(None, false), None),
            "cookie",
            &format!("trusted_device={}", issued.token),
        ))
        .await;

    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["two_factor_required"], true);
}

#[tokio::test]
async fn test_disabling_two_factor_revokes_devices() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    let (secret, _) = app.enable_two_factor(&admin).await;

    let code = totp::current_code(&secret, Utc::now()).unwrap();
    let first = app
        .send(json_request(
            Method::POST,
            "/auth/login",
            &login_body(Some(&code), true),
            None,
        ))
        .await;
    let bearer = first.body["access_token"].as_str().unwrap().to_string();

    let disabled = app
        .send(with_bearer(
            json_request(
                Method::POST,
                "/auth/2fa/disable",
                &json!({ "password": ADMIN_PASSWORD, "token": code }),
                None,
            ),
            &bearer,
        ))
        .await;
    assert_eq!(disabled.status, StatusCode::OK);

    let devices = app
        .send(with_bearer(
            empty_request(Method::GET, "/auth/devices", None),
            &bearer,
        ))
        .await;
    assert_eq!(devices.body.as_array().unwrap().len(), 0);
}
