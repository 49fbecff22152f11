//! Integration tests for host reconciliation in suggest and active mode.

mod common;

use axum::http::StatusCode;
use common::TestApp;
use facility_service::models::User;
use facility_service::reconciler::{CommandExecutor, Mode, PosixCommand};
use serde_json::json;

#[tokio::test]
async fn suggest_mode_returns_commands_and_keeps_nothing() {
    let app = TestApp::spawn_in_mode(Mode::Suggest).await;
    let admin = app.support_token().await;

    let response = app
        .post(
            "/api/v1/users/",
            &admin,
            json!({ "login": "bob", "password": "bob-pw", "name": "Bob" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], "action_required");
    let detail = response.body["detail"].as_str().unwrap();
    assert!(detail.contains("useradd"), "{}", detail);
    assert!(detail.contains("bob"), "{}", detail);

    let mut tx = app.begin().await;
    assert!(User::find_by_login(&mut tx, "bob").await.unwrap().is_none());
    assert!(app.host.executed().is_empty());
}

#[tokio::test]
async fn suggest_mode_lets_host_neutral_requests_through() {
    let app = TestApp::spawn_in_mode(Mode::Suggest).await;
    let admin = app.support_token().await;

    let response = app
        .call(
            "PATCH",
            "/api/v1/profile/",
            Some(&admin),
            Some(json!({ "email": "support@example.org" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["email"], "support@example.org");
}

#[tokio::test]
async fn active_mode_creates_account_with_home() {
    let app = TestApp::spawn_in_mode(Mode::Active).await;
    let admin = app.support_token().await;

    let response = app
        .post(
            "/api/v1/users/",
            &admin,
            json!({ "login": "frank", "password": "frank-pw", "name": "Frank", "surname": "Lee" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["unix_group"], "frank");
    assert_eq!(response.body["home_dir"], "/home/frank");

    let account = app.host.account("frank").expect("host account");
    assert_eq!(account.primary_group, "frank");
    assert_eq!(account.home, "/home/frank");
    assert!(app.host.dir("/home/frank").is_some());
}

#[tokio::test]
async fn failed_command_rolls_the_request_back() {
    let app = TestApp::spawn_in_mode(Mode::Active).await;
    let admin = app.support_token().await;
    app.host.fail_on("useradd");

    let response = app
        .post("/api/v1/users/", &admin, json!({ "login": "carol", "password": "pw" }))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], "posix_error");

    let mut tx = app.begin().await;
    assert!(User::find_by_login(&mut tx, "carol").await.unwrap().is_none());
    assert!(app.host.account("carol").is_none());

    // The group made it to the host before the failure; a retry reuses it.
    app.host.clear_failure();
    let response = app
        .post("/api/v1/users/", &admin, json!({ "login": "carol", "password": "pw" }))
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
    assert!(app.host.account("carol").is_some());
}

#[tokio::test]
async fn rename_moves_account_and_group() {
    let app = TestApp::spawn_in_mode(Mode::Active).await;
    let admin = app.support_token().await;
    let id = app.create_user(&admin, "bob", "bob-pw").await;

    let response = app
        .call(
            "PATCH",
            &format!("/api/v1/users/{}/", id),
            Some(&admin),
            Some(json!({ "login": "robert" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    assert_eq!(response.body["unix_group"], "robert");
    assert_eq!(response.body["home_dir"], "/home/robert");

    assert!(app.host.account("bob").is_none());
    let account = app.host.account("robert").unwrap();
    assert_eq!(account.primary_group, "robert");
    assert!(app.host.has_group("robert"));
    assert!(!app.host.has_group("bob"));
}

#[tokio::test]
async fn delete_removes_account() {
    let app = TestApp::spawn_in_mode(Mode::Active).await;
    let admin = app.support_token().await;
    let id = app.create_user(&admin, "temp", "temp-pw").await;
    assert!(app.host.account("temp").is_some());

    let response = app
        .call("DELETE", &format!("/api/v1/users/{}/", id), Some(&admin), None)
        .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert!(app.host.account("temp").is_none());
    assert!(app.host.dir("/home/temp").is_none());
}

#[tokio::test]
async fn second_sync_queues_nothing() {
    let app = TestApp::spawn_in_mode(Mode::Active).await;
    let admin = app.support_token().await;
    app.create_user(&admin, "drift", "drift-pw").await;

    // Simulate drift: the account vanished behind our back.
    app.host
        .execute(&PosixCommand::new("userdel", ["-rf", "drift"]))
        .await
        .unwrap();
    assert!(app.host.account("drift").is_none());

    let first = app
        .call("POST", "/api/v1/host/sync/", Some(&admin), None)
        .await;
    assert_eq!(first.status, StatusCode::OK);
    assert!(first.body["queued"].as_u64().unwrap() >= 1);
    assert!(app.host.account("drift").is_some());

    let second = app
        .call("POST", "/api/v1/host/sync/", Some(&admin), None)
        .await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.body["queued"], 0);
}

#[tokio::test]
async fn sync_requires_superuser() {
    let app = TestApp::spawn_in_mode(Mode::Active).await;
    let admin = app.support_token().await;
    app.create_user(&admin, "plain", "plain-pw").await;
    let plain = app.login("plain", "plain-pw").await;

    let response = app.call("POST", "/api/v1/host/sync/", Some(&plain), None).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn disabled_mode_never_touches_the_host() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    let id = app.create_user(&admin, "quiet", "quiet-pw").await;
    let group = app.create_group(&admin, "quiet-g").await;
    app.add_member(&admin, group, id).await;
    app.create_project(&admin, "quiet-p", group).await;

    let user = app.get(&format!("/api/v1/users/{}/", id), &admin).await;
    assert!(user.body["unix_group"].is_null());
    assert!(app.host.executed().is_empty());
}
