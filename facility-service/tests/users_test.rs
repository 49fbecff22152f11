//! Integration tests for user administration, profiles and password recovery.

mod common;

use axum::http::StatusCode;
use common::TestApp;
use serde_json::{json, Value};

fn code_from_link(link: &str) -> String {
    link.split_once("code=")
        .map(|(_, code)| code.to_string())
        .expect("activation link carries a code")
}

#[tokio::test]
async fn created_user_reads_back_field_for_field() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;

    let created = app
        .post(
            "/api/v1/users/",
            &admin,
            json!({
                "login": "grace",
                "password": "grace-pw",
                "name": "Grace",
                "surname": "Hopper",
                "email": "grace@example.org",
                "phone": "+1 555 0100",
            }),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    let id = created.body["id"].as_i64().unwrap();

    let updated = app
        .call(
            "PATCH",
            &format!("/api/v1/users/{}/", id),
            Some(&admin),
            Some(json!({ "surname": "Brewster Hopper", "phone": "" })),
        )
        .await;
    assert_eq!(updated.status, StatusCode::OK);

    let loaded = app.get(&format!("/api/v1/users/{}/", id), &admin).await;
    assert_eq!(loaded.status, StatusCode::OK);
    assert_eq!(loaded.body, updated.body);
    assert_eq!(loaded.body["login"], "grace");
    assert_eq!(loaded.body["name"], "Grace");
    assert_eq!(loaded.body["surname"], "Brewster Hopper");
    assert_eq!(loaded.body["email"], "grace@example.org");
    assert_eq!(loaded.body["phone"], Value::Null);
    assert_eq!(loaded.body["has_password"], true);
    assert_eq!(loaded.body["is_superuser"], false);
}

#[tokio::test]
async fn invalid_login_is_a_field_error() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;

    let response = app
        .post("/api/v1/users/", &admin, json!({ "login": "not a slug!" }))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], "field_invalid");
    assert!(response.body["fields"].get("login").is_some());

    let response = app.post("/api/v1/users/", &admin, json!({ "name": "x" })).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], "field_required");
}

#[tokio::test]
async fn duplicate_login_and_email_conflict() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    app.post(
        "/api/v1/users/",
        &admin,
        json!({ "login": "henry", "email": "henry@example.org" }),
    )
    .await;

    let same_login = app
        .post("/api/v1/users/", &admin, json!({ "login": "henry" }))
        .await;
    assert_eq!(same_login.status, StatusCode::CONFLICT);
    assert_eq!(same_login.body["code"], "entity_duplicated");

    let same_email = app
        .post(
            "/api/v1/users/",
            &admin,
            json!({ "login": "henry2", "email": "henry@example.org" }),
        )
        .await;
    assert_eq!(same_email.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn user_administration_is_superuser_only() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    app.create_user(&admin, "ivy", "ivy-pw").await;
    let ivy = app.login("ivy", "ivy-pw").await;

    assert_eq!(app.get("/api/v1/users/", &ivy).await.status, StatusCode::FORBIDDEN);
    assert_eq!(
        app.call("GET", "/api/v1/users/", None, None).await.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(app.get("/api/v1/users/", &admin).await.status, StatusCode::OK);
}

#[tokio::test]
async fn support_user_cannot_be_deleted_or_locked() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    let support_id = app.get("/api/v1/profile/", &admin).await.body["id"]
        .as_i64()
        .unwrap();

    let response = app
        .call("DELETE", &format!("/api/v1/users/{}/", support_id), Some(&admin), None)
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], "operation_not_permitted");

    let response = app
        .call(
            "PATCH",
            &format!("/api/v1/users/{}/", support_id),
            Some(&admin),
            Some(json!({ "is_locked": true })),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = app
        .post(
            &format!("/api/v1/users/{}/external-accounts/", support_id),
            &admin,
            json!({ "provider": "oauth", "account_key": "support@idp" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reconciler_fields_are_read_only() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    let id = app.create_user(&admin, "jack", "jack-pw").await;

    let response = app
        .call(
            "PATCH",
            &format!("/api/v1/users/{}/", id),
            Some(&admin),
            Some(json!({ "home_dir": "/tmp/elsewhere" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], "field_invalid");
}

#[tokio::test]
async fn governor_cannot_be_deleted() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    let kim_id = app.create_user(&admin, "kim", "kim-pw").await;
    let kim = app.login("kim", "kim-pw").await;
    app.create_group(&kim, "kims-group").await;

    let response = app
        .call("DELETE", &format!("/api/v1/users/{}/", kim_id), Some(&admin), None)
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.body["code"], "entity_constraint_failed");
}

#[tokio::test]
async fn deleting_a_user_revokes_their_tokens() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    let id = app.create_user(&admin, "leo", "leo-pw").await;
    let leo = app.login("leo", "leo-pw").await;
    assert_eq!(app.get("/api/v1/profile/", &leo).await.status, StatusCode::OK);

    let response = app
        .call("DELETE", &format!("/api/v1/users/{}/", id), Some(&admin), None)
        .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert_eq!(
        app.get("/api/v1/profile/", &leo).await.status,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn profile_update_and_password_reset() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    app.create_user(&admin, "mia", "mia-pw").await;
    let mia = app.login("mia", "mia-pw").await;

    let response = app
        .call(
            "PATCH",
            "/api/v1/profile/",
            Some(&mia),
            Some(json!({ "name": "Mia", "email": "mia@example.org" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["name"], "Mia");

    let response = app
        .call("POST", "/api/v1/profile/password-reset/", Some(&mia), None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let password = response.body["password"].as_str().unwrap().to_string();
    let mail = app.email.last_to("mia@example.org").expect("password mailed");
    assert_eq!(mail.payload, password);

    assert_eq!(
        app.login_response("mia", "mia-pw").await.status,
        StatusCode::UNAUTHORIZED
    );
    app.login("mia", &password).await;
}

#[tokio::test]
async fn password_reset_needs_an_email_address() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    app.create_user(&admin, "noah", "noah-pw").await;
    let noah = app.login("noah", "noah-pw").await;

    let response = app
        .call("POST", "/api/v1/profile/password-reset/", Some(&noah), None)
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], "operation_not_permitted");
}

#[tokio::test]
async fn activation_code_signs_in_once() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    app.post(
        "/api/v1/users/",
        &admin,
        json!({ "login": "olga", "email": "olga@example.org" }),
    )
    .await;

    let response = app
        .call(
            "POST",
            "/api/v1/password-recovery/",
            None,
            Some(json!({ "email": "olga@example.org" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let mail = app.email.last_to("olga@example.org").expect("activation mailed");
    assert!(mail.payload.contains("/activate/?code="));
    let code = code_from_link(&mail.payload);

    let first = app
        .call(
            "POST",
            "/api/v1/login/",
            None,
            Some(json!({ "activation_code": code })),
        )
        .await;
    assert_eq!(first.status, StatusCode::OK, "{}", first.body);
    assert_eq!(first.body["user"]["login"], "olga");

    let second = app
        .call(
            "POST",
            "/api/v1/login/",
            None,
            Some(json!({ "activation_code": code })),
        )
        .await;
    assert_eq!(second.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn password_recovery_answers_the_same_for_unknown_addresses() {
    let app = TestApp::spawn().await;

    let response = app
        .call(
            "POST",
            "/api/v1/password-recovery/",
            None,
            Some(json!({ "email": "nobody@example.org" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(app.email.sent().is_empty());
}

#[tokio::test]
async fn superuser_issues_activation_code() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    let created = app
        .post(
            "/api/v1/users/",
            &admin,
            json!({ "login": "pia", "email": "pia@example.org" }),
        )
        .await;
    let id = created.body["id"].as_i64().unwrap();

    let response = app
        .call(
            "POST",
            &format!("/api/v1/users/{}/activation-code/", id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert!(app.email.last_to("pia@example.org").is_some());
}

#[tokio::test]
async fn external_accounts_are_managed_per_user() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    let id = app.create_user(&admin, "quinn", "quinn-pw").await;
    let uri = format!("/api/v1/users/{}/external-accounts/", id);

    let created = app
        .post(&uri, &admin, json!({ "provider": "oauth", "account_key": "quinn@idp" }))
        .await;
    assert_eq!(created.status, StatusCode::CREATED, "{}", created.body);
    let account_id = created.body["id"].as_i64().unwrap();

    let duplicate = app
        .post(&uri, &admin, json!({ "provider": "oauth", "account_key": "quinn@idp" }))
        .await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let listed = app.get(&uri, &admin).await;
    assert_eq!(listed.body.as_array().unwrap().len(), 1);

    let deleted = app
        .call("DELETE", &format!("{}{}/", uri, account_id), Some(&admin), None)
        .await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    assert_eq!(app.get(&uri, &admin).await.body, json!([]));
}
