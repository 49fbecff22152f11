//! Integration tests for groups, governors and memberships.

mod common;

use axum::http::StatusCode;
use common::TestApp;
use serde_json::json;

struct Crew {
    admin: String,
    rosa: String,
    rosa_id: i64,
    sam: String,
    sam_id: i64,
}

async fn crew(app: &TestApp) -> Crew {
    let admin = app.support_token().await;
    let rosa_id = app.create_user(&admin, "rosa", "rosa-pw").await;
    let sam_id = app.create_user(&admin, "sam", "sam-pw").await;
    Crew {
        rosa: app.login("rosa", "rosa-pw").await,
        sam: app.login("sam", "sam-pw").await,
        admin,
        rosa_id,
        sam_id,
    }
}

#[tokio::test]
async fn creator_governs_and_belongs_to_new_group() {
    let app = TestApp::spawn().await;
    let crew = crew(&app).await;

    let response = app
        .post("/api/v1/groups/", &crew.rosa, json!({ "name": "optics" }))
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["governor"], crew.rosa_id);
    let id = response.body["id"].as_i64().unwrap();

    let members = app.get(&format!("/api/v1/groups/{}/users/", id), &crew.rosa).await;
    assert_eq!(members.status, StatusCode::OK);
    let logins: Vec<&str> = members
        .body
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["login"].as_str().unwrap())
        .collect();
    assert_eq!(logins, ["rosa"]);
}

#[tokio::test]
async fn only_superuser_may_appoint_another_governor() {
    let app = TestApp::spawn().await;
    let crew = crew(&app).await;

    let response = app
        .post(
            "/api/v1/groups/",
            &crew.rosa,
            json!({ "name": "for-sam", "governor": crew.sam_id }),
        )
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    let response = app
        .post(
            "/api/v1/groups/",
            &crew.admin,
            json!({ "name": "for-sam", "governor": crew.sam_id }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["governor"], crew.sam_id);
}

#[tokio::test]
async fn members_read_and_governor_writes() {
    let app = TestApp::spawn().await;
    let crew = crew(&app).await;
    let id = app.create_group(&crew.rosa, "optics").await;
    let uri = format!("/api/v1/groups/{}/", id);

    assert_eq!(app.get(&uri, &crew.sam).await.status, StatusCode::FORBIDDEN);

    app.add_member(&crew.rosa, id, crew.sam_id).await;
    assert_eq!(app.get(&uri, &crew.sam).await.status, StatusCode::OK);

    let rename = app
        .call("PATCH", &uri, Some(&crew.sam), Some(json!({ "name": "photonics" })))
        .await;
    assert_eq!(rename.status, StatusCode::FORBIDDEN);

    let rename = app
        .call("PATCH", &uri, Some(&crew.rosa), Some(json!({ "name": "photonics" })))
        .await;
    assert_eq!(rename.status, StatusCode::OK);
    assert_eq!(rename.body["name"], "photonics");
}

#[tokio::test]
async fn group_listing_is_scoped_to_membership() {
    let app = TestApp::spawn().await;
    let crew = crew(&app).await;
    app.create_group(&crew.rosa, "rosa-only").await;
    app.create_group(&crew.sam, "sam-only").await;

    let names = |body: &serde_json::Value| -> Vec<String> {
        body.as_array()
            .unwrap()
            .iter()
            .map(|g| g["name"].as_str().unwrap().to_string())
            .collect()
    };

    assert_eq!(names(&app.get("/api/v1/groups/", &crew.rosa).await.body), ["rosa-only"]);
    let all = names(&app.get("/api/v1/groups/", &crew.admin).await.body);
    assert!(all.contains(&"rosa-only".to_string()));
    assert!(all.contains(&"sam-only".to_string()));
}

#[tokio::test]
async fn governor_cannot_leave_and_members_can_be_removed() {
    let app = TestApp::spawn().await;
    let crew = crew(&app).await;
    let id = app.create_group(&crew.rosa, "optics").await;
    app.add_member(&crew.rosa, id, crew.sam_id).await;

    let response = app
        .call(
            "DELETE",
            &format!("/api/v1/groups/{}/users/{}/", id, crew.rosa_id),
            Some(&crew.rosa),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], "operation_not_permitted");

    let response = app
        .call(
            "DELETE",
            &format!("/api/v1/groups/{}/users/{}/", id, crew.sam_id),
            Some(&crew.rosa),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let response = app
        .call(
            "DELETE",
            &format!("/api/v1/groups/{}/users/{}/", id, crew.sam_id),
            Some(&crew.rosa),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn adding_a_member_twice_conflicts() {
    let app = TestApp::spawn().await;
    let crew = crew(&app).await;
    let id = app.create_group(&crew.rosa, "optics").await;
    app.add_member(&crew.rosa, id, crew.sam_id).await;

    let response = app
        .post(
            &format!("/api/v1/groups/{}/users/", id),
            &crew.rosa,
            json!({ "user_id": crew.sam_id }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn duplicate_group_name_conflicts() {
    let app = TestApp::spawn().await;
    let crew = crew(&app).await;
    app.create_group(&crew.rosa, "optics").await;

    let response = app
        .post("/api/v1/groups/", &crew.sam, json!({ "name": "optics" }))
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.body["code"], "entity_duplicated");
}

#[tokio::test]
async fn governor_roots_projects_in_own_group_only() {
    let app = TestApp::spawn().await;
    let crew = crew(&app).await;
    let rosa_group = app.create_group(&crew.rosa, "optics").await;

    let response = app
        .post(
            "/api/v1/projects/",
            &crew.sam,
            json!({ "alias": "lens", "name": "Lens", "root_group": rosa_group }),
        )
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    let response = app
        .post(
            "/api/v1/projects/",
            &crew.rosa,
            json!({ "alias": "lens", "name": "Lens", "root_group": rosa_group }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["access_level"], "full");
}

#[tokio::test]
async fn updated_group_reads_back_field_for_field() {
    let app = TestApp::spawn().await;
    let crew = crew(&app).await;
    let id = app.create_group(&crew.admin, "optics").await;
    let uri = format!("/api/v1/groups/{}/", id);

    let updated = app
        .call(
            "PATCH",
            &uri,
            Some(&crew.admin),
            Some(json!({ "name": "photonics", "governor": crew.sam_id })),
        )
        .await;
    assert_eq!(updated.status, StatusCode::OK, "{}", updated.body);

    let loaded = app.get(&uri, &crew.admin).await;
    assert_eq!(loaded.status, StatusCode::OK);
    assert_eq!(loaded.body, updated.body);
    assert_eq!(loaded.body["name"], "photonics");
    assert_eq!(loaded.body["governor"], crew.sam_id);

    // The new governor joined the group.
    assert_eq!(app.get(&uri, &crew.sam).await.status, StatusCode::OK);
}
