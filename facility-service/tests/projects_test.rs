//! Integration tests for projects, permissions and access resolution.

mod common;

use axum::http::StatusCode;
use common::TestApp;
use facility_service::reconciler::Mode;
use serde_json::json;

#[tokio::test]
async fn project_without_access_is_reported_missing() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    app.create_user(&admin, "alice", "alice-pw").await;
    let root = app.create_group(&admin, "prj-owners").await;
    app.create_project(&admin, "prj", root).await;

    let alice = app.login("alice", "alice-pw").await;
    let response = app.get("/api/v1/projects/prj/", &alice).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let listed = app.get("/api/v1/projects/", &alice).await;
    assert_eq!(listed.status, StatusCode::OK);
    assert_eq!(listed.body, json!([]));
}

#[tokio::test]
async fn explicit_no_access_is_also_masked() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    let alice_id = app.create_user(&admin, "alice", "alice-pw").await;
    let root = app.create_group(&admin, "owners").await;
    let readers = app.create_group(&admin, "readers").await;
    app.add_member(&admin, readers, alice_id).await;
    app.create_project(&admin, "prj", root).await;

    let response = app
        .post(
            "/api/v1/projects/prj/permissions/",
            &admin,
            json!({ "group": readers, "access_level": "no_access" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);

    let alice = app.login("alice", "alice-pw").await;
    let response = app.get("/api/v1/projects/prj/", &alice).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn root_group_members_get_full_access() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    let dana_id = app.create_user(&admin, "dana", "dana-pw").await;
    let root = app.create_group(&admin, "core").await;
    app.add_member(&admin, root, dana_id).await;
    let project_id = app.create_project(&admin, "core-data", root).await;

    let dana = app.login("dana", "dana-pw").await;
    let by_alias = app.get("/api/v1/projects/core-data/", &dana).await;
    assert_eq!(by_alias.status, StatusCode::OK);
    assert_eq!(by_alias.body["access_level"], "full");

    let by_id = app
        .get(&format!("/api/v1/projects/{}/", project_id), &dana)
        .await;
    assert_eq!(by_id.status, StatusCode::OK);
    assert_eq!(by_id.body["alias"], "core-data");
}

#[tokio::test]
async fn most_permissive_group_permission_wins() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    let erin_id = app.create_user(&admin, "erin", "erin-pw").await;
    let root = app.create_group(&admin, "root-g").await;
    let viewers = app.create_group(&admin, "viewers").await;
    let processors = app.create_group(&admin, "processors").await;
    app.add_member(&admin, viewers, erin_id).await;
    app.add_member(&admin, processors, erin_id).await;
    app.create_project(&admin, "mixed", root).await;

    for (group, level) in [(viewers, "data_view"), (processors, "data_process")] {
        let response = app
            .post(
                "/api/v1/projects/mixed/permissions/",
                &admin,
                json!({ "group": group, "access_level": level }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
    }

    let erin = app.login("erin", "erin-pw").await;
    let response = app.get("/api/v1/projects/mixed/", &erin).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["access_level"], "data_process");

    // Below `full`, the permission list stays closed.
    let response = app.get("/api/v1/projects/mixed/permissions/", &erin).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn permission_listing_starts_with_synthetic_root() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    let root = app.create_group(&admin, "owners").await;
    let guests = app.create_group(&admin, "guests").await;
    app.create_project(&admin, "listing", root).await;
    app.post(
        "/api/v1/projects/listing/permissions/",
        &admin,
        json!({ "group": guests, "access_level": "data_view" }),
    )
    .await;

    let response = app.get("/api/v1/projects/listing/permissions/", &admin).await;
    assert_eq!(response.status, StatusCode::OK);
    let permissions = response.body.as_array().unwrap();
    assert_eq!(permissions.len(), 2);
    assert_eq!(permissions[0]["group"], root);
    assert_eq!(permissions[0]["access_level"], "full");
    assert_eq!(permissions[0]["is_root"], true);
    assert_eq!(permissions[1]["group"], guests);
    assert_eq!(permissions[1]["access_level"], "data_view");
}

#[tokio::test]
async fn root_group_permission_cannot_be_set() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    let root = app.create_group(&admin, "owners").await;
    app.create_project(&admin, "fixed", root).await;

    let response = app
        .post(
            "/api/v1/projects/fixed/permissions/",
            &admin,
            json!({ "group": root, "access_level": "data_view" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], "operation_not_permitted");
}

#[tokio::test]
async fn root_group_cannot_be_deleted_while_in_use() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    let root = app.create_group(&admin, "owners").await;
    app.create_project(&admin, "pinned", root).await;

    let response = app
        .call("DELETE", &format!("/api/v1/groups/{}/", root), Some(&admin), None)
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.body["code"], "entity_constraint_failed");
}

#[tokio::test]
async fn duplicate_alias_is_a_conflict() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    let root = app.create_group(&admin, "owners").await;
    app.create_project(&admin, "twice", root).await;

    let response = app
        .post(
            "/api/v1/projects/",
            &admin,
            json!({ "alias": "twice", "name": "Another", "root_group": root }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.body["code"], "entity_duplicated");
}

#[tokio::test]
async fn missing_project_fields_are_reported() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;

    let response = app.post("/api/v1/projects/", &admin, json!({ "name": "x" })).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], "field_required");
    assert!(response.body["fields"].get("alias").is_some());
    assert!(response.body["fields"].get("root_group").is_some());
}

#[tokio::test]
async fn permission_grant_and_revoke_follow_to_the_host() {
    let app = TestApp::spawn_in_mode(Mode::Active).await;
    let admin = app.support_token().await;
    let u_id = app.create_user(&admin, "u", "u-password").await;
    let g0 = app.create_group(&admin, "g0").await;
    let g1 = app.create_group(&admin, "g1").await;
    app.create_project(&admin, "p", g0).await;
    app.add_member(&admin, g1, u_id).await;

    assert!(app.host.has_group("p"));
    assert!(app.host.account("u").is_some());

    let response = app
        .post(
            "/api/v1/projects/p/permissions/",
            &admin,
            json!({ "group": g1, "access_level": "data_add" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);

    let u = app.login("u", "u-password").await;
    let response = app.get("/api/v1/projects/p/", &u).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["access_level"], "data_add");
    assert!(app.host.account("u").unwrap().groups.contains("p"));

    let response = app
        .call(
            "DELETE",
            &format!("/api/v1/projects/p/permissions/{}/", g1),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let response = app.get("/api/v1/projects/p/", &u).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(!app.host.account("u").unwrap().groups.contains("p"));
}

#[tokio::test]
async fn project_delete_removes_host_group_and_directory() {
    let app = TestApp::spawn_in_mode(Mode::Active).await;
    let admin = app.support_token().await;
    let root = app.create_group(&admin, "owners").await;
    app.create_project(&admin, "scratch", root).await;

    let project_dir = format!("{}/scratch", app.state.config.posix.naming.project_base);
    assert!(app.host.has_group("scratch"));
    assert!(app.host.dir(&project_dir).is_some());

    let response = app
        .call("DELETE", "/api/v1/projects/scratch/", Some(&admin), None)
        .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert!(!app.host.has_group("scratch"));
    assert!(app.host.dir(&project_dir).is_none());
}

#[tokio::test]
async fn new_root_group_loses_its_stored_permission() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    let g0 = app.create_group(&admin, "g0").await;
    let g1 = app.create_group(&admin, "g1").await;
    app.create_project(&admin, "moved", g0).await;
    app.post(
        "/api/v1/projects/moved/permissions/",
        &admin,
        json!({ "group": g1, "access_level": "data_view" }),
    )
    .await;

    let response = app
        .call(
            "PATCH",
            "/api/v1/projects/moved/",
            Some(&admin),
            Some(json!({ "root_group": g1 })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);

    let response = app.get("/api/v1/projects/moved/permissions/", &admin).await;
    let permissions = response.body.as_array().unwrap();
    assert_eq!(permissions.len(), 1, "{}", response.body);
    assert_eq!(permissions[0]["group"], g1);
    assert_eq!(permissions[0]["access_level"], "full");
    assert_eq!(permissions[0]["is_root"], true);
}

#[tokio::test]
async fn updated_project_reads_back_field_for_field() {
    let app = TestApp::spawn().await;
    let admin = app.support_token().await;
    let root = app.create_group(&admin, "owners").await;
    let id = app.create_project(&admin, "atlas", root).await;

    let updated = app
        .call(
            "PATCH",
            &format!("/api/v1/projects/{}/", id),
            Some(&admin),
            Some(json!({ "name": "Atlas Survey", "description": "Sky survey data" })),
        )
        .await;
    assert_eq!(updated.status, StatusCode::OK, "{}", updated.body);

    let loaded = app.get(&format!("/api/v1/projects/{}/", id), &admin).await;
    assert_eq!(loaded.status, StatusCode::OK);
    assert_eq!(loaded.body, updated.body);
    assert_eq!(loaded.body["alias"], "atlas");
    assert_eq!(loaded.body["name"], "Atlas Survey");
    assert_eq!(loaded.body["description"], "Sky survey data");
    assert_eq!(loaded.body["root_group"], root);
}
