mod common;

use common::TestServer;
use serde_json::{Value, json};

fn auth_cookie(server: &TestServer) -> String {
    format!("session={}", server.admin_session_cookie())
}

#[tokio::test]
async fn archiving_a_project_flips_its_status() {
    let server = TestServer::new().await;
    let (_company_id, project_id) = server.seed_company_and_project().await;
    let cookie = auth_cookie(&server);

    let response = server
        .client
        .post(server.url(&format!("/admin/projects/{project_id}/archive")))
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let project: Value = response.json().await.unwrap();
    assert_eq!(project["status"], "archived");
}

#[tokio::test]
async fn deactivating_a_company_is_reflected_immediately() {
    let server = TestServer::new().await;
    let (company_id, _project_id) = server.seed_company_and_project().await;
    let cookie = auth_cookie(&server);

    let response = server
        .client
        .post(server.url(&format!("/admin/companies/{company_id}/active")))
        .header("Cookie", &cookie)
        .json(&json!({ "is_active": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let company: Value = response.json().await.unwrap();
    assert_eq!(company["is_active"], false);
}

#[tokio::test]
async fn deactivating_ar_content_makes_it_unresolvable() {
    let server = TestServer::new().await;
    let (_company_id, project_id) = server.seed_company_and_project().await;
    let cookie = auth_cookie(&server);

    let form = reqwest::multipart::Form::new()
        .text("metadata", json!({ "title": "Soft-deletable poster" }).to_string())
        .part("image", reqwest::multipart::Part::bytes(vec![0xFF, 0xD8, 0xFF]).file_name("source.jpg"));
    let content: Value = server
        .client
        .post(server.url(&format!("/admin/projects/{project_id}/content")))
        .header("Cookie", &cookie)
        .multipart(form)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let content_id = content["id"].as_i64().unwrap();

    let response = server
        .client
        .post(server.url(&format!("/admin/content/{content_id}/active")))
        .header("Cookie", &cookie)
        .json(&json!({ "is_active": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["is_active"], false);
}

#[tokio::test]
async fn notifications_feed_returns_entries_for_a_company() {
    let server = TestServer::new().await;
    let (_company_id, project_id) = server.seed_company_and_project().await;
    let cookie = auth_cookie(&server);

    let project = server.state.db.get_project(project_id).await.unwrap().unwrap();
    server.state.content.expire_project(&project).await.unwrap();

    let response = server
        .client
        .get(server.url(&format!("/admin/notifications?company_id={}", project.company_id)))
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let notifications: Value = response.json().await.unwrap();
    assert!(notifications.as_array().unwrap().iter().any(|n| n["kind"] == "expired"));
}

#[tokio::test]
async fn storage_usage_endpoint_reports_drift_against_the_live_provider() {
    let server = TestServer::new().await;
    let (company_id, _project_id) = server.seed_company_and_project().await;
    let cookie = auth_cookie(&server);

    let response = server
        .client
        .get(server.url(&format!("/admin/companies/{company_id}/storage-usage")))
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let usage: Value = response.json().await.unwrap();
    assert_eq!(usage["recorded_used_bytes"], 0);
    assert!(usage["provider_used_bytes"].is_number());
}
