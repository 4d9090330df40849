mod common;

use common::TestServer;
use serde_json::{Value, json};

fn auth_cookie(server: &TestServer) -> String {
    format!("session={}", server.admin_session_cookie())
}

#[tokio::test]
async fn public_resolve_returns_404_for_unknown_unique_id() {
    let server = TestServer::new().await;
    let response = server.client.get(server.url("/content/does-not-exist")).send().await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn uploaded_content_is_not_resolvable_until_its_marker_is_ready() {
    let server = TestServer::new().await;
    let (_company_id, project_id) = server.seed_company_and_project().await;
    let cookie = auth_cookie(&server);

    let form = reqwest::multipart::Form::new()
        .text("metadata", json!({ "title": "Storefront poster" }).to_string())
        .part("image", reqwest::multipart::Part::bytes(vec![0xFF, 0xD8, 0xFF]).file_name("source.jpg"));

    let response = server
        .client
        .post(server.url(&format!("/admin/projects/{project_id}/content")))
        .header("Cookie", &cookie)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let content: Value = response.json().await.unwrap();
    assert_eq!(content["marker_status"], "pending");
    let unique_id = content["unique_id"].as_str().unwrap().to_string();

    // The marker pipeline isn't running in this test, so the manifest
    // stays unresolvable until marker_path is set by a worker.
    let resolve = server.client.get(server.url(&format!("/content/{unique_id}"))).send().await.unwrap();
    assert_eq!(resolve.status(), 404);
}

#[tokio::test]
async fn expired_project_content_becomes_unresolvable() {
    let server = TestServer::new().await;
    let (_company_id, project_id) = server.seed_company_and_project().await;

    let project = server.state.db.get_project(project_id).await.unwrap().unwrap();
    server.state.content.expire_project(&project).await.unwrap();

    let reloaded = server.state.db.get_project(project_id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, "expired");

    let notifications = server.state.db.list_notifications(Some(project.company_id), None, 10, 0).await.unwrap();
    assert!(notifications.iter().any(|n| n.kind == "expired"));
}

#[tokio::test]
async fn rotation_schedule_round_trips_through_the_admin_api() {
    let server = TestServer::new().await;
    let (_company_id, project_id) = server.seed_company_and_project().await;
    let cookie = auth_cookie(&server);

    let form = reqwest::multipart::Form::new()
        .text("metadata", json!({ "title": "Rotating banner" }).to_string())
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

    let mut video_ids = Vec::new();
    for _ in 0..2 {
        let video_form = reqwest::multipart::Form::new()
            .text("metadata", json!({ "title": "Clip" }).to_string())
            .part("video", reqwest::multipart::Part::bytes(vec![0x00, 0x00, 0x00, 0x18]).file_name("clip.mp4"));
        let video: Value = server
            .client
            .post(server.url(&format!("/admin/content/{content_id}/videos")))
            .header("Cookie", &cookie)
            .multipart(video_form)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        video_ids.push(video["id"].as_i64().unwrap());
    }

    let response = server
        .client
        .post(server.url(&format!("/admin/content/{content_id}/rotation-schedule")))
        .header("Cookie", &cookie)
        .json(&json!({
            "rotation_type": "daily",
            "time_of_day": "09:00",
            "video_ids": video_ids,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let fetched = server
        .client
        .get(server.url(&format!("/admin/content/{content_id}/rotation-schedule")))
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(fetched.status(), 200);
    let schedule: Value = fetched.json().await.unwrap();
    assert_eq!(schedule["rotation_type"], "daily");
    assert_eq!(schedule["current_index"], 0);
}

#[tokio::test]
async fn rotation_schedule_rejects_an_empty_video_sequence() {
    let server = TestServer::new().await;
    let (_company_id, project_id) = server.seed_company_and_project().await;
    let cookie = auth_cookie(&server);

    let form = reqwest::multipart::Form::new()
        .text("metadata", json!({ "title": "Empty sequence" }).to_string())
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
        .post(server.url(&format!("/admin/content/{content_id}/rotation-schedule")))
        .header("Cookie", &cookie)
        .json(&json!({ "rotation_type": "daily", "video_ids": Vec::<i64>::new() }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn rotation_schedule_rejects_a_video_id_not_owned_by_the_content() {
    let server = TestServer::new().await;
    let (_company_id, project_id) = server.seed_company_and_project().await;
    let cookie = auth_cookie(&server);

    let form = reqwest::multipart::Form::new()
        .text("metadata", json!({ "title": "Foreign video sequence" }).to_string())
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
        .post(server.url(&format!("/admin/content/{content_id}/rotation-schedule")))
        .header("Cookie", &cookie)
        .json(&json!({ "rotation_type": "daily", "video_ids": [999999999_i64] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}
