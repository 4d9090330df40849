//! End-to-end marker-generation happy path, driven through a real
//! `WorkerPool` against a fake compiler binary.

mod common;

use common::TestServer;
use serde_json::{Value, json};
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

fn auth_cookie(server: &TestServer) -> String {
    format!("session={}", server.admin_session_cookie())
}

/// Writes a throwaway shell script that satisfies the compiler contract:
/// reads `--output <path>`, writes a dummy artifact there, and echoes a
/// `{"feature_points": N}` line on stdout.
fn write_fake_compiler(dir: &std::path::Path) -> std::path::PathBuf {
    let script_path = dir.join("fake-compiler.sh");
    let script = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "stub marker artifact" > "$out"
echo '{"feature_points": 37}'
"#;
    std::fs::write(&script_path, script).unwrap();
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).unwrap();
    script_path
}

#[tokio::test]
async fn uploaded_content_resolves_once_a_worker_compiles_its_marker() {
    let server = TestServer::new().await;
    let (_company_id, project_id) = server.seed_company_and_project().await;
    let cookie = auth_cookie(&server);

    let scratch = tempfile::tempdir().unwrap();
    let compiler_path = write_fake_compiler(scratch.path());

    let form = reqwest::multipart::Form::new()
        .text("metadata", json!({ "title": "Storefront poster" }).to_string())
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
    let unique_id = content["unique_id"].as_str().unwrap().to_string();

    let mut pipeline_cfg = server.state.config.pipeline.clone();
    pipeline_cfg.compiler_path = compiler_path;
    let pool = Arc::new(arportal::pipeline::WorkerPool::new(
        server.state.db.clone(),
        server.state.content.clone(),
        server.state.credentials.clone(),
        Arc::new(server.state.config.storage.clone()),
        server.state.config.server.public_base_url.clone(),
        pipeline_cfg,
    ));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    pool.spawn(shutdown_rx);

    let mut resolved = None;
    for _ in 0..50 {
        let response = server.client.get(server.url(&format!("/content/{unique_id}"))).send().await.unwrap();
        if response.status() == 200 {
            resolved = Some(response.json::<Value>().await.unwrap());
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    let _ = shutdown_tx.send(true);

    let manifest = resolved.expect("content should become resolvable once the marker is ready");
    assert_eq!(manifest["unique_id"], unique_id);
    assert!(!manifest["marker_url"].as_str().unwrap().is_empty());

    let stored = server.state.db.get_ar_content_by_unique_id(&unique_id).await.unwrap().unwrap();
    assert_eq!(stored.marker_status, "ready");
    assert_eq!(stored.marker_feature_points, Some(37));
}
