mod common;

use common::TestServer;

#[tokio::test]
async fn admin_routes_reject_missing_session() {
    let server = TestServer::new().await;
    let response = server.client.get(server.url("/admin/companies")).send().await.unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn admin_routes_reject_garbage_session_cookie() {
    let server = TestServer::new().await;
    let response = server
        .client
        .get(server.url("/admin/companies"))
        .header("Cookie", "session=not-a-real-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn admin_routes_accept_a_valid_session_cookie() {
    let server = TestServer::new().await;
    let cookie = server.admin_session_cookie();
    let response = server
        .client
        .get(server.url("/admin/companies"))
        .header("Cookie", format!("session={cookie}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn login_page_is_public() {
    let server = TestServer::new().await;
    let response = server.client.get(server.url("/login")).send().await.unwrap();
    assert_eq!(response.status(), 200);
}
