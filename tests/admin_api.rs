//! Admin API tests.

use reqwest::StatusCode;
use serde_json::Value;

mod common;

fn admin(client: &reqwest::Client, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
    client.request(method, url).bearer_auth(common::ADMIN_KEY)
}

#[tokio::test]
async fn test_admin_requires_key() {
    let server = common::spawn_demo().await;
    let client = reqwest::Client::new();

    let res = client.get(server.url("/admin/status")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(server.url("/admin/status"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = admin(&client, reqwest::Method::GET, server.url("/admin/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "operational");

    server.stop().await;
}

#[tokio::test]
async fn test_admin_disabled_routes_fall_through() {
    let mut config = common::test_config();
    config.admin.enabled = false;
    let server = common::spawn_server(config, common::demo_backend()).await;

    let res = reqwest::Client::new()
        .get(server.url("/admin/status"))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap();
    // Treated as a resource code, which does not exist.
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn test_cache_purge_endpoints() {
    let server = common::spawn_demo().await;
    let client = reqwest::Client::new();

    for path in ["/index.html", "/app.js"] {
        let res = client.get(server.url(path)).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let cache: Value = admin(&client, reqwest::Method::GET, server.url("/admin/cache"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cache["entries"], 2);

    let purged: Value = admin(&client, reqwest::Method::POST, server.url("/admin/cache/purge?rc=index.html"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(purged["purged"], true);
    assert_eq!(server.state.cache.len(), 1);

    let purged: Value = admin(&client, reqwest::Method::POST, server.url("/admin/cache/purge?rc=_all"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(purged["purged"], true);
    assert!(server.state.cache.is_empty());
    assert_eq!(server.state.cache.bytes_used(), 0);

    let res = admin(&client, reqwest::Method::POST, server.url("/admin/cache/purge?rc="))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    server.stop().await;
}

#[tokio::test]
async fn test_sessions_and_pool_views() {
    let server = common::spawn_demo().await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/login"))
        .json(&serde_json::json!({ "username": "alice", "password": "secret" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let sessions: Value = admin(&client, reqwest::Method::GET, server.url("/admin/sessions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let sessions = sessions.as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["username"], "alice");
    assert_eq!(sessions[0]["logged_in"], true);

    let pool: Value = admin(&client, reqwest::Method::GET, server.url("/admin/pool"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pool["in_use"], 1);

    server.stop().await;
}
