use crate::api::{self, AppState};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use previewbox_sandboxes::testing::{serve_http_stub, wait_for_record, FakeEngine};
use previewbox_sandboxes::{
    InMemorySandboxStore, ProvisionSettings, ReadinessProbe, SandboxManager, SandboxStore,
    SandboxWorkspace,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    store: Arc<InMemorySandboxStore>,
    engine: Arc<FakeEngine>,
    _temp_dir: TempDir,
}

fn test_app(engine: FakeEngine) -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(engine);
    let store = Arc::new(InMemorySandboxStore::new());
    let probe = ReadinessProbe::new("127.0.0.1", Duration::from_secs(10))
        .with_backoff(Duration::from_millis(25), Duration::from_millis(100));

    let manager = SandboxManager::with_probe(
        engine.clone(),
        store.clone(),
        SandboxWorkspace::new(temp_dir.path()),
        ProvisionSettings::default(),
        probe,
    );

    TestApp {
        router: api::create_router(AppState::new(Arc::new(manager))),
        store,
        engine,
        _temp_dir: temp_dir,
    }
}

async fn send(app: &TestApp, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn create(app: &TestApp, files: Value) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/sandbox/create",
        Some(json!({ "files": files })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["sbxId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app(FakeEngine::new());

    let (status, body) = send(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_create_requires_files() {
    let app = test_app(FakeEngine::new());

    for payload in [json!({}), json!({ "files": {} })] {
        let (status, body) = send(&app, Method::POST, "/sandbox/create", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Files are required");
    }
    assert!(app.store.list().await.is_empty());
}

#[tokio::test]
async fn test_create_rejects_malformed_json() {
    let app = test_app(FakeEngine::new());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/sandbox/create")
        .header("content-type", "application/json")
        .body(Body::from("{\"files\": "))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_then_poll_until_completed() {
    let app = test_app(FakeEngine::new().hold_install());

    let sbx_id = create(&app, json!({ "src/app/page.tsx": "A" })).await;
    let record = app.store.get(&sbx_id).await.unwrap();
    let _server = serve_http_stub(record.port).await.unwrap();

    let uri = format!("/sandbox/status/{}", sbx_id);
    let (status, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "status": "progress", "server_url": null, "message": "Server not ready" })
    );

    app.engine.release_install();
    wait_for_record(app.store.as_ref(), &sbx_id, |r| r.is_server_ready).await;

    let (_, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(
        body,
        json!({
            "status": "completed",
            "server_url": format!("http://localhost:{}", record.port),
            "message": "server started successfully",
        })
    );
}

#[tokio::test]
async fn test_status_reports_failure_message() {
    let app = test_app(FakeEngine::new().with_pull_error("pull access denied for node"));

    let sbx_id = create(&app, json!({ "package.json": "{}" })).await;
    wait_for_record(app.store.as_ref(), &sbx_id, |r| r.has_error).await;

    let (status, body) = send(&app, Method::GET, &format!("/sandbox/status/{}", sbx_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["server_url"], Value::Null);
    assert_eq!(body["message"], "pull access denied for node");
}

#[tokio::test]
async fn test_status_unknown_sandbox() {
    let app = test_app(FakeEngine::new());

    let (status, body) = send(&app, Method::GET, "/sandbox/status/nope", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body,
        json!({ "status": "failed", "server_url": null, "message": "Sandbox not found" })
    );
}

#[tokio::test]
async fn test_file_read_and_update() {
    let app = test_app(FakeEngine::new().hold_install());
    let sbx_id = create(&app, json!({ "src/app/page.tsx": "A" })).await;
    let uri = format!("/sandbox/file/{}?filePath=src/app/page.tsx", sbx_id);

    let (status, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "success": true, "file": "A", "message": "File get successfully" })
    );

    let (status, body) = send(&app, Method::PATCH, &uri, Some(json!({ "content": "X" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "success": true, "message": "file updated successfully" })
    );

    let (_, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(body["file"], "X");
}

#[tokio::test]
async fn test_file_errors() {
    let app = test_app(FakeEngine::new().hold_install());
    let sbx_id = create(&app, json!({ "src/app/page.tsx": "A" })).await;

    let (status, body) = send(&app, Method::GET, &format!("/sandbox/file/{}", sbx_id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["file"], Value::Null);

    let missing = format!("/sandbox/file/{}?filePath=does/not/exist.ts", sbx_id);
    let (status, body) = send(&app, Method::GET, &missing, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["file"], Value::Null);

    let (status, _) = send(&app, Method::GET, "/sandbox/file/nope?filePath=a.ts", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let escaping = format!("/sandbox/file/{}?filePath=../../etc/passwd", sbx_id);
    let (status, _) = send(&app, Method::GET, &escaping, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_file_validation() {
    let app = test_app(FakeEngine::new().hold_install());
    let sbx_id = create(&app, json!({ "src/app/page.tsx": "A" })).await;
    let uri = format!("/sandbox/file/{}?filePath=src/app/page.tsx", sbx_id);

    let (status, body) = send(&app, Method::PATCH, &uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let no_path = format!("/sandbox/file/{}", sbx_id);
    let (status, _) = send(&app, Method::PATCH, &no_path, Some(json!({ "content": "X" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        Method::PATCH,
        "/sandbox/file/nope?filePath=a.ts",
        Some(json!({ "content": "X" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Sandbox not found");
}

#[tokio::test]
async fn test_list_and_apply_files() {
    let app = test_app(FakeEngine::new().hold_install());
    let sbx_id = create(&app, json!({ "src/app/page.tsx": "A", "package.json": "{}" })).await;
    let uri = format!("/sandbox/files/{}", sbx_id);

    let (status, body) = send(
        &app,
        Method::POST,
        &uri,
        Some(json!({ "files": { "src/components/button.tsx": "B" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "success": true,
            "files": {
                "src/app/page.tsx": "A",
                "package.json": "{}",
                "src/components/button.tsx": "B",
            }
        })
    );

    let (status, _) = send(&app, Method::POST, &uri, Some(json!({ "files": {} }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, Method::GET, "/sandbox/files/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["files"], Value::Null);
}

#[tokio::test]
async fn test_delete_sandbox() {
    let app = test_app(FakeEngine::new().hold_install());
    let sbx_id = create(&app, json!({ "package.json": "{}" })).await;
    let uri = format!("/sandbox/{}", sbx_id);

    let (status, body) = send(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(app.engine.removed_containers().len(), 1);

    let (status, _) = send(&app, Method::GET, &format!("/sandbox/status/{}", sbx_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}
