mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use imembed::blob::{BlobLocation, FsBlobStore};
use imembed::extractor::GradientExtractor;
use imembed::index::{IndexClient, MemoryStore};
use imembed::retry::RetryPolicy;
use imembed::server::{self, AppState, CreateEmbeddingResponse, ErrorResponse};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;

const INDEX: &str = "projects/p/locations/us-central1/indexes/flowers";

struct TestServer {
    addr: SocketAddr,
    store: Arc<MemoryStore>,
    client: reqwest::Client,
    _images: assert_fs::TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let images = assert_fs::TempDir::new().unwrap();
        common::write_category(images.path(), "tulips", 2);
        std::fs::write(images.path().join("tulips/broken.jpg"), b"not a jpeg").unwrap();

        let store = Arc::new(MemoryStore::new());
        store.create_index(INDEX, GradientExtractor::DIM).await.unwrap();

        let state = AppState::new(
            Arc::new(GradientExtractor),
            Arc::new(FsBlobStore::new(images.path())),
            BlobLocation::Local { root: images.path().to_path_buf() },
            IndexClient::new(store.clone(), GradientExtractor::DIM)
                .with_retry(RetryPolicy::none()),
            INDEX,
            RetryPolicy::none(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, server::create_app(state)).await });

        Self { addr, store, client: reqwest::Client::new(), _images: images }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn create(&self, body: Value) -> reqwest::Response {
        self.client.post(self.url("/embeddings")).json(&body).send().await.unwrap()
    }
}

#[tokio::test]
async fn root_is_ok() {
    let server = TestServer::start().await;
    let resp = server.client.get(server.url("/")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.json::<Value>().await.unwrap(), json!({ "ok": true }));
}

#[tokio::test]
async fn create_embedding_upserts_once_per_id() {
    let server = TestServer::start().await;

    for _ in 0..2 {
        let resp = server.create(json!({ "name": "tulips/tulips_0.jpg" })).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: CreateEmbeddingResponse = resp.json().await.unwrap();
        assert_eq!(body.id, "tulips/tulips_0.jpg");
        assert_eq!(body.embedding.len(), GradientExtractor::DIM);
        assert_eq!(server.store.get(INDEX, &body.id).await, Some(body.embedding));
    }
    assert_eq!(server.store.len(INDEX).await, Some(1));

    server.create(json!({ "name": "tulips/tulips_1.jpg" })).await.error_for_status().unwrap();
    assert_eq!(server.store.len(INDEX).await, Some(2));

    let metrics = server.client.get(server.url("/metrics")).send().await.unwrap();
    let text = metrics.text().await.unwrap();
    assert!(text.contains("imembed_upsert_datapoint_count"));
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let server = TestServer::start().await;

    let cases = [
        (json!({ "name": "" }), StatusCode::BAD_REQUEST),
        (json!({ "name": "tulips/missing.jpg" }), StatusCode::NOT_FOUND),
        (json!({ "name": "tulips/broken.jpg" }), StatusCode::UNPROCESSABLE_ENTITY),
    ];
    for (body, status) in cases {
        let resp = server.create(body.clone()).await;
        assert_eq!(resp.status(), status, "{body}");
        let err: ErrorResponse = resp.json().await.unwrap();
        assert!(!err.message.is_empty());
    }

    // 缺少 name 字段由 axum 的 Json 提取器拒绝
    let resp = server.create(json!({})).await;
    assert!(resp.status().is_client_error());

    assert_eq!(server.store.len(INDEX).await, Some(0));
}

#[tokio::test]
async fn openapi_document_lists_routes() {
    let server = TestServer::start().await;
    let resp = server.client.get(server.url("/api-docs/openapi.json")).send().await.unwrap();
    let doc: Value = resp.json().await.unwrap();
    assert!(doc["paths"]["/"].is_object());
    assert!(doc["paths"]["/embeddings"]["post"].is_object());
}
