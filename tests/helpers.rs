#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use davfiles::{
    config::Config,
    plugins::SystemStatus,
    routes::dav::router,
    server::DavServer,
    services::dav::{ChunkStore, NodeContext},
    services::properties::MemoryPropertyStore,
    storage::StorageView,
    AppState,
};

pub const TEST_INSTANCE: &str = "ocint01";

pub struct TestApp {
    pub router: Router,
    pub status: Arc<SystemStatus>,
    pub chunks: Arc<ChunkStore>,
}

impl TestApp {
    pub fn new(storage: Arc<dyn StorageView>) -> Self {
        let config = Config {
            instance_id: TEST_INSTANCE.to_string(),
            dav_user: "alice".to_string(),
            ..Config::default()
        };
        let status = Arc::new(SystemStatus::default());
        let chunks = Arc::new(ChunkStore::new());
        let env = NodeContext::new(storage, Arc::new(MemoryPropertyStore::new()), chunks.clone());
        let server = DavServer::with_default_plugins(env, &config, status.clone());

        let state = Arc::new(AppState {
            server: Arc::new(server),
            status: status.clone(),
            config,
        });
        Self {
            router: router(state),
            status,
            chunks,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn put(&self, uri: &str, content: &'static [u8]) -> Response {
        self.send(
            Request::builder()
                .method("PUT")
                .uri(uri)
                .header("content-length", content.len())
                .body(Body::from(content))
                .unwrap(),
        )
        .await
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

pub fn assert_status(response: &Response, expected: StatusCode) {
    assert_eq!(response.status(), expected, "headers: {:?}", response.headers());
}
