use std::io::Cursor;
use std::sync::Arc;

use axum::http::Method;
use tokio::io::AsyncReadExt;

use crate::config::Config;
use crate::models::RequestContext;
use crate::plugins::SystemStatus;
use crate::server::DavServer;
use crate::services::dav::{ChunkStore, FileNode, NodeContext, Tree};
use crate::services::properties::MemoryPropertyStore;
use crate::storage::{DataStream, MemoryStorage};

pub const TEST_USER: &str = "alice";
pub const TEST_INSTANCE: &str = "oc1234";

pub struct TestEnv {
    pub storage: Arc<MemoryStorage>,
    pub properties: Arc<MemoryPropertyStore>,
    pub chunks: Arc<ChunkStore>,
    pub status: Arc<SystemStatus>,
    pub env: NodeContext,
}

impl TestEnv {
    pub fn new() -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let properties = Arc::new(MemoryPropertyStore::new());
        let chunks = Arc::new(ChunkStore::new());
        let env = NodeContext::new(storage.clone(), properties.clone(), chunks.clone());
        Self {
            storage,
            properties,
            chunks,
            status: Arc::new(SystemStatus::default()),
            env,
        }
    }

    pub fn tree(&self) -> Tree {
        Tree::new(self.env.clone())
    }

    pub fn server(&self) -> DavServer {
        let config = Config {
            instance_id: TEST_INSTANCE.to_string(),
            ..Config::default()
        };
        DavServer::with_default_plugins(self.env.clone(), &config, self.status.clone())
    }

    pub async fn file(&self, path: &str) -> Arc<FileNode> {
        let node = self.tree().resolve(path).await.unwrap();
        node.as_file().expect("not a file").clone()
    }

    /// Paths of staging files still present in the storage
    pub async fn part_files(&self) -> Vec<String> {
        self.storage
            .paths()
            .await
            .into_iter()
            .filter(|p| p.ends_with(".part"))
            .collect()
    }
}

pub fn body(bytes: &[u8]) -> DataStream {
    Box::new(Cursor::new(bytes.to_vec()))
}

pub fn empty_body() -> DataStream {
    Box::new(tokio::io::empty())
}

pub fn method(name: &str) -> Method {
    Method::from_bytes(name.as_bytes()).unwrap()
}

pub fn request(method_name: &str, path: &str) -> RequestContext {
    RequestContext::new(method(method_name), path, TEST_USER)
}

pub async fn read_all(mut stream: DataStream) -> Vec<u8> {
    let mut content = Vec::new();
    stream.read_to_end(&mut content).await.unwrap();
    content
}
