use std::sync::Arc;

use tracing::{info, warn};

use super::chunking::ChunkStore;
use super::file::FileNode;
use crate::errors::{DavError, DavResult, StorageError};
use crate::models::{DavResponse, NodeInfo, Permissions, RequestContext};
use crate::services::properties::PropertyStore;
use crate::storage::{DataStream, StorageView};
use crate::utils::path::{join_path, normalize_path};

/// Collaborators every node needs to do its work
#[derive(Clone)]
pub struct NodeContext {
    pub view: Arc<dyn StorageView>,
    pub properties: Arc<dyn PropertyStore>,
    pub chunks: Arc<ChunkStore>,
}

impl NodeContext {
    pub fn new(
        view: Arc<dyn StorageView>,
        properties: Arc<dyn PropertyStore>,
        chunks: Arc<ChunkStore>,
    ) -> Self {
        Self { view, properties, chunks }
    }

    /// Drop persisted properties of a removed node; failures are logged only
    pub(crate) async fn remove_properties(&self, user: &str, path: &str) {
        if let Err(e) = self.properties.remove_path(user, &normalize_path(path)).await {
            warn!("Failed to remove properties of {}: {}", path, e);
        }
    }
}

/// A resolved file or directory.
///
/// Both variants are reference counted so that the tree's per-request
/// cache can hand out the same instance for repeated lookups.
#[derive(Clone)]
pub enum Node {
    File(Arc<FileNode>),
    Directory(Arc<DirectoryNode>),
}

impl Node {
    pub fn path(&self) -> &str {
        match self {
            Node::File(file) => file.path(),
            Node::Directory(dir) => dir.path(),
        }
    }

    pub fn info(&self) -> Option<NodeInfo> {
        match self {
            Node::File(file) => file.info(),
            Node::Directory(dir) => Some(dir.info().clone()),
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Node::Directory(_))
    }

    pub fn size(&self) -> u64 {
        match self {
            Node::File(file) => file.size(),
            Node::Directory(dir) => dir.size(),
        }
    }

    /// Directories have no content type
    pub fn content_type(&self, ctx: &RequestContext) -> Option<String> {
        match self {
            Node::File(file) => file.content_type(ctx),
            Node::Directory(_) => None,
        }
    }

    pub fn permissions(&self) -> Permissions {
        self.info().map(|i| i.permissions).unwrap_or_else(Permissions::empty)
    }

    pub fn file_id(&self) -> Option<u64> {
        self.info().map(|i| i.file_id)
    }

    /// Etag surrounded by double quotes, as sent on the wire
    pub fn etag(&self) -> Option<String> {
        self.info().map(|i| format!("\"{}\"", i.etag))
    }

    pub fn dav_permissions(&self) -> Option<String> {
        self.info().map(|i| i.dav_permissions())
    }

    pub fn as_file(&self) -> Option<&Arc<FileNode>> {
        match self {
            Node::File(file) => Some(file),
            Node::Directory(_) => None,
        }
    }

    pub fn as_directory(&self) -> Option<&Arc<DirectoryNode>> {
        match self {
            Node::Directory(dir) => Some(dir),
            Node::File(_) => None,
        }
    }

    /// True when both handles point at the same cached instance
    pub fn same_instance(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::File(a), Node::File(b)) => Arc::ptr_eq(a, b),
            (Node::Directory(a), Node::Directory(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::File(file) => write!(f, "File({})", file.path()),
            Node::Directory(dir) => write!(f, "Directory({})", dir.path()),
        }
    }
}

pub struct DirectoryNode {
    env: NodeContext,
    path: String,
    info: NodeInfo,
}

impl DirectoryNode {
    pub fn new(env: NodeContext, info: NodeInfo) -> Self {
        Self {
            env,
            path: info.path.clone(),
            info,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    /// Aggregate size of all files below this directory
    pub fn size(&self) -> u64 {
        self.info.size
    }

    /// Create (or replace) the child `name` with the given content
    pub async fn create_file(
        &self,
        ctx: &RequestContext,
        name: &str,
        data: DataStream,
        response: &mut DavResponse,
    ) -> DavResult<Option<String>> {
        if !self.info.permissions.can_create() {
            return Err(DavError::forbidden(format!("cannot create files in /{}", self.path)));
        }
        let file = FileNode::unresolved(self.env.clone(), join_path(&self.path, name));
        file.put(ctx, data, response).await
    }

    pub async fn delete(&self, ctx: &RequestContext) -> DavResult<()> {
        if self.path.is_empty() || !self.info.permissions.can_delete() {
            return Err(DavError::forbidden(format!("cannot delete /{}", self.path)));
        }
        match self.env.view.rmdir(&self.path).await {
            Ok(true) => {}
            Ok(false) => return Err(DavError::forbidden(format!("cannot delete /{}", self.path))),
            Err(e @ StorageError::NotAvailable { .. }) => return Err(e.into()),
            Err(e) => return Err(DavError::forbidden(e.to_string())),
        }
        info!(path = %self.path, "removed directory");
        self.env.remove_properties(&ctx.user, &self.path).await;
        Ok(())
    }
}
