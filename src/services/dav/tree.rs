use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::{debug, info, warn};

use super::file::FileNode;
use super::node::{DirectoryNode, Node, NodeContext};
use crate::errors::{DavError, DavResult, StorageError};
use crate::models::RequestContext;
use crate::storage::StorageView;
use crate::utils::filename::is_valid_file_name;
use crate::utils::path::{
    is_part_file, is_same_or_descendant, join_path, normalize_path, split_path, trim_path,
};

/// Metadata lookups surface an unreachable backend as 503 and a detached
/// mount as a plain miss
fn lookup_error(err: StorageError) -> DavError {
    match err {
        StorageError::Invalid { path } => DavError::not_found(format!("storage of /{} is not valid", path)),
        other => other.into(),
    }
}

/// Resolves request paths to nodes for the lifetime of one request.
///
/// Every resolved node is cached by its trimmed path, so repeated lookups
/// within a request neither hit the backend again nor hand out a second
/// instance for the same path.
pub struct Tree {
    env: Option<NodeContext>,
    cache: HashMap<String, Node>,
    dirty: BTreeSet<String>,
}

impl Tree {
    pub fn new(env: NodeContext) -> Self {
        Self {
            env: Some(env),
            cache: HashMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// A tree whose filesystem has not been set up; every lookup fails
    pub fn uninitialized() -> Self {
        Self {
            env: None,
            cache: HashMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    pub fn context(&self) -> DavResult<&NodeContext> {
        self.env
            .as_ref()
            .ok_or_else(|| DavError::service_unavailable("filesystem not setup"))
    }

    pub async fn resolve(&mut self, path: &str) -> DavResult<Node> {
        let env = self.context()?.clone();
        let path = trim_path(path).to_string();

        if let Some(node) = self.cache.get(&path) {
            return Ok(node.clone());
        }

        // uploads in progress never reach the metadata cache
        let info = if is_part_file(&path) {
            env.view.scan_info(&path).await
        } else {
            env.view.file_info(&path).await
        }
        .map_err(lookup_error)?;

        let Some(info) = info else {
            return Err(DavError::not_found(format!("File with name /{} could not be located", path)));
        };

        let node = if info.is_dir() {
            Node::Directory(Arc::new(DirectoryNode::new(env, info)))
        } else {
            Node::File(Arc::new(FileNode::new(env, info)))
        };
        self.cache.insert(path, node.clone());
        Ok(node)
    }

    pub async fn node_exists(&mut self, path: &str) -> DavResult<bool> {
        match self.resolve(path).await {
            Ok(_) => Ok(true),
            Err(DavError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Rename `source` to `destination`.
    ///
    /// Persisted properties follow the moved node only for its exact path;
    /// entries stored for its descendants keep their old keys.
    pub async fn move_node(
        &mut self,
        ctx: &RequestContext,
        source: &str,
        destination: &str,
    ) -> DavResult<()> {
        let env = self.context()?.clone();
        let view = &env.view;
        let source = trim_path(source).to_string();
        let destination = trim_path(destination).to_string();

        let node = self.resolve(&source).await?;
        if node.is_directory() && self.node_exists(&destination).await? {
            return Err(DavError::forbidden(format!(
                "Could not move directory /{}, target exists",
                source
            )));
        }

        let (source_dir, _) = split_path(&source);
        let (destination_dir, destination_name) = split_path(&destination);

        // a moveable mount point is relocated as a whole; only the
        // destination parent's create permission applies to it
        let mount = view.mount_point(&source).await?;
        let is_moveable_mount = mount.moveable && mount.internal_path.is_empty();

        let permissions = view.permissions(&source).await?;
        if !is_moveable_mount && !permissions.can_update() {
            return Err(DavError::forbidden(format!("/{} is read-only", source)));
        }
        if source_dir != destination_dir {
            if !view.permissions(&destination_dir).await?.can_create() {
                return Err(DavError::forbidden(format!(
                    "cannot create files in /{}",
                    destination_dir
                )));
            }
            if !is_moveable_mount && !permissions.can_delete() {
                return Err(DavError::forbidden(format!("cannot remove /{}", source)));
            }
        }

        if !is_valid_file_name(&destination_name, view.max_name_length()) {
            return Err(DavError::InvalidName { name: destination_name });
        }

        match view.rename(&source, &destination).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(DavError::forbidden(format!(
                    "Could not rename /{} to /{}",
                    source, destination
                )))
            }
            Err(e @ StorageError::LockNotAcquired { .. }) => return Err(DavError::file_locked(e)),
            Err(e @ StorageError::NotAvailable { .. }) => return Err(e.into()),
            Err(e) => return Err(DavError::forbidden(e.to_string())),
        }
        info!(from = %source, to = %destination, "moved");

        match env
            .properties
            .rename_path(&ctx.user, &normalize_path(&source), &normalize_path(&destination))
            .await
        {
            Ok(count) => debug!("Rewrote {} property entries for /{}", count, destination),
            Err(e) => warn!("Failed to move properties of /{}: {}", source, e),
        }

        self.mark_dirty(&source_dir);
        self.mark_dirty(&destination_dir);
        Ok(())
    }

    /// Recursively duplicate `source` at `destination`
    pub async fn copy(&mut self, source: &str, destination: &str) -> DavResult<()> {
        let env = self.context()?.clone();
        let source = trim_path(source).to_string();
        let destination = trim_path(destination).to_string();

        self.resolve(&source).await?;
        if is_same_or_descendant(&destination, &source) {
            return Err(DavError::forbidden(format!(
                "Could not copy /{} into itself",
                source
            )));
        }

        copy_recursive(env.view.clone(), source, destination.clone()).await?;

        let (destination_dir, _) = split_path(&destination);
        self.mark_dirty(&destination_dir);
        Ok(())
    }

    /// Flag a directory as changed and drop everything cached below it
    pub fn mark_dirty(&mut self, path: &str) {
        let path = trim_path(path).to_string();
        self.cache.retain(|cached, _| !is_same_or_descendant(cached, &path));
        self.dirty.insert(path);
    }

    pub fn dirty_paths(&self) -> &BTreeSet<String> {
        &self.dirty
    }

    pub fn take_dirty(&mut self) -> BTreeSet<String> {
        std::mem::take(&mut self.dirty)
    }
}

fn copy_recursive(
    view: Arc<dyn StorageView>,
    source: String,
    destination: String,
) -> BoxFuture<'static, DavResult<()>> {
    Box::pin(async move {
        if view.is_file(&source).await? {
            if !view.copy(&source, &destination).await? {
                return Err(DavError::forbidden(format!(
                    "Could not copy /{} to /{}",
                    source, destination
                )));
            }
            return Ok(());
        }

        if !view.mkdir(&destination).await? && !view.file_exists(&destination).await? {
            return Err(DavError::forbidden(format!("Could not create /{}", destination)));
        }
        for child in view.read_dir(&source).await? {
            if child == "." || child == ".." || is_part_file(&child) {
                continue;
            }
            copy_recursive(
                view.clone(),
                join_path(&source, &child),
                join_path(&destination, &child),
            )
            .await?;
        }
        Ok(())
    })
}
