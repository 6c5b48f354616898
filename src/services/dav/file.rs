use std::sync::{PoisonError, RwLock};

use axum::http::Method;
use tracing::{debug, error, warn};

use super::chunking::{AssembledChunks, ChunkInfo};
use super::node::NodeContext;
use crate::errors::{DavError, DavResult, StorageError};
use crate::models::request::X_OC_MTIME;
use crate::models::{DavResponse, NodeInfo, RequestContext};
use crate::storage::DataStream;
use crate::utils::filename::is_valid_file_name;
use crate::utils::mime::secure_mime_type;
use crate::utils::path::{join_path, split_path};

/// A single file in the view.
///
/// The metadata snapshot is refreshed after every successful write so that
/// the etag handed back to the client matches what a later lookup returns.
pub struct FileNode {
    env: NodeContext,
    path: String,
    info: RwLock<Option<NodeInfo>>,
}

impl FileNode {
    pub fn new(env: NodeContext, info: NodeInfo) -> Self {
        Self {
            env,
            path: info.path.clone(),
            info: RwLock::new(Some(info)),
        }
    }

    /// A file that may not exist yet, e.g. the target of a create
    pub fn unresolved(env: NodeContext, path: String) -> Self {
        Self {
            env,
            path,
            info: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn info(&self) -> Option<NodeInfo> {
        self.info.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_info(&self, info: Option<NodeInfo>) {
        *self.info.write().unwrap_or_else(PoisonError::into_inner) = info;
    }

    pub fn size(&self) -> u64 {
        self.info().map(|i| i.size).unwrap_or(0)
    }

    /// Mime type of the file.
    ///
    /// Property listings get the stored type verbatim so they match what
    /// other clients show; content responses get the sanitized type.
    pub fn content_type(&self, ctx: &RequestContext) -> Option<String> {
        let mime = self.info()?.mime_type;
        if ctx.is_method("PROPFIND") {
            Some(mime)
        } else {
            Some(secure_mime_type(&mime))
        }
    }

    pub async fn refresh_info(&self) -> DavResult<()> {
        let info = self.env.view.file_info(&self.path).await?;
        self.set_info(info);
        Ok(())
    }

    async fn ensure_not_encrypted(&self) -> DavResult<()> {
        if self.env.view.encrypted_files_pending().await {
            return Err(DavError::service_unavailable(
                "encryption is disabled but encrypted files are still present",
            ));
        }
        Ok(())
    }

    /// Best-effort removal of a staging file; failures are only logged
    async fn discard(&self, path: &str) {
        if let Err(e) = self.env.view.unlink(path).await {
            warn!("Could not remove staging file {}: {}", path, e);
        }
    }

    /// Replace the file content with `data`.
    ///
    /// Returns the new quoted etag, or `None` for a chunk that did not
    /// complete its upload yet.
    pub async fn put(
        &self,
        ctx: &RequestContext,
        data: DataStream,
        response: &mut DavResponse,
    ) -> DavResult<Option<String>> {
        let view = &self.env.view;
        if let Some(info) = self.info() {
            if view.file_exists(&self.path).await? && !info.permissions.can_update() {
                return Err(DavError::forbidden(format!("/{} is read-only", self.path)));
            }
        }

        self.ensure_not_encrypted().await?;

        let (_, name) = split_path(&self.path);
        if !is_valid_file_name(&name, view.max_name_length()) {
            return Err(DavError::InvalidName { name });
        }

        if ctx.is_chunked() {
            return self.put_chunked(ctx, data, response).await;
        }

        // staged under a unique name so readers never see a partial file
        let part_path = format!("{}.ocTransferId{}.part", self.path, rand::random::<u32>());

        if let Err(e) = view.write(&part_path, data).await {
            error!(path = %self.path, "Writing upload to {} failed: {}", part_path, e);
            self.discard(&part_path).await;
            return Err(e.into());
        }

        if let Some(expected) = ctx.content_length() {
            if !ctx.is_method("LOCK") {
                let actual = view.filesize(&part_path).await?;
                if actual != expected {
                    self.discard(&part_path).await;
                    return Err(DavError::SizeMismatch { expected, actual });
                }
            }
        }

        let renamed = match view.rename(&part_path, &self.path).await {
            Ok(renamed) => renamed,
            Err(e @ StorageError::LockNotAcquired { .. }) => {
                self.discard(&part_path).await;
                return Err(DavError::file_locked(e));
            }
            Err(e @ StorageError::NotAvailable { .. }) => return Err(e.into()),
            Err(e) => {
                warn!("Rename of {} failed: {}", part_path, e);
                false
            }
        };
        let exists = view.file_exists(&self.path).await?;
        if !renamed || !exists {
            error!(path = %self.path, "rename of part file failed");
            self.discard(&part_path).await;
            return Err(DavError::internal("Could not rename part file to final file"));
        }

        self.apply_client_mtime(ctx, &self.path, response).await?;
        self.refresh_info().await?;

        match self.info() {
            Some(info) => Ok(Some(format!("\"{}\"", info.etag))),
            None => Err(DavError::internal(format!("/{} vanished after upload", self.path))),
        }
    }

    /// Sync clients may send the original modification time along
    async fn apply_client_mtime(
        &self,
        ctx: &RequestContext,
        path: &str,
        response: &mut DavResponse,
    ) -> DavResult<()> {
        let Some(mtime) = ctx.modification_time() else {
            return Ok(());
        };
        match self.env.view.touch(path, mtime).await {
            Ok(true) => response.set_header(X_OC_MTIME, "accepted"),
            Ok(false) => debug!("backend refused mtime for {}", path),
            Err(e @ StorageError::NotAvailable { .. }) => return Err(e.into()),
            Err(e) => warn!("Failed to set mtime of {}: {}", path, e),
        }
        Ok(())
    }

    async fn put_chunked(
        &self,
        ctx: &RequestContext,
        data: DataStream,
        response: &mut DavResponse,
    ) -> DavResult<Option<String>> {
        let (parent, name) = split_path(&self.path);
        let info = ChunkInfo::decode(&name)
            .ok_or_else(|| DavError::not_implemented(format!("'{}' is not a valid chunk name", name)))?;

        let chunks = &self.env.chunks;
        let written = chunks.store(&info, data).await?;

        // detect aborted uploads
        if ctx.method == Method::PUT {
            if let Some(expected) = ctx.content_length() {
                if written != expected {
                    chunks.remove(&info).await;
                    return Err(DavError::SizeMismatch { expected, actual: written });
                }
            }
        }

        match chunks.take_complete(&info).await {
            Some(assembled) => {
                let etag = self.assemble(ctx, &parent, &info, assembled, response).await?;
                Ok(Some(etag))
            }
            None => Ok(None),
        }
    }

    async fn assemble(
        &self,
        ctx: &RequestContext,
        parent: &str,
        info: &ChunkInfo,
        assembled: AssembledChunks,
        response: &mut DavResponse,
    ) -> DavResult<String> {
        let view = &self.env.view;
        let part_path = join_path(parent, &info.part_file_name());
        let target = join_path(parent, &info.name);
        debug!(
            transfer_id = %info.transfer_id,
            bytes = assembled.total_size(),
            "assembling {}",
            target
        );

        if let Err(e) = view.write(&part_path, assembled.into_stream()).await {
            error!("Writing assembled chunks to {} failed: {}", part_path, e);
            self.discard(&part_path).await;
            return Err(match e {
                StorageError::NotAvailable { .. } | StorageError::LockNotAcquired { .. } => e.into(),
                _ => DavError::internal("Could not assemble chunks"),
            });
        }

        let existed = view.file_exists(&target).await?;

        // final atomic rename
        let renamed = match view.rename(&part_path, &target).await {
            Ok(renamed) => renamed,
            Err(e @ StorageError::NotAvailable { .. }) => return Err(e.into()),
            Err(e) => {
                warn!("Rename of {} failed: {}", part_path, e);
                false
            }
        };
        let exists = view.file_exists(&target).await?;
        if !renamed || !exists {
            error!(path = %target, "rename of assembled part file failed");
            if exists && !existed {
                self.discard(&target).await;
            }
            self.discard(&part_path).await;
            return Err(DavError::internal("Could not rename part file assembled from chunks"));
        }

        self.apply_client_mtime(ctx, &target, response).await?;

        match view.file_info(&target).await? {
            Some(info) => Ok(format!("\"{}\"", info.etag)),
            None => Err(DavError::internal(format!("/{} vanished after assembly", target))),
        }
    }

    pub async fn get(&self) -> DavResult<DataStream> {
        self.ensure_not_encrypted().await?;
        Ok(self.env.view.read(&self.path).await?)
    }

    pub async fn delete(&self, ctx: &RequestContext) -> DavResult<()> {
        let deletable = self.info().map(|i| i.permissions.can_delete()).unwrap_or(false);
        if !deletable {
            return Err(DavError::forbidden(format!("cannot delete /{}", self.path)));
        }

        match self.env.view.unlink(&self.path).await {
            Ok(true) => {}
            // assume it wasn't possible to delete due to permissions
            Ok(false) => return Err(DavError::forbidden(format!("cannot delete /{}", self.path))),
            Err(e @ StorageError::NotAvailable { .. }) => return Err(e.into()),
            Err(e @ StorageError::LockNotAcquired { .. }) => return Err(DavError::file_locked(e)),
            Err(e) => return Err(DavError::forbidden(e.to_string())),
        }

        self.env.remove_properties(&ctx.user, &self.path).await;
        Ok(())
    }
}
