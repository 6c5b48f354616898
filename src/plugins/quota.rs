use async_trait::async_trait;
use tracing::{debug, info};

use super::ServerPlugin;
use crate::errors::{DavError, DavResult};
use crate::models::RequestContext;
use crate::services::dav::{ChunkInfo, Tree};
use crate::storage::FreeSpace;
use crate::utils::path::split_path;

/// Rejects uploads that cannot fit into the free space of their target
#[derive(Debug, Default)]
pub struct QuotaPlugin;

impl QuotaPlugin {
    pub const PRIORITY: i32 = 20;

    pub fn new() -> Self {
        Self
    }

    async fn check_quota(&self, ctx: &RequestContext, tree: &mut Tree, path: &str) -> DavResult<()> {
        let mut length = ctx.declared_length();
        if length == 0 {
            // unknown length, the backend reports a full disk on its own
            return Ok(());
        }

        let env = tree.context()?;
        let (parent, name) = split_path(path);

        let chunk = if ctx.is_chunked() { ChunkInfo::decode(&name) } else { None };
        if let Some(info) = &chunk {
            // only the chunks still to come need room
            length = length.saturating_sub(env.chunks.current_size(info).await);
        }

        let free = env.view.free_space(&parent).await?;
        if let FreeSpace::Bytes(free) = free {
            if length > free {
                info!(path = %path, needed = length, free, "rejecting upload over quota");
                if let Some(info) = &chunk {
                    env.chunks.cleanup(info).await;
                }
                return Err(DavError::InsufficientStorage);
            }
        }
        debug!(path = %path, length, ?free, "quota check passed");
        Ok(())
    }
}

#[async_trait]
impl ServerPlugin for QuotaPlugin {
    fn name(&self) -> &'static str {
        "quota"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    async fn before_write_content(
        &self,
        ctx: &RequestContext,
        tree: &mut Tree,
        path: &str,
    ) -> DavResult<()> {
        self.check_quota(ctx, tree, path).await
    }

    async fn before_create_file(
        &self,
        ctx: &RequestContext,
        tree: &mut Tree,
        path: &str,
    ) -> DavResult<()> {
        self.check_quota(ctx, tree, path).await
    }
}
