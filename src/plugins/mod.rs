//! Cross-cutting hooks invoked by the [`crate::server::DavServer`].
//!
//! Plugins run in ascending priority order at fixed stages of a request.
//! A hook returning an error aborts the request; the error then travels
//! through every plugin's `on_exception` before it is answered.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{DavError, DavResult};
use crate::models::{DavResponse, PropertyMap, RequestContext};
use crate::services::dav::{Node, Tree};

pub mod exception_logger;
pub mod files;
pub mod maintenance;
pub mod quota;

pub use exception_logger::ExceptionLoggerPlugin;
pub use files::FilesPlugin;
pub use maintenance::{MaintenancePlugin, SystemStatus};
pub use quota::QuotaPlugin;

pub const DEFAULT_PRIORITY: i32 = 100;

#[async_trait]
pub trait ServerPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower runs earlier
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    /// First stage of every request, before method-specific logic
    async fn before_method(&self, _ctx: &RequestContext, _tree: &mut Tree) -> DavResult<()> {
        Ok(())
    }

    /// Content of the existing file at `path` is about to be replaced
    async fn before_write_content(
        &self,
        _ctx: &RequestContext,
        _tree: &mut Tree,
        _path: &str,
    ) -> DavResult<()> {
        Ok(())
    }

    /// A new file is about to be created at `path`
    async fn before_create_file(
        &self,
        _ctx: &RequestContext,
        _tree: &mut Tree,
        _path: &str,
    ) -> DavResult<()> {
        Ok(())
    }

    /// Called while a property listing for `node` is being built.
    /// Plugins may remove names from `requested` and fill `properties`.
    async fn before_get_properties(
        &self,
        _ctx: &RequestContext,
        _node: &Node,
        _requested: &mut BTreeSet<String>,
        _properties: &mut PropertyMap,
    ) -> DavResult<()> {
        Ok(())
    }

    /// A node was newly bound at `path` by PUT, MKCOL, MOVE or COPY
    async fn after_bind(
        &self,
        _ctx: &RequestContext,
        _tree: &mut Tree,
        _path: &str,
        _response: &mut DavResponse,
    ) -> DavResult<()> {
        Ok(())
    }

    async fn after_write_content(
        &self,
        _ctx: &RequestContext,
        _tree: &mut Tree,
        _path: &str,
        _response: &mut DavResponse,
    ) -> DavResult<()> {
        Ok(())
    }

    async fn on_exception(&self, _ctx: &RequestContext, _error: &DavError) {}
}

/// Stable sort by priority; plugins of equal priority keep insertion order
pub fn sort_plugins(plugins: &mut [Arc<dyn ServerPlugin>]) {
    plugins.sort_by_key(|p| p.priority());
}
