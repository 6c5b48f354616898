use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::ServerPlugin;
use crate::errors::{DavError, DavResult};
use crate::models::request::{OC_ETAG, OC_FILEID};
use crate::models::{DavResponse, PropertyMap, RequestContext};
use crate::services::dav::{ChunkInfo, Node, Tree};
use crate::utils::path::{join_path, split_path};

pub const NS_OWNCLOUD: &str = "http://owncloud.org/ns";
pub const FILE_ID_PROPERTY: &str = "{http://owncloud.org/ns}id";
pub const PERMISSIONS_PROPERTY: &str = "{http://owncloud.org/ns}permissions";
pub const SIZE_PROPERTY: &str = "{http://owncloud.org/ns}size";

/// Publishes file ids, etags and permissions.
///
/// Ids and permissions are owned by the server: whatever a client asks
/// for under those names is replaced with the authoritative values.
pub struct FilesPlugin {
    instance_id: String,
}

impl FilesPlugin {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
        }
    }

    /// Globally unique rendering of a file id
    pub fn format_file_id(&self, id: u64) -> String {
        format!("{:08}{}", id, self.instance_id)
    }

    async fn send_file_id_header(
        &self,
        ctx: &RequestContext,
        tree: &mut Tree,
        path: &str,
        response: &mut DavResponse,
    ) -> DavResult<()> {
        let mut path = path.to_string();
        if ctx.is_chunked() {
            let (parent, name) = split_path(&path);
            if let Some(info) = ChunkInfo::decode(&name) {
                path = join_path(&parent, &info.name);
            }
        }

        // the node of a create event is its parent, so look the path up again
        let node = match tree.resolve(&path).await {
            Ok(node) => node,
            Err(DavError::NotFound { .. }) => {
                debug!("no node at /{} yet, skipping id headers", path);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if let Some(id) = node.file_id() {
            response.set_header(OC_FILEID, self.format_file_id(id));
        }
        if let Some(etag) = node.etag() {
            response.set_header(OC_ETAG, etag);
        }
        Ok(())
    }
}

#[async_trait]
impl ServerPlugin for FilesPlugin {
    fn name(&self) -> &'static str {
        "files"
    }

    async fn before_get_properties(
        &self,
        _ctx: &RequestContext,
        node: &Node,
        requested: &mut BTreeSet<String>,
        properties: &mut PropertyMap,
    ) -> DavResult<()> {
        requested.remove(FILE_ID_PROPERTY);
        requested.remove(PERMISSIONS_PROPERTY);

        if let Some(id) = node.file_id() {
            properties.insert(FILE_ID_PROPERTY.to_string(), json!(self.format_file_id(id)));
        }
        if let Some(permissions) = node.dav_permissions() {
            properties.insert(PERMISSIONS_PROPERTY.to_string(), json!(permissions));
        }
        if node.is_directory() {
            properties.insert(SIZE_PROPERTY.to_string(), json!(node.size()));
        }
        Ok(())
    }

    async fn after_bind(
        &self,
        ctx: &RequestContext,
        tree: &mut Tree,
        path: &str,
        response: &mut DavResponse,
    ) -> DavResult<()> {
        self.send_file_id_header(ctx, tree, path, response).await
    }

    async fn after_write_content(
        &self,
        ctx: &RequestContext,
        tree: &mut Tree,
        path: &str,
        response: &mut DavResponse,
    ) -> DavResult<()> {
        self.send_file_id_header(ctx, tree, path, response).await
    }
}
