//! Request dispatcher tying the tree, the nodes and the plugins together.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::errors::{DavError, DavResult, StorageError};
use crate::models::{DavResponse, PropertyMap, RequestContext};
use crate::config::Config;
use crate::plugins::{
    sort_plugins, ExceptionLoggerPlugin, FilesPlugin, MaintenancePlugin, QuotaPlugin, ServerPlugin,
    SystemStatus,
};
use crate::services::dav::{Node, NodeContext, Tree};
use crate::storage::DataStream;
use crate::utils::path::{split_path, trim_path};

pub const DAV_GETCONTENTLENGTH: &str = "{DAV:}getcontentlength";
pub const DAV_GETCONTENTTYPE: &str = "{DAV:}getcontenttype";
pub const DAV_GETETAG: &str = "{DAV:}getetag";
pub const DAV_GETLASTMODIFIED: &str = "{DAV:}getlastmodified";
pub const DAV_RESOURCETYPE: &str = "{DAV:}resourcetype";

const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

pub struct DavServer {
    env: Option<NodeContext>,
    plugins: Vec<Arc<dyn ServerPlugin>>,
}

impl DavServer {
    pub fn new(env: NodeContext) -> Self {
        Self {
            env: Some(env),
            plugins: Vec::new(),
        }
    }

    /// A server whose filesystem is not set up yet; every request that
    /// gets past the plugins is answered with 503
    pub fn without_storage() -> Self {
        Self {
            env: None,
            plugins: Vec::new(),
        }
    }

    /// Server with the standard plugin set configured from `config`
    pub fn with_default_plugins(env: NodeContext, config: &Config, status: Arc<SystemStatus>) -> Self {
        Self::new(env)
            .with_plugin(Arc::new(MaintenancePlugin::new(status)))
            .with_plugin(Arc::new(QuotaPlugin::new()))
            .with_plugin(Arc::new(FilesPlugin::new(config.instance_id.clone())))
            .with_plugin(Arc::new(ExceptionLoggerPlugin::new(config.log_app_name.clone())))
    }

    pub fn add_plugin(&mut self, plugin: Arc<dyn ServerPlugin>) {
        debug!("Registering DAV plugin {} (priority {})", plugin.name(), plugin.priority());
        self.plugins.push(plugin);
        sort_plugins(&mut self.plugins);
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn ServerPlugin>) -> Self {
        self.add_plugin(plugin);
        self
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn context(&self) -> Option<&NodeContext> {
        self.env.as_ref()
    }

    /// Fresh resolver for one request
    pub fn tree(&self) -> Tree {
        match &self.env {
            Some(env) => Tree::new(env.clone()),
            None => Tree::uninitialized(),
        }
    }

    pub async fn handle(&self, ctx: &RequestContext, body: DataStream) -> DavResult<DavResponse> {
        let mut tree = self.tree();
        let result = self.dispatch(ctx, &mut tree, body).await;
        if let Err(err) = &result {
            for plugin in &self.plugins {
                plugin.on_exception(ctx, err).await;
            }
        }
        result
    }

    async fn dispatch(
        &self,
        ctx: &RequestContext,
        tree: &mut Tree,
        body: DataStream,
    ) -> DavResult<DavResponse> {
        for plugin in &self.plugins {
            plugin.before_method(ctx, tree).await?;
        }

        match ctx.method.as_str() {
            "GET" => self.http_get(ctx, tree, true).await,
            "HEAD" => self.http_get(ctx, tree, false).await,
            "PUT" => self.http_put(ctx, tree, body).await,
            "DELETE" => self.http_delete(ctx, tree).await,
            "MKCOL" => self.http_mkcol(ctx, tree).await,
            "MOVE" => self.http_move_or_copy(ctx, tree, true).await,
            "COPY" => self.http_move_or_copy(ctx, tree, false).await,
            "PROPFIND" => self.http_propfind(ctx, tree, body).await,
            "PROPPATCH" => self.http_proppatch(ctx, tree, body).await,
            other => Err(DavError::not_implemented(format!("{} is not supported", other))),
        }
    }

    async fn http_get(&self, ctx: &RequestContext, tree: &mut Tree, with_body: bool) -> DavResult<DavResponse> {
        let node = tree.resolve(&ctx.path).await?;
        let Node::File(file) = &node else {
            return Err(DavError::not_implemented("GET is only implemented on File objects"));
        };

        let mut response = DavResponse::new(StatusCode::OK);
        if let Some(content_type) = file.content_type(ctx) {
            response.set_header("content-type", content_type);
        }
        response.set_header("content-length", file.size().to_string());
        if let Some(etag) = node.etag() {
            response.set_header("etag", etag);
        }
        if let Some(info) = node.info() {
            response.set_header("last-modified", info.mtime.format(HTTP_DATE).to_string());
        }
        if with_body {
            response.body = Some(file.get().await?);
        }
        Ok(response)
    }

    async fn http_put(&self, ctx: &RequestContext, tree: &mut Tree, body: DataStream) -> DavResult<DavResponse> {
        let path = trim_path(&ctx.path).to_string();
        let (parent, name) = split_path(&path);

        match tree.resolve(&path).await {
            Ok(Node::File(file)) => {
                for plugin in &self.plugins {
                    plugin.before_write_content(ctx, tree, &path).await?;
                }
                let mut response = DavResponse::new(StatusCode::NO_CONTENT);
                let etag = file.put(ctx, body, &mut response).await?;
                if let Some(etag) = etag {
                    response.set_header("etag", etag);
                }
                tree.mark_dirty(&parent);
                for plugin in &self.plugins {
                    plugin.after_write_content(ctx, tree, &path, &mut response).await?;
                }
                Ok(response)
            }
            Ok(Node::Directory(_)) => Err(DavError::MethodNotAllowed {
                message: "PUT is not allowed on non-files.".to_string(),
            }),
            Err(DavError::NotFound { .. }) => {
                let dir = match tree.resolve(&parent).await {
                    Ok(Node::Directory(dir)) => dir,
                    Ok(Node::File(_)) => return Err(DavError::conflict("Parent node is not a collection")),
                    Err(DavError::NotFound { .. }) => {
                        return Err(DavError::conflict(format!("Parent /{} does not exist", parent)))
                    }
                    Err(e) => return Err(e),
                };
                for plugin in &self.plugins {
                    plugin.before_create_file(ctx, tree, &path).await?;
                }
                let mut response = DavResponse::new(StatusCode::CREATED);
                let etag = dir.create_file(ctx, &name, body, &mut response).await?;
                if let Some(etag) = etag {
                    response.set_header("etag", etag);
                }
                tree.mark_dirty(&parent);
                for plugin in &self.plugins {
                    plugin.after_bind(ctx, tree, &path, &mut response).await?;
                }
                Ok(response)
            }
            Err(e) => Err(e),
        }
    }

    async fn http_delete(&self, ctx: &RequestContext, tree: &mut Tree) -> DavResult<DavResponse> {
        let path = trim_path(&ctx.path).to_string();
        delete_node(ctx, &tree.resolve(&path).await?).await?;
        tree.mark_dirty(&split_path(&path).0);
        Ok(DavResponse::new(StatusCode::NO_CONTENT))
    }

    async fn http_mkcol(&self, ctx: &RequestContext, tree: &mut Tree) -> DavResult<DavResponse> {
        let path = trim_path(&ctx.path).to_string();
        let (parent, _) = split_path(&path);
        if tree.node_exists(&path).await? {
            return Err(DavError::MethodNotAllowed {
                message: "The resource you tried to create already exists".to_string(),
            });
        }
        let dir = match tree.resolve(&parent).await {
            Ok(Node::Directory(dir)) => dir,
            Ok(Node::File(_)) | Err(DavError::NotFound { .. }) => {
                return Err(DavError::conflict("Parent node does not exist or is not a collection"))
            }
            Err(e) => return Err(e),
        };
        if !dir.info().permissions.can_create() {
            return Err(DavError::forbidden(format!("cannot create directories in /{}", parent)));
        }

        let view = &tree.context()?.view;
        match view.mkdir(&path).await {
            Ok(true) => {}
            Ok(false) => return Err(DavError::forbidden(format!("Could not create /{}", path))),
            Err(e @ StorageError::NotAvailable { .. }) => return Err(e.into()),
            Err(e) => return Err(DavError::forbidden(e.to_string())),
        }
        tree.mark_dirty(&parent);

        let mut response = DavResponse::new(StatusCode::CREATED);
        for plugin in &self.plugins {
            plugin.after_bind(ctx, tree, &path, &mut response).await?;
        }
        Ok(response)
    }

    async fn http_move_or_copy(
        &self,
        ctx: &RequestContext,
        tree: &mut Tree,
        is_move: bool,
    ) -> DavResult<DavResponse> {
        let source = trim_path(&ctx.path).to_string();
        let destination = ctx
            .destination()
            .ok_or_else(|| DavError::bad_request("The destination header was not supplied"))?;
        if source == destination {
            return Err(DavError::forbidden("Source and destination uri are identical."));
        }

        let source_node = tree.resolve(&source).await?;
        let (destination_parent, _) = split_path(&destination);
        match tree.resolve(&destination_parent).await {
            Ok(Node::Directory(_)) => {}
            Ok(Node::File(_)) => {
                return Err(DavError::conflict("The destination parent node is not a collection"))
            }
            Err(DavError::NotFound { .. }) => {
                return Err(DavError::conflict(format!(
                    "The destination parent /{} does not exist",
                    destination_parent
                )))
            }
            Err(e) => return Err(e),
        }

        let existed = tree.node_exists(&destination).await?;
        if existed {
            if !ctx.overwrite() {
                return Err(DavError::PreconditionFailed {
                    message: "The destination node already exists, and the overwrite header is set to false"
                        .to_string(),
                });
            }
            // directories are never replaced implicitly, the move below refuses them
            if !source_node.is_directory() {
                let target = tree.resolve(&destination).await?;
                delete_node(ctx, &target).await?;
                tree.mark_dirty(&destination_parent);
            }
        }

        if is_move {
            tree.move_node(ctx, &source, &destination).await?;
        } else {
            tree.copy(&source, &destination).await?;
        }

        let status = if existed { StatusCode::NO_CONTENT } else { StatusCode::CREATED };
        let mut response = DavResponse::new(status);
        for plugin in &self.plugins {
            plugin.after_bind(ctx, tree, &destination, &mut response).await?;
        }
        Ok(response)
    }

    /// Depth 0 property listing.
    ///
    /// The body, when present, is a JSON array of the requested property
    /// names in Clark notation; an empty body asks for everything.
    async fn http_propfind(
        &self,
        ctx: &RequestContext,
        tree: &mut Tree,
        body: DataStream,
    ) -> DavResult<DavResponse> {
        let node = tree.resolve(&ctx.path).await?;
        let raw = read_body(body).await?;
        let mut requested: BTreeSet<String> = if raw.is_empty() {
            BTreeSet::new()
        } else {
            serde_json::from_slice(&raw)
                .map_err(|e| DavError::bad_request(format!("invalid PROPFIND body: {}", e)))?
        };
        let all_properties = requested.is_empty();

        let mut properties = live_properties(ctx, &node);
        for plugin in &self.plugins {
            plugin.before_get_properties(ctx, &node, &mut requested, &mut properties).await?;
        }

        let env = tree.context()?;
        match env.properties.get_properties(&ctx.user, node.path()).await {
            Ok(dead) => {
                for (name, value) in dead {
                    if (all_properties || requested.contains(&name)) && !properties.contains_key(&name) {
                        properties.insert(name, value);
                    }
                }
            }
            Err(e) => warn!("Failed to load properties of /{}: {}", node.path(), e),
        }

        if !all_properties {
            properties.retain(|name, _| requested.contains(name) || is_protected_property(name));
        }

        let mut response = DavResponse::new(StatusCode::MULTI_STATUS);
        response.properties = Some(properties);
        Ok(response)
    }

    /// Store dead properties given as a JSON object of name to value
    async fn http_proppatch(
        &self,
        ctx: &RequestContext,
        tree: &mut Tree,
        body: DataStream,
    ) -> DavResult<DavResponse> {
        let node = tree.resolve(&ctx.path).await?;
        let raw = read_body(body).await?;
        let updates: PropertyMap = serde_json::from_slice(&raw)
            .map_err(|e| DavError::bad_request(format!("invalid PROPPATCH body: {}", e)))?;

        let env = tree.context()?;
        for (name, value) in updates {
            if is_protected_property(&name) || name.starts_with("{DAV:}") {
                return Err(DavError::forbidden(format!("{} is a protected property", name)));
            }
            env.properties
                .set_property(&ctx.user, node.path(), &name, value)
                .await
                .map_err(|e| DavError::internal(format!("could not store {}: {}", name, e)))?;
        }
        Ok(DavResponse::new(StatusCode::MULTI_STATUS))
    }
}

fn is_protected_property(name: &str) -> bool {
    matches!(
        name,
        crate::plugins::files::FILE_ID_PROPERTY
            | crate::plugins::files::PERMISSIONS_PROPERTY
            | crate::plugins::files::SIZE_PROPERTY
    )
}

async fn delete_node(ctx: &RequestContext, node: &Node) -> DavResult<()> {
    match node {
        Node::File(file) => file.delete(ctx).await,
        Node::Directory(dir) => dir.delete(ctx).await,
    }
}

async fn read_body(mut body: DataStream) -> DavResult<Vec<u8>> {
    let mut raw = Vec::new();
    body.read_to_end(&mut raw)
        .await
        .map_err(|e| DavError::bad_request(format!("could not read request body: {}", e)))?;
    Ok(raw)
}

fn live_properties(ctx: &RequestContext, node: &Node) -> PropertyMap {
    let mut properties = PropertyMap::new();
    if let Some(etag) = node.etag() {
        properties.insert(DAV_GETETAG.to_string(), json!(etag));
    }
    if let Some(info) = node.info() {
        properties.insert(
            DAV_GETLASTMODIFIED.to_string(),
            json!(info.mtime.format(HTTP_DATE).to_string()),
        );
    }
    match node {
        Node::File(file) => {
            properties.insert(DAV_GETCONTENTLENGTH.to_string(), json!(file.size()));
            if let Some(content_type) = file.content_type(ctx) {
                properties.insert(DAV_GETCONTENTTYPE.to_string(), json!(content_type));
            }
            properties.insert(DAV_RESOURCETYPE.to_string(), json!([]));
        }
        Node::Directory(_) => {
            properties.insert(DAV_RESOURCETYPE.to_string(), json!(["{DAV:}collection"]));
        }
    }
    properties
}
