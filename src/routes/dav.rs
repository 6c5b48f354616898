use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use futures_util::TryStreamExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::errors::DavError;
use crate::models::{DavResponse, RequestContext};
use crate::storage::DataStream;
use crate::utils::path::trim_path;
use crate::AppState;

/// Every path that is not a fixed API endpoint is a DAV resource
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(crate::health_check))
        .fallback(handle_dav)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_dav(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let path = match urlencoding::decode(parts.uri.path()) {
        Ok(decoded) => trim_path(&decoded).to_string(),
        Err(e) => {
            return DavError::bad_request(format!("request path is not valid UTF-8: {}", e)).into_response()
        }
    };
    debug!(method = %parts.method, path = %path, "dav request");

    let ctx = RequestContext {
        method: parts.method,
        path,
        headers: parts.headers,
        user: state.config.dav_user.clone(),
    };

    let stream = body.into_data_stream().map_err(std::io::Error::other);
    let reader: DataStream = Box::new(StreamReader::new(stream));

    match state.server.handle(&ctx, reader).await {
        Ok(response) => render(response),
        Err(err) => err.into_response(),
    }
}

/// Content streams are passed through; property listings become JSON
fn render(response: DavResponse) -> Response {
    let DavResponse {
        status,
        headers,
        body,
        properties,
    } = response;

    let mut http = match (body, properties) {
        (Some(body), _) => Body::from_stream(ReaderStream::new(body)).into_response(),
        (None, Some(properties)) => Json(properties).into_response(),
        (None, None) => Body::empty().into_response(),
    };
    *http.status_mut() = status;
    http.headers_mut().extend(headers);
    http
}
