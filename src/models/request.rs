use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;
use url::Url;

use crate::storage::DataStream;
use crate::utils::path::trim_path;

pub const OC_CHUNKED: &str = "oc-chunked";
pub const OC_TOTAL_LENGTH: &str = "oc-total-length";
pub const X_EXPECTED_ENTITY_LENGTH: &str = "x-expected-entity-length";
pub const X_OC_MTIME: &str = "x-oc-mtime";
pub const OC_FILEID: &str = "oc-fileid";
pub const OC_ETAG: &str = "oc-etag";
pub const DESTINATION: &str = "destination";
pub const OVERWRITE: &str = "overwrite";

/// Properties keyed by Clark notation, e.g. `{http://owncloud.org/ns}id`
pub type PropertyMap = BTreeMap<String, serde_json::Value>;

/// Everything an operation may need to know about the inbound request.
///
/// Built once per request by the HTTP layer and passed explicitly to every
/// node, tree and plugin operation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    /// View-relative path of the request target, percent-decoded
    pub path: String,
    pub headers: HeaderMap,
    pub user: String,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            user: user.into(),
        }
    }

    /// Builder-style header insertion, mostly useful in tests
    pub fn with_header(mut self, name: &'static str, value: impl AsRef<str>) -> Self {
        match HeaderValue::from_str(value.as_ref()) {
            Ok(value) => {
                self.headers.insert(HeaderName::from_static(name), value);
            }
            Err(e) => warn!("Dropping invalid value for header {}: {}", name, e),
        }
        self
    }

    pub fn is_method(&self, name: &str) -> bool {
        self.method.as_str().eq_ignore_ascii_case(name)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn numeric_header(&self, name: &str) -> Option<u64> {
        self.header(name).and_then(|v| v.parse::<u64>().ok())
    }

    pub fn is_chunked(&self) -> bool {
        self.header(OC_CHUNKED).is_some()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.numeric_header(axum::http::header::CONTENT_LENGTH.as_str())
    }

    pub fn expected_entity_length(&self) -> Option<u64> {
        self.numeric_header(X_EXPECTED_ENTITY_LENGTH)
    }

    pub fn total_length(&self) -> Option<u64> {
        self.numeric_header(OC_TOTAL_LENGTH)
    }

    /// Length used for quota admission.
    ///
    /// Prefers `X-Expected-Entity-Length` over `Content-Length`; when an
    /// `OC-Total-Length` is present as well the larger of the two wins.
    pub fn declared_length(&self) -> u64 {
        let length = self
            .expected_entity_length()
            .filter(|l| *l > 0)
            .or_else(|| self.content_length())
            .unwrap_or(0);
        match self.total_length() {
            Some(total) if length > 0 => length.max(total),
            _ => length,
        }
    }

    /// Client supplied modification time (`X-OC-MTime`, unix seconds)
    pub fn modification_time(&self) -> Option<DateTime<Utc>> {
        let raw = self.header(X_OC_MTIME)?;
        let seconds = raw.parse::<i64>().ok()?;
        Utc.timestamp_opt(seconds, 0).single()
    }

    /// View-relative target of a MOVE or COPY.
    ///
    /// Clients send either an absolute URL or an absolute path; both are
    /// reduced to a percent-decoded path without surrounding slashes.
    pub fn destination(&self) -> Option<String> {
        let raw = self.header(DESTINATION)?;
        let encoded = match Url::parse(raw) {
            Ok(url) => url.path().to_string(),
            Err(_) => raw.to_string(),
        };
        let decoded = match urlencoding::decode(&encoded) {
            Ok(decoded) => decoded.into_owned(),
            Err(e) => {
                warn!("Destination {} is not valid UTF-8 once decoded: {}", raw, e);
                return None;
            }
        };
        Some(trim_path(&decoded).to_string())
    }

    /// `Overwrite` defaults to true when the header is absent
    pub fn overwrite(&self) -> bool {
        !matches!(self.header(OVERWRITE), Some(v) if v.eq_ignore_ascii_case("F"))
    }
}

/// Response under construction while a request travels through the pipeline
pub struct DavResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<DataStream>,
    pub properties: Option<PropertyMap>,
}

impl Default for DavResponse {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl DavResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
            properties: None,
        }
    }

    pub fn set_header(&mut self, name: &'static str, value: impl AsRef<str>) {
        match HeaderValue::from_str(value.as_ref()) {
            Ok(value) => {
                self.headers.insert(HeaderName::from_static(name), value);
            }
            Err(e) => warn!("Refusing to emit invalid {} header: {}", name, e),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl std::fmt::Debug for DavResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DavResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .field("properties", &self.properties)
            .finish()
    }
}
