use async_trait::async_trait;
use tracing::{debug, error};

use super::ServerPlugin;
use crate::errors::{AppError, DavError};
use crate::models::RequestContext;

/// Severity a failed request is logged with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Fatal,
}

/// Failures that are part of normal client behaviour.
///
/// Sync clients probe for files with requests that end in NotFound, and
/// when two clients upload the same file at once one of them loses with
/// PreconditionFailed.
pub fn classify(err: &DavError) -> LogLevel {
    match err {
        DavError::NotAuthenticated
        | DavError::NotFound { .. }
        | DavError::PreconditionFailed { .. } => LogLevel::Debug,
        _ => LogLevel::Fatal,
    }
}

pub struct ExceptionLoggerPlugin {
    app_name: String,
}

impl ExceptionLoggerPlugin {
    pub const PRIORITY: i32 = 200;

    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }
}

#[async_trait]
impl ServerPlugin for ExceptionLoggerPlugin {
    fn name(&self) -> &'static str {
        "exception-logger"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    async fn on_exception(&self, ctx: &RequestContext, err: &DavError) {
        let status = err.status_code().as_u16();
        match classify(err) {
            LogLevel::Debug => debug!(
                app = %self.app_name,
                method = %ctx.method,
                path = %ctx.path,
                status,
                "{}",
                err
            ),
            LogLevel::Fatal => error!(
                app = %self.app_name,
                method = %ctx.method,
                path = %ctx.path,
                status,
                code = err.error_code(),
                "{:?}",
                err
            ),
        }
    }
}
