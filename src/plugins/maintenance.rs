use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::ServerPlugin;
use crate::errors::{DavError, DavResult};
use crate::models::RequestContext;
use crate::services::dav::Tree;

/// Instance-wide switches that take the DAV endpoint offline
#[derive(Debug, Default)]
pub struct SystemStatus {
    maintenance: AtomicBool,
    upgrade_pending: AtomicBool,
}

impl SystemStatus {
    pub fn new(maintenance: bool, upgrade_pending: bool) -> Self {
        Self {
            maintenance: AtomicBool::new(maintenance),
            upgrade_pending: AtomicBool::new(upgrade_pending),
        }
    }

    pub fn in_maintenance(&self) -> bool {
        self.maintenance.load(Ordering::SeqCst)
    }

    pub fn set_maintenance(&self, enabled: bool) {
        self.maintenance.store(enabled, Ordering::SeqCst);
    }

    pub fn upgrade_pending(&self) -> bool {
        self.upgrade_pending.load(Ordering::SeqCst)
    }

    pub fn set_upgrade_pending(&self, pending: bool) {
        self.upgrade_pending.store(pending, Ordering::SeqCst);
    }
}

pub struct MaintenancePlugin {
    status: Arc<SystemStatus>,
}

impl MaintenancePlugin {
    pub const PRIORITY: i32 = 10;

    pub fn new(status: Arc<SystemStatus>) -> Self {
        Self { status }
    }
}

#[async_trait]
impl ServerPlugin for MaintenancePlugin {
    fn name(&self) -> &'static str {
        "maintenance"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    async fn before_method(&self, ctx: &RequestContext, _tree: &mut Tree) -> DavResult<()> {
        if self.status.in_maintenance() {
            debug!(method = %ctx.method, "rejecting request during maintenance");
            return Err(DavError::system_unavailable("System in maintenance mode."));
        }
        if self.status.upgrade_pending() {
            return Err(DavError::system_unavailable("Upgrade needed"));
        }
        Ok(())
    }
}
