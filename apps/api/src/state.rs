use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::discovery::audit::AuditRecorder;
use crate::discovery::store::SkillStore;
use crate::discovery::DiscoveryService;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Pool backing the Pg store/recorder; kept for future admin queries.
    #[allow(dead_code)]
    pub db: PgPool,
    pub discovery: Arc<DiscoveryService>,
    /// Same store the discovery service writes through; handlers read from it
    /// directly for candidate lookups and the pending list.
    pub store: Arc<dyn SkillStore>,
    pub audit: Arc<dyn AuditRecorder>,
    pub config: Config,
}
