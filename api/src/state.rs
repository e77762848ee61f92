use std::sync::Arc;

use sqlx::PgPool;

use crate::config::EngineConfig;
use crate::engine::provider::CompletionProvider;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub provider: Arc<dyn CompletionProvider>,
    pub config: EngineConfig,
}
