use sqlx::PgPool;
use std::sync::Arc;

use crate::ai::gateway::{GatewayConfig, LanguageGateway};
use crate::auth::{AuthConfig, AuthService};
use crate::relay::{RelayConfig, StreamRelay};

/// Process configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    pub relay: Option<RelayConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3080);

        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?;

        let relay = match std::env::var("RESUME_RELAY").as_deref() {
            Ok("off") | Ok("0") | Ok("false") => {
                tracing::warn!("Resumable streams are disabled via RESUME_RELAY");
                None
            }
            _ => Some(RelayConfig::default()),
        };

        Ok(Self {
            port,
            database_url,
            gateway: GatewayConfig::from_env()?,
            auth: AuthConfig::from_env(),
            relay,
        })
    }
}

/// Per-process request context. Constructed once in main and handed to the
/// router; handlers never reach for globals.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub auth: AuthService,
    pub gateway: LanguageGateway,
    pub relay: Option<Arc<StreamRelay>>,
}

impl AppState {
    pub fn new(config: &AppConfig, pool: PgPool) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let gateway = LanguageGateway::new(config.gateway.clone())?;
        let relay = config
            .relay
            .as_ref()
            .map(|relay_config| Arc::new(StreamRelay::new(relay_config.clone())));

        Ok(Self {
            pool,
            auth: AuthService::new(config.auth.clone()),
            gateway,
            relay,
        })
    }
}
