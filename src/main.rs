use tracing_subscriber::EnvFilter;

use chat_relay::state::AppConfig;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(chat_relay::run(config)) {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
