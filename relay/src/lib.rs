pub mod app;
pub mod background;
pub mod config;
pub mod hub;
pub mod server;

use config::AppConfig;

/// Load .env from multiple candidate paths.
pub fn load_dotenv() {
    let candidates = [".env", "../.env", "../../.env"];
    for path in &candidates {
        if dotenvy::from_filename(path).is_ok() {
            tracing::info!("Loaded .env from: {path}");
            return;
        }
    }
    tracing::info!("No .env file found, using system environment variables");
}

/// Load and validate runtime configuration. Errors here are fatal.
pub fn init_config() -> Result<AppConfig, anyhow::Error> {
    load_dotenv();

    let config = AppConfig::load()?;
    tracing::info!(
        channels = ?config.channels,
        anonymous = config.is_anonymous(),
        buffer_capacity = config.channel_buffer_capacity,
        queue_capacity = config.subscriber_queue_capacity,
        "Configuration loaded"
    );
    Ok(config)
}
