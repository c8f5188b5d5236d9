pub mod config;
pub mod error;

pub use config::{Config, RegionChoice, ValidationResult};
pub use error::{
    AppError, ConfigError, DatabaseError, ForecastDataError, NetworkError, ReqwestErrorExt,
    RusqliteErrorExt,
};

use anyhow::Result;

/// Initialize logging for the application
pub fn init() -> Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    tracing::info!("Tenki core initialized");
    Ok(())
}
