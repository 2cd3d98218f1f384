use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::models::config::LoggingConfig;

pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    // Create logs directory
    std::fs::create_dir_all("logs")?;

    let default_filter = config.level.clone();

    // Build the subscriber
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(true),
        )
        .with(
            fmt::layer()
                .with_writer(|| {
                    std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open("logs/hostwatch.log")
                        .unwrap_or_else(|_| std::fs::File::create("/dev/null").unwrap())
                })
                .with_ansi(false)
                .json(),
        );

    subscriber.init();

    info!("Logging initialized");
    Ok(())
}
