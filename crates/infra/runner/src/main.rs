//! Relay DLQ runner binary.

use relay_dlq::cancellation;
use relay_dlq_runner::{load_config, DlqRunner, RunnerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => load_config(&path)?,
        None => RunnerConfig::default(),
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(config.runner.level()?)
        .init();

    let runner = DlqRunner::new(config);
    let (handle, cancel) = cancellation();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
        }
        handle.cancel();
    });

    runner.run(cancel).await;

    Ok(())
}
