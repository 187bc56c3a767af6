//! Interview Vision - Main Entry Point

use api::{init_logging, metrics, run_server, AppState, Settings};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;
    init_logging(&settings.logging);

    info!("=== Interview Vision v{} ===", env!("CARGO_PKG_VERSION"));
    settings.engagement.validate()?;

    let metrics_handle = if settings.metrics.enabled {
        match metrics::init_metrics() {
            Ok(handle) => {
                info!("Prometheus metrics enabled at /metrics");
                Some(handle)
            }
            Err(e) => {
                warn!("Metrics disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    match &settings.camera.device {
        Some(device) => info!("Live preview source: {}", device),
        None => info!("No live preview source configured"),
    }

    let state = match AppState::new(settings, metrics_handle) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to load detection models: {}", e);
            return Err(e.into());
        }
    };

    run_server(state).await?;
    info!("Server stopped");
    Ok(())
}
