// Inkpulse engagement server

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use inkpulse::app_state::AppState;
use inkpulse::config::Config;
use inkpulse::http::router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize application state
    let app_state = AppState::new(config.clone()).await?;

    // Periodically move cached view deltas into the durable base counts
    if config.flush.interval_secs > 0 {
        let views = app_state.views.clone();
        let period = Duration::from_secs(config.flush.interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = views.flush_views().await {
                    warn!("View flush failed: {}", e);
                }
            }
        });
        info!(
            "View flush scheduled every {}s",
            config.flush.interval_secs
        );
    } else {
        info!("View flush disabled; deltas stay in the cache");
    }

    let app = router(app_state);

    // Start server
    let addr = config.server_address();
    info!("Inkpulse server starting on http://{}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
