use std::net::SocketAddr;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;

/// Install the Prometheus recorder and serve the scrape endpoint until the
/// service's shutdown signal fires. The recorder stays installed for the
/// life of the process; only the listener is torn down, like every other
/// task hanging off the shutdown channel.
pub fn init(bind_addr: &str, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let addr: SocketAddr = bind_addr.parse()?;

    tokio::spawn(async move {
        let app = Router::new().route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(error = %e, %addr, "failed to bind metrics listener");
                return;
            }
        };

        tracing::info!(%addr, "metrics endpoint listening");
        let served = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await;
        if let Err(e) = served {
            tracing::error!(error = %e, "metrics server error");
        }
    });

    Ok(())
}
