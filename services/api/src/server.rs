use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum_prometheus::PrometheusMetricLayer;
use performance_engine::config::AppConfig;
use performance_engine::telemetry;
use tracing::info;

use crate::cli::ServeArgs;
use crate::error::ApiError;
use crate::infra::{build_context, AppState};
use crate::routes::router;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), ApiError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        engine: Arc::new(build_context(&config.engine, args.demo)),
    };

    let app = router(app_state).layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, demo = args.demo, "performance scoring service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
