use crate::cli::ServeArgs;
use crate::infra::{seed_demo_city, AppState};
use crate::routes::with_dispatch_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use roadside_dispatch::config::AppConfig;
use roadside_dispatch::dispatch::{BroadcastHub, DispatchApi, InMemoryStore};
use roadside_dispatch::error::AppError;
use roadside_dispatch::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
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
    };

    let store = Arc::new(InMemoryStore::new());
    if args.seed_demo {
        seed_demo_city(&store);
        info!("demo city seeded");
    }
    let hub = Arc::new(BroadcastHub::default());
    let api = DispatchApi::new(store, hub, &config.dispatch);

    let app = with_dispatch_routes(api)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        radius_km = config.dispatch.matching.radius_km,
        max_candidates = config.dispatch.matching.limit,
        "roadside dispatch ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
