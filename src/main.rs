use std::sync::Arc;

use axum::http::HeaderName;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use umrahlink_backend::api::{self, AppState};
use umrahlink_backend::config::AppConfig;
use umrahlink_backend::database;
use umrahlink_backend::database::booking_repository::BookingRepository;
use umrahlink_backend::database::dispute_repository::DisputeRepository;
use umrahlink_backend::database::marketplace_repository::MarketplaceRepository;
use umrahlink_backend::database::payment_event_repository::PaymentEventRepository;
use umrahlink_backend::database::slot_repository::SlotRepository;
use umrahlink_backend::logging::init_tracing;
use umrahlink_backend::middleware::logging::{
    request_logging_middleware, UuidRequestId, REQUEST_ID_HEADER,
};
use umrahlink_backend::payments::{PaymentGateway, PesapalClient};
use umrahlink_backend::services::booking_lifecycle::BookingLifecycleService;
use umrahlink_backend::services::dispute_resolution::DisputeResolutionService;
use umrahlink_backend::services::notification::NotificationService;
use umrahlink_backend::services::payment_flow::PaymentFlowService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    config.validate()?;

    let pool = database::init_pool_from_config(&config.database).await?;

    let bookings = Arc::new(BookingRepository::new(pool.clone()));
    let slots = Arc::new(SlotRepository::new(pool.clone()));
    let marketplace = Arc::new(MarketplaceRepository::new(pool.clone()));
    let payment_events = Arc::new(PaymentEventRepository::new(pool.clone()));
    let disputes_repo = Arc::new(DisputeRepository::new(pool.clone()));

    let notifications = Arc::new(NotificationService::new(marketplace.clone()));
    let gateway: Arc<dyn PaymentGateway> =
        Arc::new(PesapalClient::new(config.pesapal.clone())?);

    let lifecycle = Arc::new(BookingLifecycleService::new(
        pool.clone(),
        bookings.clone(),
        slots.clone(),
        marketplace.clone(),
        notifications.clone(),
    ));
    let payments = Arc::new(PaymentFlowService::new(
        pool.clone(),
        bookings.clone(),
        slots.clone(),
        marketplace.clone(),
        payment_events,
        notifications.clone(),
        gateway,
        config.pesapal.clone(),
    ));
    let disputes = Arc::new(DisputeResolutionService::new(
        pool.clone(),
        disputes_repo,
        bookings,
        slots,
        marketplace,
        notifications,
    ));

    let state = AppState {
        lifecycle,
        payments,
        disputes,
        pool,
    };

    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);
    let app = api::router(state)
        .layer(axum::middleware::from_fn(request_logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, UuidRequestId));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {}", err);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, draining connections");
}
