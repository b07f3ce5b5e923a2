//! Application startup and lifecycle management.

use crate::config::{AgencyConfig, NumberingConfig, StorageBackend};
use crate::handlers::{clients, health, invoices, numbers, quotes};
use crate::middleware::metrics_middleware;
use crate::numbering::{NumberAllocator, NumberingStrategy, RetryingAllocator, SequenceAllocator};
use crate::services::{
    init_metrics, Clock, DocumentService, DocumentStore, MemoryStore, PgStore, SystemClock,
};
use crate::workers::OverdueSweeper;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::tracing::request_id_middleware;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: AgencyConfig,
    pub service: Arc<DocumentService>,
}

/// Wire a store into a [`DocumentService`] using the configured numbering
/// strategy.
pub fn document_service<S>(
    store: Arc<S>,
    numbering: &NumberingConfig,
    clock: Arc<dyn Clock>,
) -> DocumentService
where
    S: DocumentStore + 'static,
{
    let allocator: Arc<dyn NumberAllocator> = match numbering.strategy {
        NumberingStrategy::Sequence => Arc::new(SequenceAllocator::new(store.clone())),
        NumberingStrategy::Retry => Arc::new(
            RetryingAllocator::new(store.clone())
                .with_max_attempts(numbering.max_attempts)
                .with_retry_delay(numbering.retry_delay),
        ),
    };

    DocumentService::new(store, allocator, clock).with_max_insert_attempts(numbering.max_attempts)
}

/// HTTP router with every route and the shared middleware stack.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/clients",
            post(clients::create_client).get(clients::list_clients),
        )
        .route(
            "/clients/:id",
            get(clients::get_client)
                .patch(clients::update_client)
                .delete(clients::delete_client),
        )
        .route("/quotes", post(quotes::create_quote).get(quotes::list_quotes))
        .route(
            "/quotes/:id",
            get(quotes::get_quote)
                .patch(quotes::update_quote)
                .delete(quotes::delete_quote),
        )
        .route("/quotes/:id/status", post(quotes::set_quote_status))
        .route("/quotes/:id/convert", post(quotes::convert_quote))
        .route(
            "/invoices",
            post(invoices::create_invoice).get(invoices::list_invoices),
        )
        .route("/invoices/mark-overdue", post(invoices::mark_overdue))
        .route(
            "/invoices/:id",
            get(invoices::get_invoice)
                .patch(invoices::update_invoice)
                .delete(invoices::delete_invoice),
        )
        .route(
            "/invoices/:id/payments",
            post(invoices::record_payment).get(invoices::list_payments),
        )
        .route("/numbers", post(numbers::allocate_number));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics_handler))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: AgencyConfig) -> Result<Self, AppError> {
        init_metrics();

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let service = match config.storage {
            StorageBackend::Postgres => {
                let database = config.database.as_ref().ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "Database settings are required for the postgres backend"
                    ))
                })?;

                let store = PgStore::new(
                    &database.url,
                    database.max_connections,
                    database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;

                store.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    e
                })?;

                document_service(Arc::new(store), &config.numbering, clock)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; data is lost on restart");
                document_service(Arc::new(MemoryStore::new()), &config.numbering, clock)
            }
        };

        let state = AppState {
            config: config.clone(),
            service: Arc::new(service),
        };

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(
            http_port = http_port,
            storage = ?config.storage,
            numbering_strategy = config.numbering.strategy.as_str(),
            "Agency service listener bound"
        );

        Ok(Self {
            http_port,
            http_listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn service(&self) -> &Arc<DocumentService> {
        &self.state.service
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests and stop
    /// the overdue sweeper.
    pub async fn run_until_stopped<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sweeper = self
            .state
            .config
            .overdue_sweep_interval
            .map(|interval| OverdueSweeper::new(self.state.service.clone(), interval))
            .map(|sweeper| (sweeper.shutdown_token(), sweeper.start()));

        tracing::info!(
            service = %self.state.config.service_name,
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        let router = build_router(self.state);
        let result = axum::serve(self.http_listener, router)
            .with_graceful_shutdown(shutdown)
            .await;

        if let Some((token, handle)) = sweeper {
            token.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Overdue sweeper did not stop cleanly");
            }
        }

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
