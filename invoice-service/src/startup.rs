//! Application startup and lifecycle management.

use crate::config::InvoiceConfig;
use crate::services::{
    get_metrics, init_metrics, Cache, Database, LimitInvoiceService, LocalCache, RedisCache,
};
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: InvoiceConfig,
    pub db: Arc<Database>,
    pub limits: LimitInvoiceService,
}

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    db: Arc<Database>,
    cache: Arc<dyn Cache>,
}

impl HealthState {
    async fn check(&self) -> Result<(), AppError> {
        self.db.health_check().await?;
        self.cache
            .health_check()
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Cache unavailable: {}", e)))
    }
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "invoice-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "invoice-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.check().await {
        Ok(_) => {
            tracing::debug!("Readiness check passed");
            StatusCode::OK
        }
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = get_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Pick the limit cache backend from configuration.
async fn build_cache(config: &InvoiceConfig) -> Result<Arc<dyn Cache>, AppError> {
    match &config.cache.redis_url {
        Some(url) => {
            let cache = RedisCache::new(url).await.map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to Redis");
                AppError::InternalError(anyhow::anyhow!("Failed to connect to Redis: {}", e))
            })?;
            Ok(Arc::new(cache))
        }
        None => {
            tracing::info!("REDIS_URL not configured - using process-local limit cache");
            Ok(Arc::new(LocalCache::new()))
        }
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: InvoiceConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: InvoiceConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: InvoiceConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let cache = build_cache(&config).await?;
        let limits = LimitInvoiceService::new(cache, config.cache.limit_ttl);

        let state = AppState {
            config: config.clone(),
            db: Arc::new(db),
            limits,
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Invoice service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Get the credit-limit evaluator.
    pub fn limits(&self) -> &LimitInvoiceService {
        &self.state.limits
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let health_state = HealthState {
            db: self.state.db.clone(),
            cache: self.state.limits.cache().clone(),
        };

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(health_state);

        tracing::info!(
            service = "invoice-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
