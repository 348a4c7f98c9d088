//! Web layer module
//!
//! Read-mostly admin surface over the [`Scheduler`]: task overviews, job
//! details and running jobs, plus one route to start a run. Handlers are thin
//! and map [`crate::errors::SchedulerError`] variants onto HTTP status codes.

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::WebConfig,
    scheduler::{ScheduleTable, Scheduler},
    tasks::DataStore,
};

pub mod api;

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new<S: DataStore>(config: &WebConfig, state: AppState<S>) -> Result<Self> {
        let app = Self::create_router(state);
        let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

        Ok(Self { app, addr })
    }

    /// Create the router with all routes and middleware
    pub fn create_router<S: DataStore>(state: AppState<S>) -> Router {
        Router::new()
            .route("/health", get(api::health::<S>))
            .nest("/api/v1", Self::api_v1_routes())
            // Middleware (applied in reverse order)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    fn api_v1_routes<S: DataStore>() -> Router<AppState<S>> {
        Router::new()
            // Registered tasks and their latest job
            .route("/tasks", get(api::list_tasks::<S>))
            .route("/tasks/:name", get(api::get_task::<S>))
            .route("/tasks/:name/run", post(api::run_task::<S>))
            // Jobs
            .route("/jobs/running", get(api::running_jobs::<S>))
            .route("/jobs/:id", get(api::get_job::<S>))
    }

    /// Start the web server; returns once `shutdown` resolves
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// Application state shared across all handlers
pub struct AppState<S> {
    pub scheduler: Scheduler<S>,
    pub schedules: Arc<ScheduleTable>,
}

impl<S> AppState<S> {
    pub fn new(scheduler: Scheduler<S>, schedules: Arc<ScheduleTable>) -> Self {
        Self {
            scheduler,
            schedules,
        }
    }
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
            schedules: Arc::clone(&self.schedules),
        }
    }
}
