//! # Application Lifecycle
//!
//! [`App`] owns the process-wide resources and the services built on them.
//!
//! ## Startup
//!
//! 1. Build the [`DocumentDatabase`] and [`Cache`] resources from [`AppConfig`].
//! 2. Connect both concurrently through a [`ResourceManager`]. Any failure is fatal:
//!    whatever did connect is closed again and the error is returned.
//! 3. Wire the configured [`UserRepository`] backend. The document backend creates
//!    its indexes here.
//! 4. Build the [`UserService`] over that repository.
//!
//! ## Shutdown
//!
//! [`App::shutdown`] closes every resource concurrently within the configured
//! shutdown timeout. It never fails; problems are logged and returned in the
//! [`ShutdownReport`]. [`App::shutdown_on`] waits for a stop signal first, such
//! as [`shutdown_signal`].
//!
//! ```rust
//! use resource_sample::config::AppConfig;
//! use resource_sample::lifecycle::App;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = App::start(AppConfig::default()).await?;
//!     assert!(app.readiness().await.is_ready());
//!     assert_eq!(app.ping_message(), "pong from resource-sample");
//!
//!     let report = app.shutdown().await;
//!     assert!(report.is_clean());
//!     Ok(())
//! }
//! ```

use crate::config::{AppConfig, RepositoryBackend};
use crate::resources::{Cache, DocumentDatabase};
use crate::services::UserService;
use crate::user_repository::{
    DocumentUserRepository, InMemoryUserRepository, UserRepository, USERS_COLLECTION,
};
use resource_framework::{
    LifecycleError, ReadinessReport, RepositoryError, Resource, ResourceError, ResourceManager,
    ShutdownReport,
};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("resource initialization failed: {0}")]
    Resources(#[from] LifecycleError),

    #[error("resource unavailable after connect: {0}")]
    Resource(#[from] ResourceError),

    #[error("repository setup failed: {0}")]
    Repository(#[from] RepositoryError),
}

pub struct App {
    config: AppConfig,
    database: Arc<DocumentDatabase>,
    cache: Arc<Cache>,
    manager: ResourceManager,
    users: UserService,
}

impl App {
    #[instrument(name = "app.start", skip_all, fields(app = %config.app_name, env = ?config.env))]
    pub async fn start(config: AppConfig) -> Result<Self, StartupError> {
        let database = Arc::new(DocumentDatabase::new(config.database.clone()));
        let cache = Arc::new(Cache::new(config.cache.clone()));
        let resources = vec![
            Arc::clone(&database) as Arc<dyn Resource>,
            Arc::clone(&cache) as Arc<dyn Resource>,
        ];
        let manager = ResourceManager::new(resources).with_shutdown_timeout(config.shutdown_timeout);

        connect_or_rollback(&manager).await?;

        let repo = match wire_repository(&config, &database).await {
            Ok(repo) => repo,
            Err(e) => {
                error!(error = %e, "Startup aborted");
                manager.close_all().await;
                return Err(e);
            }
        };

        info!(backend = ?config.repository, "Application started");
        Ok(Self {
            config,
            database,
            cache,
            manager,
            users: UserService::new(repo),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn database(&self) -> &Arc<DocumentDatabase> {
        &self.database
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn users(&self) -> &UserService {
        &self.users
    }

    pub fn ping_message(&self) -> String {
        format!("pong from {}", self.config.app_name)
    }

    /// Pings every resource; ready only when all of them answer.
    pub async fn readiness(&self) -> ReadinessReport {
        self.manager.check_all().await
    }

    #[instrument(name = "app.shutdown", skip_all)]
    pub async fn shutdown(self) -> ShutdownReport {
        info!("Shutting down");
        self.manager.close_all().await
    }

    /// Keeps the resources open until `signal` completes, then shuts down.
    pub async fn shutdown_on<F>(self, signal: F) -> ShutdownReport
    where
        F: Future<Output = ()>,
    {
        info!("Waiting for shutdown signal");
        signal.await;
        self.shutdown().await
    }
}

/// Completes on Ctrl-C, or on SIGTERM where the platform has it.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(signal = "SIGINT", "Shutdown signal received"),
        _ = terminate => info!(signal = "SIGTERM", "Shutdown signal received"),
    }
}

/// Connects every managed resource. On failure the ones that did connect are
/// closed again before the error is returned.
pub async fn connect_or_rollback(manager: &ResourceManager) -> Result<(), LifecycleError> {
    match manager.connect_all().await {
        Ok(_) => Ok(()),
        Err(e) => {
            error!(error = %e, "Startup aborted");
            manager.close_all().await;
            Err(e)
        }
    }
}

async fn wire_repository(
    config: &AppConfig,
    database: &DocumentDatabase,
) -> Result<Arc<dyn UserRepository>, StartupError> {
    match config.repository {
        RepositoryBackend::Document => {
            let repo = DocumentUserRepository::new(database.collection(USERS_COLLECTION)?, config.id_policy);
            repo.ensure_indexes().await?;
            let repo: Arc<dyn UserRepository> = Arc::new(repo);
            Ok(repo)
        }
        RepositoryBackend::Memory => {
            let repo: Arc<dyn UserRepository> = Arc::new(InMemoryUserRepository::new());
            Ok(repo)
        }
    }
}
