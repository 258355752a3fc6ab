//! # Resource Sample
//!
//! Starts the application against the configured resources and walks one user
//! through its whole life:
//!
//! 1. Create "Ann".
//! 2. Read her back.
//! 3. Rename her, leaving the email alone.
//! 4. Delete her, then confirm she is gone.
//!
//! With `WAIT_FOR_SIGNAL=true` the process then stays up until SIGINT or SIGTERM
//! before closing its resources.
//!
//! Configuration comes from the environment (see [`AppConfig`]); `RUST_LOG`
//! overrides the configured log level.

use resource_framework::tracing::try_setup_tracing;
use resource_sample::config::AppConfig;
use resource_sample::lifecycle::{shutdown_signal, App};
use resource_sample::model::{UserCreate, UserUpdate};
use resource_sample::services::{UserError, UserService};
use tracing::{error, info, warn, Instrument};

#[tokio::main]
async fn main() -> Result<(), String> {
    let config = AppConfig::from_env();
    try_setup_tracing(&config.log).map_err(|e| e.to_string())?;

    info!(app = %config.app_name, env = ?config.env, "Starting application");

    let app = App::start(config).await.map_err(|e| e.to_string())?;
    info!(message = %app.ping_message(), "Ping");

    let span = tracing::info_span!("user_lifecycle");
    let outcome = run_user_lifecycle(app.users()).instrument(span).await;
    if let Err(e) = &outcome {
        error!(error = %e, "User lifecycle failed");
    }

    let readiness = app.readiness().await;
    for check in &readiness.checks {
        info!(
            resource = %check.name,
            status = ?check.status,
            duration_ms = check.duration_ms,
            "Health check"
        );
    }

    let report = if app.config().wait_for_signal {
        app.shutdown_on(shutdown_signal()).await
    } else {
        app.shutdown().await
    };
    if !report.is_clean() {
        warn!(failed = report.failed.len(), timed_out = report.timed_out.len(), "Unclean shutdown");
    }

    outcome.map_err(|e| e.to_string())?;
    info!("Application completed successfully");
    Ok(())
}

async fn run_user_lifecycle(users: &UserService) -> Result<(), UserError> {
    let ann = users
        .create(UserCreate {
            name: "Ann".to_string(),
            email: "ann@x.com".to_string(),
        })
        .await?;
    info!(user_id = %ann.id, "User created successfully");

    let fetched = users.get_by_id(&ann.id).await?;
    info!(user_id = %fetched.id, name = %fetched.name, "User fetched");

    let renamed = users
        .update(
            &ann.id,
            UserUpdate {
                name: Some("Ann2".to_string()),
                email: None,
            },
        )
        .await?;
    info!(name = %renamed.name, email = %renamed.email, "User updated");

    users.delete(&ann.id).await?;
    match users.get_by_id(&ann.id).await {
        Err(UserError::NotFound) => info!(user_id = %ann.id, "User is gone after delete"),
        Ok(_) => warn!(user_id = %ann.id, "User still readable after delete"),
        Err(e) => return Err(e),
    }
    Ok(())
}
