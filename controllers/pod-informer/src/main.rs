//! Pod Informer Controller
//!
//! Watches pods (or services, or deployments) in one namespace and logs
//! every add, update and delete through a rate-limited work queue.
//!
//! Runs until Ctrl-C, then drains in-flight work before exiting.

mod config;
mod controller;
mod error;
mod reconciler;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    info!("Starting Pod Informer Controller");

    // Load configuration from environment variables
    let config = Config::from_env()?;
    config.log();

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                signal.cancel();
            }
            Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
        }
    });

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    controller.run(shutdown).await?;

    Ok(())
}
