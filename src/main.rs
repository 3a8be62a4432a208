use log::error;
use std::error::Error;
use tokio::sync::broadcast;

use keba_bridge::prelude::*;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn Error + Send + Sync>> {
    let options = Options::new();

    // Create a channel for shutdown signaling
    let (shutdown_tx, _) = broadcast::channel(1);

    // Handle Ctrl+C
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        if let Err(e) = shutdown_tx_clone.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    });

    // Stop after --time seconds if asked to
    if let Some(runtime) = options.runtime {
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(runtime)).await;
            let _ = shutdown_tx_clone.send(());
        });
    }

    // Run the application
    let app_handle = tokio::spawn(keba_bridge::app(shutdown_tx.subscribe(), options));

    // Wait for the application to complete
    if let Err(e) = app_handle.await? {
        error!("Application error: {}", e);
        std::process::exit(255);
    }

    Ok(())
}
