//! Runs the file upload notification loop against the hub

use azure_iot_file_upload::{
    AmqpFileNotificationReceiver, FileUploadNotification, HandlerError, NotificationListener,
    ServiceConnectionString,
};
use clap::Parser;
use log::info;
use tokio_util::sync::CancellationToken;

/// Receive file upload notifications
#[derive(Debug, Parser)]
#[command(about, long_about = None)]
struct Args {
    /// IoT hub service connection string
    connection_string: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Exits with usage and status 2 when the connection string is missing
    let args = Args::parse();
    let connection: ServiceConnectionString = args.connection_string.parse()?;
    info!(
        "Receive file upload notifications for {} as {}",
        connection.host_name, connection.policy_name
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
        }
        shutdown.cancel();
    });

    let receiver = AmqpFileNotificationReceiver::connect(&connection).await?;
    let handler = |notification: &FileUploadNotification| -> Result<(), HandlerError> {
        info!(
            "Received file upload notification: {} ({} bytes) from {}",
            notification.blob_name, notification.blob_size_in_bytes, notification.device_id
        );
        Ok(())
    };

    let mut listener = NotificationListener::new(receiver, handler);
    let result = listener.run(cancel).await;
    let (receiver, _) = listener.into_parts();
    receiver.close().await?;

    info!("Completed {} notifications", result?);
    Ok(())
}
