use std::path::PathBuf;

use azure_iot_file_upload::{DeviceAgent, DeviceSettings, HttpBlobTransfer};
use log::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = dotenv::dotenv() {
        warn!("No .env file loaded: {}", err);
    }

    info!("Starting app");

    let settings = DeviceSettings::from_env()?;
    let client = settings.client_builder()?.build()?;
    let transfer = HttpBlobTransfer::new()?;

    let mut files: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if files.is_empty() {
        files.push(PathBuf::from("testfile1.txt"));
    }

    let mut agent = DeviceAgent::new(client, transfer);
    agent
        .run(&files, async {
            info!("Press Ctrl-C to exit...");
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", err);
            }
        })
        .await?;

    Ok(())
}
