use anyhow::Context;
use bedside_lamp_bridge::domain::settings::SettingsService;
use bedside_lamp_bridge::infrastructure::bluetooth::btle::{BtleTransport, LampCharacteristics};
use bedside_lamp_bridge::infrastructure::logging;
use bedside_lamp_bridge::presentation::http;
use bedside_lamp_bridge::{DeviceAddress, LampController};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // optional first argument: path to a settings file
    let settings_service = match std::env::args_os().nth(1) {
        Some(path) => SettingsService::from_path(PathBuf::from(path)),
        None => SettingsService::new()?,
    };
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)?;
    info!("Starting bedside lamp bridge");
    info!("Using settings from {}", settings_service.path().display());

    let address = DeviceAddress::new(settings.device_address.clone())?;
    let characteristics = LampCharacteristics::from_strings(
        &settings.notify_char_uuid,
        &settings.control_char_uuid,
    )?;
    let transport = BtleTransport::new(characteristics).await?;
    let controller = Arc::new(LampController::new(
        transport,
        address,
        settings.connection_config(),
    ));

    if settings.connect_on_startup {
        if let Err(e) = controller.connect().await {
            warn!("Initial connection failed, will retry on first request: {}", e);
        }
    }

    let ip: IpAddr = settings
        .http_bind_address
        .parse()
        .with_context(|| format!("invalid http_bind_address {:?}", settings.http_bind_address))?;
    let addr = SocketAddr::new(ip, settings.http_port);

    http::serve(controller.clone(), addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await?;

    if let Err(e) = controller.disconnect().await {
        warn!("Disconnect on shutdown failed: {}", e);
    }
    Ok(())
}
