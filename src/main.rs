mod config;
mod connection;
mod error;
mod ota;
mod poller;
mod router;
mod transport;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use config::LinkConfig;
use connection::{ConnectionManager, EventReceiver, LinkEvent};
use keypad_link_shared::{codec, OutboundKind, TransportKind};
use ota::{OtaEvent, OtaUploader};
use router::DeviceEvent;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "keypad-link")]
#[command(about = "Talk to the macropad over USB serial or Bluetooth LE", long_about = None)]
struct Cli {
    /// Link to use
    #[arg(short, long, value_enum, default_value_t = TransportArg::Serial)]
    transport: TransportArg,

    /// Serial port (defaults to the first USB serial port)
    #[arg(short, long)]
    port: Option<String>,

    /// BLE advertised name prefix
    #[arg(long, default_value = keypad_link_shared::ble::DEFAULT_NAME_PREFIX)]
    name_prefix: String,

    /// Known BLE address to try before scanning (repeatable)
    #[arg(long = "address")]
    addresses: Vec<String>,

    /// Poll the ambient light sensor every 10 s
    #[arg(long)]
    ambient_light: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum TransportArg {
    Serial,
    Ble,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Serial => TransportKind::Serial,
            TransportArg::Ble => TransportKind::Ble,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print everything the keypad sends until Ctrl-C
    Monitor,
    /// Send one JSON message
    Send {
        /// Message, e.g. '{"type":"backlight","on":true}'
        json: String,
        /// How long to keep listening for a reply
        #[arg(long, default_value_t = 2)]
        wait_secs: u64,
    },
    /// Upload a firmware file
    Ota {
        file: PathBuf,
        /// Name announced to the device (defaults to the file name)
        #[arg(long)]
        filename: Option<String>,
    },
}

impl Cli {
    fn link_config(&self) -> LinkConfig {
        let mut config = LinkConfig::default();
        config.serial.port = self.port.clone();
        config.ble.name_prefix = self.name_prefix.clone();
        config.ble.known_addresses = self.addresses.clone();
        config.poll.ambient_light = self.ambient_light;
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let kind = TransportKind::from(cli.transport);
    let (manager, events) = ConnectionManager::new(cli.link_config());

    info!("Connecting to keypad over {}", kind);
    if let Err(e) = manager.connect(kind).await {
        error!("{}", e.user_message());
        return Err(e.into());
    }

    let result = match cli.command {
        Commands::Monitor => monitor(events).await,
        Commands::Send { json, wait_secs } => send(&manager, events, &json, wait_secs).await,
        Commands::Ota { file, filename } => upload(&manager, events, file, filename).await,
    };

    manager.disconnect().await;
    result
}

async fn monitor(mut events: EventReceiver) -> Result<()> {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if !log_event(&event) {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }
    Ok(())
}

async fn send(
    manager: &ConnectionManager,
    mut events: EventReceiver,
    json: &str,
    wait_secs: u64,
) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(json).context("message is not valid JSON")?;
    match codec::discriminant(&value) {
        Some(kind) if OutboundKind::from_discriminant(kind).is_some() => {}
        Some(kind) => warn!("{:?} is not a message type the keypad understands", kind),
        None => warn!("Message has no \"type\" field"),
    }
    manager.send(json).await.context("send failed")?;
    info!("Sent {}", json);

    let deadline = tokio::time::sleep(Duration::from_secs(wait_secs));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if !log_event(&event) {
                        break;
                    }
                }
                None => break,
            },
            _ = &mut deadline => break,
        }
    }
    Ok(())
}

async fn upload(
    manager: &ConnectionManager,
    mut events: EventReceiver,
    file: PathBuf,
    filename: Option<String>,
) -> Result<()> {
    let image = tokio::fs::read(&file)
        .await
        .with_context(|| format!("cannot read {}", file.display()))?;
    let filename = match filename {
        Some(name) => name,
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("firmware path has no file name")?,
    };

    // Keep device traffic visible while the upload runs
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    // No telemetry requests in the middle of a transfer
    let ota_config = manager.config().ota.clone();
    let chunks = image.len().div_ceil(ota_config.chunk_size.max(1)) as u32;
    manager.pause_status_polling(
        ota_config.settle_delay + ota_config.inter_chunk_delay_ble * chunks + ota_config.completion_grace,
    );

    let (mut uploader, mut progress) = OtaUploader::new(manager.clone(), ota_config);
    let reporter = tokio::spawn(async move {
        while let Some(event) = progress.recv().await {
            match event {
                OtaEvent::Started { filename, size, chunks } => {
                    info!("[OTA] Uploading {} ({} bytes, {} chunks)", filename, size, chunks)
                }
                OtaEvent::Progress { percent, chunk, total } => {
                    info!("[OTA] {}% ({}/{})", percent, chunk, total)
                }
                OtaEvent::Completed { filename } => {
                    info!("[OTA] {} sent, device is finalizing", filename)
                }
                OtaEvent::Aborted { message } => error!("[OTA] Aborted: {}", message),
                OtaEvent::Ready => debug!("[OTA] Uploader ready"),
            }
        }
    });

    let outcome = tokio::select! {
        result = uploader.upload(&image, &filename) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match outcome {
        Some(result) => result.context("firmware update failed"),
        None => {
            uploader.reset();
            Err(anyhow!("firmware update interrupted"))
        }
    };
    drop(uploader);
    let _ = reporter.await;
    printer.abort();

    result
}

/// Log one link event; returns false once the link is gone
fn log_event(event: &LinkEvent) -> bool {
    match event {
        LinkEvent::StateChanged(state) => {
            info!("[LINK] {}", state);
            true
        }
        LinkEvent::LinkLost { kind, reason } => {
            warn!("[LINK] {} link lost: {}", kind, reason);
            false
        }
        LinkEvent::Device(event) => {
            match event {
                DeviceEvent::Log(line) => info!("[DEVICE] {}", line),
                DeviceEvent::KeyPressed { row, col } => info!("[KEY] Row {} Col {}", row, col),
                DeviceEvent::LightLevel(level) => info!("[LIGHT] Level {}", level),
                DeviceEvent::UartLog { direction, message } => {
                    debug!("[UART] {} {}", direction, message)
                }
                other => info!("[DEVICE] {:?}", other),
            }
            true
        }
    }
}
