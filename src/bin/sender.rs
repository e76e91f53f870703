//! Audio Sender Application
//!
//! Captures PCM from an input device (or reads it from a raw file) and
//! streams it to a receiver over UDP.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lan_pcm_streamer::{
    audio::{
        capture::AudioCapture,
        device::{input_devices, list_devices, select_input_device},
        volume::{SharedVolume, Volume},
    },
    config::AppConfig,
    network::{
        sender::{run_capture_loop, stream_pcm},
        udp::resolve,
        AudioSender, ControlListener,
    },
    telemetry::init_logging,
};
use cpal::traits::DeviceTrait;

#[derive(Parser, Debug)]
#[command(name = "sender", about = "Stream PCM audio to a LAN receiver")]
struct Args {
    /// Receiver IP address or host name
    #[arg(long, default_value = "127.0.0.1")]
    server: String,

    /// Receiver UDP port [default: 8080]
    #[arg(long)]
    port: Option<u16>,

    /// Initial client-side volume (0.0 to 1.0)
    #[arg(long, default_value_t = 1.0)]
    volume: f64,

    /// UDP port to listen on for volume control [default: 8081]
    #[arg(long)]
    control_port: Option<u16>,

    /// Capture from the device with this exact name
    #[arg(long)]
    device_name: Option<String>,

    /// Capture from the device at this index (see --list-devices)
    #[arg(long)]
    device_index: Option<usize>,

    /// Stream a raw interleaved s16le PCM file instead of capturing
    #[arg(long)]
    file: Option<PathBuf>,

    /// Send datagrams without a sequence header
    #[arg(long)]
    legacy: bool,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config =
        AppConfig::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.logging);

    if args.list_devices {
        print_input_devices()?;
        return Ok(());
    }

    if let Some(port) = args.port {
        config.network.listen_port = port;
    }
    if let Some(port) = args.control_port {
        config.network.control_port = port;
    }
    let volume = Volume::new(args.volume).context("Invalid client volume")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!("Starting LAN PCM Sender");

    let target = resolve(&format!("{}:{}", args.server, config.network.listen_port))
        .context("Invalid server address")?;
    let sender = Arc::new(AudioSender::connect(target, args.legacy).context("Failed to open audio socket")?);

    if let Some(path) = args.file {
        let file = File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
        let format = config.audio;
        let task_sender = sender.clone();
        let sent = tokio::task::spawn_blocking(move || {
            stream_pcm(BufReader::new(file), &task_sender, &format, true)
        })
        .await??;
        println!("Finished sending audio file ({} datagrams).", sent);
        return Ok(());
    }

    let shared_volume = SharedVolume::new(volume);
    let mut control = ControlListener::new(shared_volume.clone());
    control
        .start(SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.network.control_port)))
        .context("Failed to start control listener")?;

    let devices = input_devices().context("Failed to enumerate input devices")?;
    let device = select_input_device(&devices, args.device_index, args.device_name.as_deref())
        .cloned()
        .ok_or_else(|| anyhow!("No usable input device found"))?;
    tracing::info!(
        "Capturing from {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let (mut capture, blocks) =
        AudioCapture::new(device, config.audio, shared_volume).context("Failed to prepare capture")?;
    capture.start().context("Failed to start capture")?;

    println!(
        "Streaming to {} with client volume {:.2}. Press Ctrl+C to stop.",
        sender.target(),
        volume.get()
    );

    let running = Arc::new(AtomicBool::new(true));
    let send_loop = {
        let running = running.clone();
        let sender = sender.clone();
        tokio::task::spawn_blocking(move || run_capture_loop(&blocks, &sender, &running))
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    running.store(false, Ordering::SeqCst);
    capture.stop();
    control.stop();
    send_loop.await?;

    let stats = sender.stats();
    tracing::info!(
        "Sent {} packets ({:.1} KB), {} send errors, {} blocks dropped at capture",
        stats.packets_sent,
        stats.bytes_sent as f64 / 1024.0,
        stats.send_errors,
        capture.dropped_blocks()
    );
    Ok(())
}

fn print_input_devices() -> Result<()> {
    println!("\n=== Available Input Devices ===");
    let infos = list_devices();
    for (index, device) in input_devices()?.iter().enumerate() {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let is_default = infos
            .iter()
            .any(|d| d.is_input && d.is_default && d.name == name);
        let default_marker = if is_default { " [DEFAULT]" } else { "" };
        println!("  {}: {}{}", index, name, default_marker);
    }
    println!();
    Ok(())
}
