//! Audio Receiver Application
//!
//! Receives PCM datagrams from a sender, smooths them through the reorder
//! and jitter buffers and plays them on an output device.

use anyhow::{Context, Result};
use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::thread;

use lan_pcm_streamer::{
    audio::{
        buffer::create_shared_buffer, device::list_devices, playback::AudioPlayback,
        playout::PlayoutLoop, volume::Volume,
    },
    config::AppConfig,
    error::AudioError,
    network::{control::run_console, udp::resolve, AudioReceiver, ControlEmitter},
    telemetry::{init_logging, StatsReporter},
};

#[derive(Parser, Debug)]
#[command(name = "receiver", about = "Play a LAN PCM stream")]
struct Args {
    /// UDP port to listen on for audio [default: 8080]
    #[arg(long)]
    port: Option<u16>,

    /// Receiver-side volume (0.0 to 1.0)
    #[arg(long, default_value_t = 1.0)]
    volume: f64,

    /// Sender control address (host:port) for pushing client volume
    #[arg(long)]
    client_control_addr: Option<String>,

    /// Output device id or name (see --list-devices)
    #[arg(long)]
    device: Option<String>,

    /// Seconds between buffer statistics reports, 0 to disable [default: 10]
    #[arg(long)]
    stats_interval: Option<u64>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// List output devices and exit
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
        print_output_devices();
        return Ok(());
    }

    if let Some(port) = args.port {
        config.network.listen_port = port;
    }
    if let Some(secs) = args.stats_interval {
        config.network.stats_interval_secs = secs;
    }
    if let Some(addr) = &args.client_control_addr {
        config.network.client_control_addr =
            Some(resolve(addr).context("Invalid client control address")?);
    }
    let volume = Volume::new(args.volume).context("Invalid server volume")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!("Starting LAN PCM Receiver");

    let buffer = create_shared_buffer(config.jitter.thresholds(), config.audio.payload_size())
        .context("Failed to create jitter buffer")?;

    let (playback, mut writer) = AudioPlayback::open(args.device.as_deref(), config.audio)
        .context("Failed to open output device")?;

    let mut receiver = AudioReceiver::new();
    let local_addr = receiver
        .start(&config.network, buffer.clone(), config.jitter.reorder_horizon)
        .context("Failed to start audio receiver")?;

    println!(
        "Server started. Listening for audio on UDP port {} with server volume {:.2}",
        local_addr.port(),
        volume.get()
    );
    println!("Waiting for audio stream...");
    println!("Press Ctrl+C to stop.");

    let _stats_task = config.network.stats_interval().map(|period| {
        StatsReporter::new(buffer.clone())
            .with_receiver(receiver.shared_stats())
            .spawn(period)
    });

    if let Some(target) = config.network.client_control_addr {
        let emitter = ControlEmitter::connect(target).context("Failed to open control socket")?;
        thread::Builder::new()
            .name("control-console".to_string())
            .spawn(move || {
                if let Err(e) = run_console(io::stdin().lock(), io::stdout(), &emitter) {
                    tracing::error!("Console stopped: {}", e);
                }
            })
            .context("Failed to start control console")?;
    }

    // The output stream is not Send, so it stays here while a dedicated
    // thread paces playout against the device
    let (primed_tx, primed_rx) = tokio::sync::oneshot::channel::<()>();
    let mut playout = PlayoutLoop::new(buffer.clone(), volume, config.audio.samples_per_block());
    thread::Builder::new()
        .name("playout".to_string())
        .spawn(move || {
            playout.prebuffer();
            let _ = primed_tx.send(());
            match playout.run(&mut writer) {
                Ok(()) | Err(AudioError::OutputClosed) => {}
                Err(e) => tracing::error!("Playout stopped: {}", e),
            }
        })
        .context("Failed to start playout thread")?;

    tokio::select! {
        primed = primed_rx => {
            if primed.is_ok() {
                playback.start().context("Failed to start output stream")?;
                tracing::info!("Playing on {}", playback.device_name());
            }
            tokio::signal::ctrl_c().await?;
        }
        signal = tokio::signal::ctrl_c() => signal?,
    }

    tracing::info!("Shutting down");
    let stats = buffer.stats();
    let recv = receiver.stats();
    tracing::info!(
        "Final stats: {} datagrams ({} invalid), {} packets buffered, {} underflows, {} overflows, {} device underruns",
        recv.packets_received,
        recv.invalid_packets,
        stats.total_received,
        stats.underflows,
        stats.overflows,
        playback.device_underruns()
    );

    receiver.stop();
    drop(playback);
    Ok(())
}

fn print_output_devices() {
    println!("\n=== Available Output Devices ===");
    for device in list_devices().iter().filter(|d| d.is_output) {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}
