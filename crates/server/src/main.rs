mod config;
mod events;
mod server;

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::Parser;
use vrsync::fec::CodecKind;

use config::ServerConfig;
use events::ServerEvent;
use server::StreamServer;

#[derive(Parser)]
#[command(name = "vrsync-server")]
#[command(about = "Rendering-side streaming server")]
struct Args {
    #[arg(short, long, help = "TOML configuration file")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    bind: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long, help = "Frames streamed per second")]
    render_rate: Option<u32>,

    #[arg(long, help = "Erasure codec: none, xor-parity or reed-solomon")]
    codec: Option<CodecKind>,

    #[arg(long, help = "Parity shards per frame")]
    parity_shards: Option<usize>,

    #[arg(long, help = "Packet loss percentage (0-100) applied to video datagrams")]
    loss_percent: Option<f32>,

    #[arg(long, help = "Exit after the first headset session")]
    once: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path),
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(rate) = args.render_rate {
        config.render_rate = rate;
    }
    if let Some(codec) = args.codec {
        config.codec = codec;
    }
    if let Some(parity_shards) = args.parity_shards {
        config.parity_shards = parity_shards;
    }
    if let Some(loss_percent) = args.loss_percent {
        config.packet_loss.enabled = loss_percent > 0.0;
        config.packet_loss.loss_percent = loss_percent;
    }

    let mut server = StreamServer::new(config)?;
    log::info!("Server listening on {}", server.local_addr()?);

    let running = server.running();
    while running.load(Ordering::SeqCst) {
        if let Err(e) = server.serve_one(|event| log_event(&event)) {
            log::error!("Session failed: {e:#}");
        }
        if args.once {
            break;
        }
    }

    log::info!("Server shutting down");
    Ok(())
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::HeadsetConnected { addr } => {
            log::info!("Headset connected from {}", addr);
        }
        ServerEvent::StreamStarted { udp_addr } => {
            log::info!("Streaming video to {}", udp_addr);
        }
        ServerEvent::FrameFeedback(feedback) => {
            log::debug!(
                "Frame {} received with {} shards{}",
                feedback.frame_index,
                feedback.shards_received,
                if feedback.reconstructed { " (reconstructed)" } else { "" }
            );
        }
        ServerEvent::HeadsetDisconnected { addr, reason } => {
            log::info!("Headset {} {}", addr, reason.as_str());
        }
        ServerEvent::Error { message } => {
            log::warn!("{}", message);
        }
    }
}
