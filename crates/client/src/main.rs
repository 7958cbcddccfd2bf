mod config;
mod headset;
mod motion;

use std::net::SocketAddr;

use clap::Parser;
use vrsync::fec::CodecKind;

use config::ClientConfig;
use headset::HeadsetClient;

#[derive(Parser)]
#[command(name = "vrsync-client")]
#[command(about = "Simulated headset streaming tracking to a vrsync server")]
struct Args {
    #[arg(short, long, help = "Server address to connect to (e.g., 127.0.0.1:9757)")]
    server: Option<SocketAddr>,

    #[arg(long, default_value_t = 0, help = "Local UDP port for video (0 picks one)")]
    udp_port: u16,

    #[arg(short, long, default_value_t = 250, help = "Tracking packets per second")]
    tracking_rate: u32,

    #[arg(long, default_value_t = 4, help = "Maximum send jitter in ms")]
    jitter: u64,

    #[arg(short, long, default_value_t = 10, help = "Session length in seconds")]
    duration: u64,

    #[arg(long, default_value = "xor-parity", help = "Erasure codec the server uses")]
    codec: CodecKind,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = ClientConfig {
        udp_port: args.udp_port,
        tracking_rate: args.tracking_rate,
        max_jitter_ms: args.jitter,
        session_secs: args.duration,
        codec: args.codec,
        ..Default::default()
    };
    if let Some(server) = args.server {
        config.server_addr = server;
    }

    let client = HeadsetClient::connect(config)?;
    let summary = client.run()?;

    log::info!(
        "Sent {} tracking packets; {} frames received ({} reconstructed, {} lost) from {} datagrams",
        summary.tracking_packets,
        summary.video.frames_completed,
        summary.video.frames_reconstructed,
        summary.video.frames_lost,
        summary.datagrams.packets_received
    );
    Ok(())
}
