//! Demo pose client
//!
//! Connects to the signaling broker, completes the handshake for a channel
//! id, then streams a synthetic circular-motion pose source over the data
//! channel. Stands in for the AR renderer during development.

use clap::Parser;
use presence_webrtc::{NegotiationState, PoseTransport, RawPose, TransportConfig};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pose_client")]
#[command(about = "Streams synthetic pose samples over a negotiated data channel")]
struct Args {
    /// Signaling broker URL
    #[arg(
        long,
        env = "PRESENCE_SIGNALING_URL",
        default_value = "ws://localhost:8000/socketcluster/"
    )]
    signaling_url: String,

    /// STUN server URLs, comma separated
    #[arg(
        long,
        env = "PRESENCE_STUN_SERVERS",
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302"
    )]
    stun_servers: Vec<String>,

    /// Session channel id shared with the offering peer
    #[arg(long, env = "PRESENCE_CHANNEL_ID", default_value = "RAVEN")]
    channel_id: String,

    /// Pose samples per second
    #[arg(long, default_value_t = 30)]
    rate: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!(
        "pose client v{} connecting to {} (channel {})",
        presence_webrtc::version(),
        args.signaling_url,
        args.channel_id
    );

    let config = TransportConfig {
        signaling_url: args.signaling_url,
        stun_servers: args.stun_servers,
        turn_servers: Vec::new(),
        channel_id: args.channel_id,
    };

    let mut transport = PoseTransport::new(config).await?;

    if let Some(mut errors) = transport.errors() {
        tokio::spawn(async move {
            while let Some(e) = errors.recv().await {
                error!("session error: {}", e);
            }
        });
    }

    transport.start().await?;

    let mut state = transport.state();
    state
        .wait_for(|s| *s == NegotiationState::ReadyToConnect)
        .await?;
    info!("authenticated, starting session");
    transport.start_session()?;

    state
        .wait_for(|s| matches!(*s, NegotiationState::Connected | NegotiationState::Failed))
        .await?;
    if *state.borrow() == NegotiationState::Failed {
        anyhow::bail!("session failed before the data channel came up");
    }
    info!("connected, streaming poses at {} Hz", args.rate);

    let mut interval = tokio::time::interval(Duration::from_secs(1) / args.rate.max(1));
    let mut t: f32 = 0.0;
    let dt = 1.0 / args.rate.max(1) as f32;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                // Content node orbiting slowly in front of the camera.
                let pose = RawPose {
                    x: 0.2 * t.cos(),
                    y: 0.2 * t.sin(),
                    z: -0.5,
                    rx: 0.0,
                    ry: 0.3 * (0.5 * t).sin(),
                    rz: 0.0,
                };
                if let Err(e) = transport.send_pose(pose) {
                    warn!("stopping, transport gone: {}", e);
                    break;
                }
                t += dt;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
        }
    }

    transport.shutdown()?;
    Ok(())
}
