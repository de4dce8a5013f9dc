//! Studio peer demo
//!
//! Joins a WebSocket signaling relay as one participant and either streams a
//! synthetic tone on a channel or receives that channel from whoever streams
//! it.
//!
//! # Usage
//!
//! ```bash
//! # Streaming host
//! cargo run --bin studio_peer -- \
//!   --relay-url ws://localhost:8080 \
//!   --participant 1 --channel StudioLive --session S1 --role stream
//!
//! # Viewer
//! cargo run --bin studio_peer -- \
//!   --relay-url ws://localhost:8080 \
//!   --participant 2 --channel StudioLive --session S1 --role receive
//! ```

use anyhow::Context;
use clap::Parser;
use std::f32::consts::TAU;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use studiocast_webrtc::{
    ChannelEvent, ChannelId, ChannelRegistry, LocalTrack, MediaSource, ParticipantId,
    StreamingConfig, TurnServerConfig, VideoFrame, WebRtcEngine, WebSocketRelay,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Studiocast peer
///
/// Streams or receives one broadcast channel over peer-to-peer connections.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket signaling relay URL
    #[arg(long, default_value = "ws://localhost:8080", env = "STUDIO_RELAY_URL")]
    relay_url: String,

    /// Network participant id of this peer
    #[arg(long, env = "STUDIO_PARTICIPANT_ID")]
    participant: u64,

    /// Broadcast channel name
    #[arg(long, default_value = "StudioLive", env = "STUDIO_CHANNEL")]
    channel: String,

    /// Session id minted by the authority
    #[arg(long, default_value = "session-1", env = "STUDIO_SESSION")]
    session: String,

    /// Stream the synthetic tone or receive the channel
    #[arg(long, default_value = "receive", env = "STUDIO_ROLE")]
    role: RoleArg,

    /// Configuration file (JSON or YAML)
    #[arg(long, env = "STUDIO_CONFIG")]
    config: Option<PathBuf>,

    /// Configuration preset: low_latency, unreliable_network
    #[arg(long, env = "STUDIO_PRESET")]
    preset: Option<ConfigPreset>,

    /// Disable per-viewer fan-out (single broadcast offer)
    #[arg(long, default_value_t = false, env = "STUDIO_NO_FAN_OUT")]
    no_fan_out: bool,

    /// TURN servers (format: turn:host:port:username:password, comma-separated)
    #[arg(long, value_delimiter = ',', env = "STUDIO_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// Tone frequency in Hz
    #[arg(long, default_value_t = 440.0)]
    tone_hz: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum RoleArg {
    /// Distribute captured media
    Stream,
    /// View the channel
    Receive,
}

/// Configuration preset for quick setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum ConfigPreset {
    /// Short timeouts and 10ms packets
    LowLatency,
    /// Longer timeouts and larger retry budget
    UnreliableNetwork,
}

/// Parse TURN server from string format: turn:host:port:username:password
fn parse_turn_server(s: &str) -> anyhow::Result<TurnServerConfig> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 5 {
        anyhow::bail!(
            "invalid TURN server '{}', expected turn:host:port:username:password",
            s
        );
    }

    let protocol = parts[0];
    if protocol != "turn" && protocol != "turns" {
        anyhow::bail!("invalid TURN protocol '{}'", protocol);
    }

    Ok(TurnServerConfig {
        url: format!("{}:{}:{}", protocol, parts[1], parts[2]),
        username: parts[3].to_string(),
        // Password may contain colons
        credential: parts[4..].join(":"),
    })
}

fn load_config(args: &Args) -> anyhow::Result<StreamingConfig> {
    let mut config = match (&args.config, args.preset) {
        (Some(path), _) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let is_json = path.extension().is_some_and(|ext| ext == "json");
            if is_json {
                StreamingConfig::from_json_str(&text)?
            } else {
                StreamingConfig::from_yaml_str(&text)?
            }
        }
        (None, Some(ConfigPreset::LowLatency)) => StreamingConfig::low_latency(),
        (None, Some(ConfigPreset::UnreliableNetwork)) => StreamingConfig::unreliable_network(),
        (None, None) => StreamingConfig::default(),
    };

    if args.no_fan_out {
        config = config.with_fan_out(false);
    }
    if !args.turn_servers.is_empty() {
        let turn_servers = args
            .turn_servers
            .iter()
            .map(|s| parse_turn_server(s))
            .collect::<anyhow::Result<Vec<_>>>()?;
        for turn in &turn_servers {
            info!("Adding TURN server: {} (user: {})", turn.url, turn.username);
        }
        config = config.with_turn_servers(turn_servers);
    }

    config.validate()?;
    Ok(config)
}

/// Audio-only source backed by the tone generator task
struct ToneSource;

impl MediaSource for ToneSource {
    fn is_available(&self) -> bool {
        true
    }

    fn local_tracks(&self) -> Vec<LocalTrack> {
        vec![LocalTrack::audio("tone", "studio", 2)]
    }

    fn current_frame(&self) -> Option<VideoFrame> {
        None
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = load_config(&args)?;

    info!(
        version = studiocast_webrtc::version(),
        relay = %args.relay_url,
        participant = args.participant,
        channel = %args.channel,
        role = ?args.role,
        fan_out = config.fan_out_enabled,
        "Studio peer starting"
    );

    let relay = WebSocketRelay::connect(&args.relay_url, ParticipantId(args.participant)).await?;
    let registry = ChannelRegistry::builder()
        .config(config.clone())
        .relay(Arc::new(relay))
        .transport_factory(Arc::new(WebRtcEngine::new(config.clone())))
        .media_source(Arc::new(ToneSource))
        .build()?;

    let channel = ChannelId::new(args.channel.as_str());
    let mut events = registry.subscribe();
    let shutdown = CancellationToken::new();

    match args.role {
        RoleArg::Stream => {
            spawn_tone(&registry, &channel, &config, args.tone_hz, shutdown.clone());
            registry
                .start_streaming(channel.clone(), args.session.as_str())
                .await?;
        }
        RoleArg::Receive => {
            registry
                .start_receiving(channel.clone(), args.session.as_str())
                .await?;
        }
    }

    info!("Running. Press Ctrl+C to shutdown.");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ChannelEvent::StateChanged { channel, previous, current, .. }) => {
                    info!("{}: {:?} -> {:?}", channel, previous, current);
                }
                Ok(ChannelEvent::ShowLocal { channel, reason }) => {
                    info!("{}: showing local content ({:?})", channel, reason);
                }
                Ok(ChannelEvent::TrackReceived { channel, participant, kind }) => {
                    info!("{}: {:?} track from {:?}", channel, kind, participant);
                }
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("Shutdown signal received, cleaning up...");
    shutdown.cancel();
    registry.stop_channel(channel).await?;
    registry.shutdown().await;
    info!("Studio peer shut down gracefully");
    Ok(())
}

/// Push a stereo sine tone into the channel's packetizer in 10ms chunks
fn spawn_tone(
    registry: &ChannelRegistry,
    channel: &ChannelId,
    config: &StreamingConfig,
    frequency: f32,
    shutdown: CancellationToken,
) {
    let input = registry.audio_input(channel.clone());
    let sample_rate = config.audio.sample_rate;
    let frames = (sample_rate / 100) as usize;

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(10));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut phase = 0.0f32;
        let step = TAU * frequency / sample_rate as f32;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    let mut samples = Vec::with_capacity(frames * 2);
                    for _ in 0..frames {
                        let value = phase.sin() * 0.2;
                        samples.push(value);
                        samples.push(value);
                        phase = (phase + step) % TAU;
                    }
                    input.push(samples, 2);
                }
            }
        }
    });
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
