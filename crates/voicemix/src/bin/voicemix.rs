//! voicemix demo binary
//!
//! Builds one session with every source category in play and renders the
//! mixed output to a WAV file:
//! - a queue of two tone tracks
//! - a background layer routed through the sound graph
//! - a button sound
//! - a TTS stand-in

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::info;
use voiceconf::VoiceConfig;
use voicemix::{
    telemetry, GraphEdge, GraphNode, MediaRequest, MultiToneSource, NodeKind, SessionManager,
    SourceHandle, TickDriver, ToneResolver, ToneSource, WavSink,
};

#[derive(Parser, Debug)]
#[command(version, about = "Render a mixed voicemix session to a WAV file")]
struct Args {
    /// Config file (replaces ./voicemix.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output WAV path
    #[arg(long, default_value = "voicemix-demo.wav")]
    output: PathBuf,

    /// Seconds of audio to render
    #[arg(long, default_value_t = 5)]
    seconds: u64,

    /// Media url for the routed background node
    #[arg(long, default_value = "tone:110:60000")]
    ambience: String,

    /// Ambience volume in percent (0-200)
    #[arg(long, default_value_t = 40)]
    ambience_volume: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = VoiceConfig::load_from(args.config.as_deref()).context("loading config")?;
    telemetry::init(&config.telemetry.log_level)?;

    info!("voicemix {} starting", env!("CARGO_PKG_VERSION"));

    let tick_interval = Duration::from_millis(config.mixer.tick_interval_ms.max(1));
    let total_ticks = args.seconds * 1000 / tick_interval.as_millis() as u64;
    let mut manager = SessionManager::new(config.clone());

    let mixer = {
        let session = manager.connect("demo")?;
        let registry = session.registry().clone();

        registry.on_queue_empty(|| info!("Queue finished"));
        registry.add_to_queue(SourceHandle::new(ToneSource::new(440.0, 1500, 9000)));
        registry.add_to_queue(SourceHandle::new(MultiToneSource::arpeggio()));
        registry.add_button_sound(SourceHandle::new(ToneSource::new(880.0, 200, 6000)));
        registry.set_tts_track(Some(SourceHandle::new(ToneSource::new(660.0, 400, 5000))));

        let output_id = config.routing.output_node_id.clone();
        let executor = session.executor_mut();
        executor.update_graph(
            vec![
                GraphNode::new("ambience", NodeKind::SoundSource)
                    .with_data(json!({"volume": args.ambience_volume})),
                GraphNode::new(output_id.clone(), NodeKind::Output).with_data(json!({"volume": 100})),
            ],
            vec![GraphEdge::new("ambience", output_id)],
        );
        let layer = executor
            .prepare_source("ambience", &MediaRequest::new(args.ambience.clone()), &ToneResolver)
            .await?;
        info!("Ambience routed to output (layer {:?})", layer);

        session.mixer().clone()
    };

    let sink = WavSink::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let driver = TickDriver::start(mixer.clone(), sink, tick_interval, Some(total_ticks))?;
    let frames = driver.wait()?;

    let stats = mixer.stats();
    info!(
        "Rendered {} frames to {} (submissions={}, timeouts={}, failures={}, retired={})",
        frames,
        args.output.display(),
        stats.submissions,
        stats.timeouts,
        stats.failures,
        stats.retired
    );

    manager.disconnect("demo");
    info!("voicemix shutdown complete");
    Ok(())
}
