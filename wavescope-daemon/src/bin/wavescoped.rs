//! Acquisition daemon for devices speaking the wavescope protocol.
//!
//! Opens the serial port, decodes the inbound stream (framed binary or
//! legacy text, auto-detected by default), keeps a bounded window of
//! decoded samples, and optionally appends them to a recording file.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use wavescope::bus::{DEFAULT_QUEUE_DEPTH, EventBus};
use wavescope::dispatch::FrameDispatcher;
use wavescope::logging::prelude::*;
use wavescope::protocol::{CommandId, Frame, ParserMode};
use wavescope::record::{RecordChunk, RecordSink};
use wavescope::stream::{DataFrame, StreamDecoder};
use wavescope::transport::{SerialTransport, TransportConfig};
use wavescope::vars::VariableRegistry;

/// Data frames batched into one recorded chunk.
const CHUNK_FRAMES: usize = 64;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DaemonConfig {
    transport: TransportConfig,
    mode: ParserMode,
    record: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    wavescope::logging::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: wavescoped <port|config.json> [baud]");
        eprintln!();
        eprintln!("Environment:");
        eprintln!("  WAVESCOPE_MODE      auto | binary | text (default: auto)");
        eprintln!("  WAVESCOPE_RECORD    write decoded samples to this recording file");
        eprintln!("  RUST_LOG            log filter (default: info)");
        std::process::exit(1);
    }

    let mut config = if args[1].ends_with(".json") {
        let text = std::fs::read_to_string(&args[1])
            .with_context(|| format!("reading {}", args[1]))?;
        serde_json::from_str::<DaemonConfig>(&text)
            .with_context(|| format!("parsing {}", args[1]))?
    } else {
        DaemonConfig {
            transport: TransportConfig {
                port_name: args[1].clone(),
                ..Default::default()
            },
            ..Default::default()
        }
    };

    if let Some(baud) = args.get(2) {
        config.transport.baud_rate = baud.parse().context("baud rate must be an integer")?;
    }
    if let Ok(mode) = env::var("WAVESCOPE_MODE") {
        config.mode = match mode.as_str() {
            "auto" => ParserMode::AutoDetect,
            "binary" => ParserMode::Binary,
            "text" => ParserMode::Text,
            other => bail!("unknown WAVESCOPE_MODE '{other}' (use auto, binary or text)"),
        };
    }
    if let Ok(path) = env::var("WAVESCOPE_RECORD") {
        config.record = Some(PathBuf::from(path));
    }
    if config.transport.port_name.is_empty() {
        bail!("no serial port configured");
    }

    run(config).await
}

async fn run(config: DaemonConfig) -> Result<()> {
    let mut bus = EventBus::new();
    let mut frames = bus.subscribe_frames(DEFAULT_QUEUE_DEPTH);
    let mut errors = bus.subscribe_errors();
    let mut state = bus.state_watch();

    let mut dispatcher = FrameDispatcher::new(SerialTransport::new(), bus);
    dispatcher.set_parser_mode(config.mode);
    dispatcher.connect(&config.transport).await?;
    dispatcher.send_command(CommandId::StreamStart, &[]).await?;

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            ctrl_c_cancel.cancel();
        }
    });

    let io_cancel = cancel.clone();
    let io_task = tokio::spawn(async move {
        dispatcher.run(io_cancel).await;
        dispatcher
    });

    let mut decoder = StreamDecoder::new();
    let registry = VariableRegistry::new();
    let mut sink = RecordSink::new();
    if let Some(path) = &config.record {
        sink.start(path)
            .with_context(|| format!("starting recording at {}", path.display()))?;
    }
    let mut pending: Vec<DataFrame> = Vec::new();

    let mut status = tokio::time::interval(Duration::from_secs(10));
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            maybe = frames.recv() => match maybe {
                Some(frame) => {
                    handle_frame(&frame, &mut decoder, &registry, &mut sink, &mut pending)
                }
                None => break,
            },
            maybe = errors.recv() => if let Some(message) = maybe {
                error!("Transport error: {message}");
            },
            changed = state.changed() => match changed {
                Ok(()) => info!(state = ?*state.borrow_and_update(), "Connection state"),
                Err(_) => break,
            },
            _ = status.tick() => debug!(
                data_frames = decoder.frames_decoded(),
                window = decoder.len(),
                "Stream status"
            ),
        }
    }

    if sink.is_recording() && !pending.is_empty() {
        if let Err(e) = sink.append_chunk(&RecordChunk::pack(&pending)) {
            error!("Final chunk append failed: {e}");
        }
    }
    sink.stop();

    let dispatcher = io_task.await?;
    info!(
        frames = dispatcher.frames_decoded(),
        crc_errors = dispatcher.crc_error_count(),
        data_frames = decoder.frames_decoded(),
        "Daemon exiting"
    );
    Ok(())
}

fn handle_frame(
    frame: &Frame,
    decoder: &mut StreamDecoder,
    registry: &VariableRegistry,
    sink: &mut RecordSink,
    pending: &mut Vec<DataFrame>,
) {
    match frame.cmd {
        CommandId::StreamData => {
            let Some(data_frame) = decoder.ingest(frame) else {
                return;
            };
            if sink.is_recording() {
                pending.push(data_frame);
                if pending.len() >= CHUNK_FRAMES {
                    // A failed append leaves the file open; keep going and
                    // let the operator decide whether to stop.
                    if let Err(e) = sink.append_chunk(&RecordChunk::pack(pending)) {
                        error!("Chunk append failed: {e}");
                    }
                    pending.clear();
                }
            }
        }
        CommandId::ReadMemBatch => {
            let applied = registry.apply_mem_batch(&frame.payload);
            debug!(applied, "Memory batch response applied");
        }
        CommandId::Ack => trace!(seq = frame.seq, "Ack"),
        other => debug!(cmd = ?other, "Unhandled frame"),
    }
}
