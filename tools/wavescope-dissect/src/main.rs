//! Offline dissector for wavescope serial captures and recordings.
//!
//! Raw captures are decoded through the same frame codec the daemon runs,
//! so what prints here is exactly what the daemon would have seen on the
//! wire. Recording files are walked chunk by chunk and can be re-exported
//! as CSV.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

use wavescope::protocol::{CommandId, FrameCodec};
use wavescope::record::{RecordReader, export_csv};
use wavescope::stream::DataFrame;

/// Payload bytes shown per frame unless --full is given.
const PAYLOAD_PREVIEW: usize = 16;

#[derive(Parser)]
#[command(name = "wavescope-dissect", about = "Dissect wavescope captures and recordings")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a raw serial capture through the binary frame codec.
    Capture {
        path: PathBuf,
        /// Print payloads in full instead of a preview.
        #[arg(long)]
        full: bool,
    },
    /// Walk the chunks of a recording file.
    Record {
        path: PathBuf,
        /// Re-export all decoded samples as CSV.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Capture { path, full } => dissect_capture(path, full).await,
        Command::Record { path, csv } => dissect_record(path, csv),
    }
}

async fn dissect_capture(path: PathBuf, full: bool) -> Result<()> {
    let file = tokio::fs::File::open(&path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let mut frames = FramedRead::new(file, FrameCodec::default());

    let mut count: u64 = 0;
    while let Some(frame) = frames.next().await {
        let frame = frame?;
        count += 1;

        // Pad before coloring so the escape codes don't break alignment.
        let cmd = format!("{:<16}", format!("{:?}", frame.cmd));
        let cmd = if frame.cmd == CommandId::Unknown {
            cmd.red()
        } else {
            cmd.green()
        };

        let payload = if full || frame.payload.len() <= PAYLOAD_PREVIEW {
            hex::encode(&frame.payload)
        } else {
            format!(
                "{}.. ({} bytes)",
                hex::encode(&frame.payload[..PAYLOAD_PREVIEW]),
                frame.payload.len()
            )
        };
        println!("{count:>6}  {cmd} seq={:<5} {payload}", frame.seq);
    }

    println!(
        "{count} frame(s), {} CRC error(s)",
        frames.decoder().crc_error_count()
    );
    Ok(())
}

fn dissect_record(path: PathBuf, csv: Option<PathBuf>) -> Result<()> {
    let reader =
        RecordReader::open(&path).with_context(|| format!("opening {}", path.display()))?;

    let mut all_frames: Vec<DataFrame> = Vec::new();
    let mut chunks: u64 = 0;
    for chunk in reader {
        chunks += 1;
        let frames = chunk.unpack();
        println!(
            "chunk {chunks:>4}  {} .. {} us  {:>8} bytes  {:>6} frame(s)",
            chunk.start_ts,
            chunk.end_ts,
            chunk.packed_samples.len(),
            frames.len()
        );
        all_frames.extend(frames);
    }
    println!(
        "{chunks} chunk(s), {} data frame(s) total",
        all_frames.len()
    );

    if let Some(out) = csv {
        export_csv(&out, &all_frames).with_context(|| format!("writing {}", out.display()))?;
        println!("wrote {}", out.display().to_string().green());
    }
    Ok(())
}
