//! Example: source → gain → raw file sink
//!
//! Emits a ramp of Float32 samples, multiplies them by a constant, and
//! writes the raw little-endian stream to a file.
//!
//! Usage:
//!   cargo run --example chain -- --output ramp.f32 --count 1024 --factor 2.0

use clap::Parser;
use sigflow::{Context, Graph, MultiplyConst, RawFileSink, State, Vector, VectorSource};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Output file for the raw Float32 stream
    #[arg(short, long)]
    output: String,

    /// Number of samples to emit
    #[arg(short, long, default_value = "1024")]
    count: usize,

    /// Gain factor
    #[arg(short, long, default_value = "2.0")]
    factor: f32,

    /// Source sample rate in Hz
    #[arg(short, long, default_value = "48000")]
    rate: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let ramp: Vec<f32> = (0..args.count).map(|i| i as f32).collect();

    let mut graph = Graph::new();
    graph.add_block("src", VectorSource::once(Vector::Float32(ramp), args.rate))?;
    graph.add_block("gain", MultiplyConst::new(args.factor))?;
    graph.add_block("sink", RawFileSink::create(&args.output))?;
    graph.chain(&["src", "gain", "sink"])?;

    let mut ctx = Context::new();
    ctx.load(graph)?;

    info!(
        "running: {} Float32 samples x{} -> {}",
        args.count, args.factor, args.output
    );
    ctx.start()?;
    let state = ctx.wait()?;
    assert_eq!(state, State::Stopped);
    info!("done, wrote {} bytes", args.count * 4);

    Ok(())
}
