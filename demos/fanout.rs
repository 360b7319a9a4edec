//! Example: one throttled source fanned out to two sinks
//!
//! A cyclic byte source paced by a throttle feeds two raw file sinks;
//! both observe the identical byte stream. Runs until Ctrl-C, which the
//! engine turns into a graceful stop.
//!
//! Usage:
//!   cargo run --example fanout -- --left left.bin --right right.bin

use clap::Parser;
use sigflow::{Context, Graph, RawFileSink, Throttle, Vector, VectorSource};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// First output file
    #[arg(long)]
    left: String,

    /// Second output file
    #[arg(long)]
    right: String,

    /// Throttle rate in samples per second
    #[arg(short, long, default_value = "10000")]
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

    let pattern: Vec<u8> = (0u8..=255).collect();

    let mut graph = Graph::new();
    graph.add_block("src", VectorSource::cyclic(Vector::Byte(pattern), args.rate))?;
    graph.add_block("throttle", Throttle::new(args.rate))?;
    graph.add_block("left", RawFileSink::create(&args.left))?;
    graph.add_block("right", RawFileSink::create(&args.right))?;
    graph.connect("src", "out", "throttle", "in")?;
    graph.connect("throttle", "out", "left", "in")?;
    graph.connect("throttle", "out", "right", "in")?;

    let mut ctx = Context::new();
    ctx.load(graph)?;
    ctx.start()?;

    info!("streaming to {} and {} - Ctrl-C to stop", args.left, args.right);
    let state = ctx.wait()?;
    info!("terminal state: {state}");

    Ok(())
}
