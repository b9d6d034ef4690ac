//! Manual smoke-test harness for the prefetch engine.
//!
//! Builds a synthetic weights file and a small `blk.0..blk.N` catalogue,
//! pins the resident layers, spawns the scheduler, and walks a synthetic
//! graph end to end, printing the timing each step reports. Not part of
//! the engine's public surface.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;

use clap::Parser;
use tracing::info;

use weight_prefetch_engine::config::PrefetchConfig;
use weight_prefetch_engine::graph::{SimpleGraph, SimpleNode};
use weight_prefetch_engine::PrefetchEngine;

#[derive(Parser, Debug)]
#[command(name = "prefetch-demo", about = "Exercise the prefetch engine against a synthetic model")]
struct Cli {
    /// Number of blk layers in the synthetic model.
    #[arg(long, default_value_t = 8)]
    layers: u32,

    /// Bytes per layer fragment.
    #[arg(long, default_value_t = 1 << 20)]
    layer_bytes: u64,

    /// First dynamic layer index (K).
    #[arg(long, default_value_t = 2)]
    k: i32,

    /// Prefetch window size (W).
    #[arg(long, default_value_t = 2)]
    w: i32,

    /// Worker fan-out for each prefetch_range call.
    #[arg(long, default_value_t = 1)]
    prefetch_workers: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let weights_path = std::env::temp_dir().join(format!("prefetch-demo-{}.bin", std::process::id()));
    let mut weights_file = File::create(&weights_path)?;
    let mut offsets = HashMap::new();
    let mut nodes = Vec::new();

    let mut cursor = 0u64;
    for i in 0..cli.layers {
        let start = cursor;
        let end = start + cli.layer_bytes;
        weights_file.write_all(&vec![0u8; cli.layer_bytes as usize])?;
        offsets.insert(format!("blk.{i}"), vec![(start, end, i as i32)]);
        nodes.push(SimpleNode::new([format!("blk.{i}.attn_q.weight")]));
        cursor = end;
    }
    weights_file.flush()?;
    drop(weights_file);
    let graph = SimpleGraph { nodes };

    let config = PrefetchConfig {
        k_dynamic_entrance: cli.k,
        w_window: cli.w,
        prefetch_input: true,
        prefetch_workers: cli.prefetch_workers,
    };

    let engine = PrefetchEngine::new(&weights_path, &offsets, config, None)?;
    engine.prefetch_resident();
    let mut handle = engine.spawn_scheduler();

    for n in 0..cli.layers as usize {
        engine.wait_ready(&graph, n);
        info!(node = n, dynamic = engine.is_dynamic(&graph, n), "consuming layer");
        engine.notify_done(&graph, n);
    }

    handle.shutdown();
    handle.join();
    let _ = std::fs::remove_file(&weights_path);
    info!("demo run complete");
    Ok(())
}
