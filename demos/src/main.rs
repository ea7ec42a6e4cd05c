mod backend;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{activation::softmax, Distribution},
};
use clap::{Parser, ValueEnum};
use swin_transformer::SwinTransformerConfig;
use tracing_subscriber::EnvFilter;

use crate::backend::{create_device, get_backend_name, SelectedBackend};

#[derive(Parser, Debug)]
#[command(name = "swin-classify")]
#[command(about = "Run a Swin Transformer classifier on a synthetic image batch")]
struct Cli {
    /// Model configuration file (JSON); overrides --variant
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Preset used when no configuration file is given
    #[arg(long, value_enum, default_value_t = Variant::T)]
    variant: Variant,

    /// Model weights saved with Burn's named MessagePack recorder
    #[arg(short, long)]
    weights: Option<PathBuf>,

    /// Batch size of the synthetic input
    #[arg(long, default_value_t = 1)]
    batch: usize,

    /// Input height in pixels
    #[arg(long, default_value_t = 224)]
    height: usize,

    /// Input width in pixels
    #[arg(long, default_value_t = 224)]
    width: usize,

    /// Seed of the backend random generator
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Number of classes to print per image
    #[arg(long, default_value_t = 5)]
    top_k: usize,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    write_config: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Variant {
    T,
    S,
    B,
    L,
}

impl Variant {
    fn config(self) -> SwinTransformerConfig {
        match self {
            Self::T => SwinTransformerConfig::swin_t(),
            Self::S => SwinTransformerConfig::swin_s(),
            Self::B => SwinTransformerConfig::swin_b(),
            Self::L => SwinTransformerConfig::swin_l(),
        }
    }
}

/// Indices and scores of the `k` largest entries, best first.
fn top_k(scores: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(k);
    ranked
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => SwinTransformerConfig::load(path)
            .map_err(|err| anyhow!("failed to load config {}: {err}", path.display()))?,
        None => cli.variant.config(),
    };

    if let Some(path) = &cli.write_config {
        config
            .save(path)
            .with_context(|| format!("failed to write config {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote model config");
        return Ok(());
    }

    let device = create_device();
    SelectedBackend::seed(cli.seed);
    tracing::info!(backend = get_backend_name(), seed = cli.seed, "selected backend");

    let mut model = config.init::<SelectedBackend>(&device)?;
    if let Some(path) = &cli.weights {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        model = model
            .load_file(path.clone(), &recorder, &device)
            .map_err(|err| anyhow!("failed to load weights {}: {err}", path.display()))?;
        tracing::info!(path = %path.display(), "loaded weights");
    }

    let input = Tensor::<SelectedBackend, 4>::random(
        [cli.batch, config.in_channels, cli.height, cli.width],
        Distribution::Normal(0.0, 1.0),
        &device,
    );
    tracing::info!(shape = ?input.dims(), "running forward pass");

    let output = model.forward(input)?;
    let [batch, width] = output.dims();

    if model.num_classes() == 0 {
        println!("feature mode: pooled features of width {width}");
        let features = output
            .powf_scalar(2.0)
            .sum_dim(1)
            .sqrt()
            .into_data()
            .to_vec::<f32>()
            .map_err(|err| anyhow!("{err:?}"))?;
        for (image, norm) in features.iter().enumerate() {
            println!("image {image}: feature norm {norm:.4}");
        }
        return Ok(());
    }

    let probs = softmax(output, 1)
        .into_data()
        .to_vec::<f32>()
        .map_err(|err| anyhow!("{err:?}"))?;
    for (image, row) in probs.chunks(width).take(batch).enumerate() {
        println!("image {image}:");
        for (class, prob) in top_k(row, cli.top_k) {
            println!("  class {class:>5}  p = {prob:.5}");
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    run(Cli::parse())
}
