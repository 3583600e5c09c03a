//! Builds a decoder from JSON configuration and prints the feature maps it
//! produces for random backbone features.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use burn::prelude::*;
use burn::tensor::ElementConversion;
use clap::Parser;
use vision_decoders::{build_decoder, DecoderType, L2Regularizer, ModelConfig};
use vision_decoders_demos::{
    dummy_features, init_demo, parse_input_specs, summarize, DemoBackend,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Build a decoder and summarize its output levels", long_about = None)]
struct Args {
    /// Path to the input specs JSON (level -> {channels, height?, width?})
    #[arg(short, long)]
    input_specs: PathBuf,

    /// Path to a model config JSON; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the decoder type of the config
    #[arg(short, long)]
    decoder: Option<String>,

    /// Batch size of the dummy features
    #[arg(short, long, default_value_t = 1)]
    batch: usize,

    /// Image size used to derive missing feature sizes
    #[arg(long, default_value_t = 512)]
    image_size: usize,

    /// L2 weight of the kernel regularizer
    #[arg(long)]
    l2: Option<f64>,
}

fn load_model_config(path: Option<&Path>) -> Result<ModelConfig> {
    match path {
        Some(path) => ModelConfig::load(path)
            .map_err(|err| anyhow!("{err:?}"))
            .with_context(|| format!("Failed to load model config from {}", path.display())),
        None => Ok(ModelConfig::new()),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let device = init_demo();

    let mut config = load_model_config(args.config.as_deref())?;
    if let Some(decoder) = args.decoder {
        let kind: DecoderType = decoder.parse()?;
        config.decoder.decoder_type = kind.to_string();
    }

    let json = std::fs::read_to_string(&args.input_specs).with_context(|| {
        format!(
            "Failed to read input specs from {}",
            args.input_specs.display()
        )
    })?;
    let input_specs = parse_input_specs(&json)?;

    let regularizer = args.l2.map(L2Regularizer::new);
    let Some(decoder) =
        build_decoder::<DemoBackend>(&input_specs, &config, regularizer, &device)?
    else {
        println!("Decoder: identity (backbone features are used as-is)");
        for (level, spec) in &input_specs {
            println!("level {level:>3}: {} channels", spec.channels);
        }
        return Ok(());
    };

    println!("Decoder: {}", decoder.decoder_type());
    println!("Parameters: {}", decoder.num_params());

    let features = dummy_features::<DemoBackend>(
        &input_specs,
        args.batch,
        args.image_size,
        &device,
    )?;
    let outputs = decoder.forward(features)?;
    for level in summarize(&outputs) {
        println!("{level}");
    }

    if let Some(loss) = decoder.regularization_loss() {
        println!("Regularization loss: {:.6}", loss.into_scalar().elem::<f64>());
    }

    Ok(())
}
