//! Command-line front end for one-shot GPT-2 text continuation.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use talkback::generate::{GenerationRequest, TextGenerator, DEFAULT_MODEL_REPO};

/// Continue a prompt with a pretrained GPT-2 model.
#[derive(Debug, Parser)]
#[command(name = "generate", version, about)]
struct Args {
    /// Text to continue.
    #[arg(long)]
    prompt: String,

    /// Hugging Face Hub repository holding the checkpoint.
    #[arg(long, default_value = DEFAULT_MODEL_REPO)]
    model: String,

    /// Upper bound on prompt plus continuation, in tokens.
    #[arg(long, default_value_t = 100)]
    max_length: usize,

    #[arg(long, default_value_t = 5)]
    num_beams: usize,

    /// Size of n-grams that may appear only once; 0 disables the ban.
    #[arg(long, default_value_t = 2)]
    no_repeat_ngram_size: usize,

    /// Keep searching after `num-beams` finished hypotheses exist.
    #[arg(long)]
    no_early_stopping: bool,

    /// Exponent on the generated length when ranking finished sequences;
    /// values above 1.0 favour longer continuations.
    #[arg(long, default_value_t = 1.0)]
    length_penalty: f32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut generator = TextGenerator::from_pretrained(&args.model)
        .with_context(|| format!("Failed to load model {}", args.model))?;
    let request = GenerationRequest::new(args.prompt)
        .with_max_length(args.max_length)
        .with_num_beams(args.num_beams)
        .with_no_repeat_ngram_size(args.no_repeat_ngram_size)
        .with_early_stopping(!args.no_early_stopping)
        .with_length_penalty(args.length_penalty);
    let text = generator
        .generate(&request)
        .with_context(|| "Text generation failed")?;
    println!("{text}");
    Ok(())
}
