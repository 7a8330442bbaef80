mod corpus;
mod data;
mod decode;
mod error;
mod generate;
mod grammar;
mod model;
mod train;
mod vocab;

use crate::data::{EncodedCorpus, SequencePair};
use crate::generate::{generate, GenerateConfig};
use crate::model::{Seq2SeqConfig, Seq2SeqParameters};
use crate::train::{training_loop, TrainConfig};
use crate::vocab::TrainingArtifacts;
use anyhow::Context;
use candle_core::Device;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Character-level encoder-decoder that learns to finish sentences.
#[derive(Parser, Debug)]
#[command(name = "char-seq2seq", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train on the corpus, save the model, then generate completions
    Train(TrainArgs),
    /// Load a saved model and generate completions
    Generate(CorpusArgs),
    /// Write a random relative-clause corpus
    BuildCorpus(BuildCorpusArgs),
    /// Score generated sentences for word order and agreement
    Evaluate(EvaluateArgs),
}

#[derive(Args, Debug)]
struct BuildCorpusArgs {
    #[arg(long, default_value = "dataset.txt")]
    output: PathBuf,

    #[arg(long, default_value_t = 10000)]
    num_sentences: usize,

    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    /// A `_gen.txt` file written by `train` or `generate`
    path: PathBuf,
}

#[derive(Args, Debug)]
struct CorpusArgs {
    /// Tab-separated `input<TAB>target` file, optionally gzipped
    #[arg(long, default_value = "dataset.txt")]
    data_path: PathBuf,

    /// Maximum number of corpus lines to use
    #[arg(long, default_value_t = 10000)]
    num_samples: usize,

    /// Where the trained weights are saved to / loaded from
    #[arg(long, default_value = "s2s.safetensors")]
    model_path: PathBuf,

    /// Number of corpus inputs to complete after training
    #[arg(long, default_value_t = GenerateConfig::default().num_generate)]
    num_generate: usize,

    /// Directory receiving the timestamped `_gen.txt` file
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Run on the CPU even when CUDA is available
    #[arg(long)]
    cpu: bool,
}

#[derive(Args, Debug)]
struct TrainArgs {
    #[command(flatten)]
    corpus: CorpusArgs,

    #[arg(long, default_value_t = TrainConfig::default().batch_size)]
    batch_size: usize,

    #[arg(long, default_value_t = TrainConfig::default().epochs)]
    epochs: usize,

    /// Width of the recurrent hidden and cell state
    #[arg(long, default_value_t = TrainConfig::default().latent_dim)]
    latent_dim: usize,

    /// Fraction of examples, taken from the end, held out for validation
    #[arg(long, default_value_t = TrainConfig::default().validation_split)]
    validation_split: f64,

    #[arg(long, default_value_t = TrainConfig::default().learning_rate)]
    learning_rate: f64,

    /// Seed for minibatch shuffling
    #[arg(long)]
    seed: Option<u64>,
}

impl From<&TrainArgs> for TrainConfig {
    fn from(a: &TrainArgs) -> Self {
        TrainConfig {
            batch_size: a.batch_size,
            epochs: a.epochs,
            latent_dim: a.latent_dim,
            learning_rate: a.learning_rate,
            validation_split: a.validation_split,
            seed: a.seed,
        }
    }
}

impl From<&CorpusArgs> for GenerateConfig {
    fn from(a: &CorpusArgs) -> Self {
        GenerateConfig {
            num_generate: a.num_generate,
            output_dir: a.output_dir.clone(),
        }
    }
}

struct Prepared {
    device: Device,
    pairs: Vec<SequencePair>,
    artifacts: TrainingArtifacts,
    encoded: EncodedCorpus,
}

fn prepare(args: &CorpusArgs) -> anyhow::Result<Prepared> {
    let device = if args.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };
    let pairs = data::read_corpus(&args.data_path, args.num_samples)
        .with_context(|| format!("Cannot read corpus '{}'", args.data_path.display()))?;
    let artifacts = TrainingArtifacts::build(&pairs)?;
    artifacts.log_summary(pairs.len());
    let encoded = EncodedCorpus::encode(&pairs, &artifacts, &device)?;
    Ok(Prepared {
        device,
        pairs,
        artifacts,
        encoded,
    })
}

fn run_train(args: &TrainArgs) -> anyhow::Result<()> {
    let p = prepare(&args.corpus)?;
    let train_cfg = TrainConfig::from(args);
    let params = Seq2SeqParameters::new(Seq2SeqConfig::new(&p.artifacts, train_cfg.latent_dim), &p.device)?;
    let history = training_loop(&params, &p.encoded, &train_cfg)?;
    if let Some(last) = history.last() {
        tracing::info!(
            "Finished {} epochs: loss {:.4}, accuracy {:.4}, val_loss {:?}, val_accuracy {:?}",
            last.epoch,
            last.train_loss,
            last.train_accuracy,
            last.val_loss,
            last.val_accuracy
        );
    }
    params
        .save(&args.corpus.model_path, &p.artifacts)
        .with_context(|| format!("Cannot save model to '{}'", args.corpus.model_path.display()))?;

    let gen_cfg = GenerateConfig::from(&args.corpus);
    let out = generate(&params, &p.artifacts, &p.pairs, &p.encoded, &gen_cfg, &p.device)?;
    tracing::info!("Wrote {} sentences to '{}'", out.sentences.len(), out.path.display());
    Ok(())
}

fn run_generate(args: &CorpusArgs) -> anyhow::Result<()> {
    let p = prepare(args)?;
    let params = Seq2SeqParameters::load(&args.model_path, &p.artifacts, &p.device)
        .with_context(|| format!("Cannot load model from '{}'", args.model_path.display()))?;
    let gen_cfg = GenerateConfig::from(args);
    let out = generate(&params, &p.artifacts, &p.pairs, &p.encoded, &gen_cfg, &p.device)?;
    tracing::info!("Wrote {} sentences to '{}'", out.sentences.len(), out.path.display());
    Ok(())
}

fn run_build_corpus(args: &BuildCorpusArgs) -> anyhow::Result<()> {
    corpus::write_corpus(&args.output, args.num_sentences, args.seed)
        .with_context(|| format!("Cannot write corpus '{}'", args.output.display()))?;
    Ok(())
}

fn run_evaluate(args: &EvaluateArgs) -> anyhow::Result<()> {
    let score = grammar::score_file(&args.path)
        .with_context(|| format!("Cannot read '{}'", args.path.display()))?;
    println!(
        "tested {}, word order {:.2}%, grammatical {:.2}%",
        score.tested,
        score.word_order_pct(),
        score.grammatical_pct()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("char_seq2seq=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Train(args) => run_train(args),
        Commands::Generate(args) => run_generate(args),
        Commands::BuildCorpus(args) => run_build_corpus(args),
        Commands::Evaluate(args) => run_evaluate(args),
    }
}
