//! ctxviz CLI: plot a word's contextual embeddings and its substitutes

use anyhow::{bail, Context, Result};
use clap::Parser;
use ctxviz::{
    viz_with_config, ContextModel, Corpus, EmbeddingExtractor, MaskedLanguageModel, PlotDims,
    ReductionMethod, VizConfig, VizRequest,
};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "ctxviz")]
#[command(about = "Visualize contextual word embeddings from a masked language model")]
#[command(version)]
struct Cli {
    /// Focus word to locate in every sentence
    #[arg(short, long)]
    word: String,

    /// Sentence containing the word (repeat for several contexts)
    #[arg(short, long = "sentence")]
    sentences: Vec<String>,

    /// JSON file mapping words to sentences; used when no --sentence is given
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Reduction technique: pca or tsne
    #[arg(long, default_value = "pca")]
    method: ReductionMethod,

    /// Neighbors kept per sentence
    #[arg(short, long, default_value_t = 5)]
    neighbors: usize,

    /// Plot type: 2d or 3d
    #[arg(short, long, default_value = "3D")]
    plot: PlotDims,

    /// Model ID from `HuggingFace` or a local checkpoint directory (overrides config)
    #[arg(short, long)]
    model: Option<String>,

    /// Force CPU mode
    #[arg(long)]
    cpu: bool,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output file (.html, .json or .svg)
    #[arg(short, long, default_value = "ctxviz.html")]
    output: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &cli.config {
        Some(path) => VizConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => VizConfig::default(),
    };
    if let Some(model) = &cli.model {
        config.model_id = model.clone();
    }
    config.force_cpu |= cli.cpu;

    let sentences = if !cli.sentences.is_empty() {
        cli.sentences.clone()
    } else {
        let corpus = match &cli.corpus {
            Some(path) => Corpus::load(path)
                .with_context(|| format!("failed to load corpus {}", path.display()))?,
            None => Corpus::presets(),
        };
        corpus.sentences_for(&cli.word)?.to_vec()
    };
    if sentences.is_empty() {
        bail!("no sentences for '{}'", cli.word);
    }

    let request = VizRequest {
        word: cli.word.clone(),
        sentences,
        method: cli.method,
        num_neighbors: cli.neighbors,
        plot: cli.plot,
    };
    request.validate()?;

    println!("=== ctxviz: contextual embedding visualizer ===");
    println!("Model:     {}", config.model_id);
    println!("Word:      {}", request.word);
    println!("Contexts:  {}", request.sentences.len());
    println!("Method:    {}", request.method);
    println!("Plot:      {}", request.plot);
    println!("Output:    {}", cli.output.display());
    if config.force_cpu {
        println!("Mode:      CPU (forced)");
    }

    // Load model
    info!("Loading model...");
    let model = ContextModel::from_pretrained_with_device(
        &config.model_id,
        Some(config.force_cpu),
        config.tokenizer_options(),
    )?;
    info!(
        "Model: {} layers, {} hidden",
        model.n_layers(),
        model.d_model()
    );

    let extractor = EmbeddingExtractor::with_options(model, config.extractor_options());
    let figure = viz_with_config(&extractor, &request, &config)?;

    println!("\n=== Points ===");
    for (i, focus) in figure.focus_traces().enumerate() {
        let neighbors: Vec<&str> = figure
            .neighbor_traces(i)
            .filter_map(|t| t.text.as_deref())
            .collect();
        println!(
            "{}: {}",
            focus.name.as_deref().unwrap_or_default(),
            neighbors.join(", ")
        );
    }

    figure
        .save(&cli.output)
        .with_context(|| format!("failed to write {}", cli.output.display()))?;

    Ok(())
}
