use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tinykazky::{pipeline, PipelineConfig, Split, TokenizerSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Stage {
    /// Fetch the raw JSON corpus into the cache directory
    Download,
    /// Tokenize the cached corpus into a flat u16 `.bin` stream
    Pretokenize,
    /// PUT the token stream to --upload-url
    Upload,
    /// Print SHA-256 (not MD5) digests of the cached artifacts
    Checksum,
    /// Pull a few batches from the sampler and log them
    Inspect,
}

#[derive(Parser, Debug)]
#[command(name = "tinykazky", version, about = "Download, pretokenize and sample a text corpus")]
struct Cli {
    /// Pipeline stage to run
    #[arg(value_enum)]
    stage: Stage,

    #[arg(long, default_value = "data")]
    cache_dir: PathBuf,

    /// Base name of the cached `.json`/`.bin` files
    #[arg(long, default_value = "tinykazky")]
    dataset: String,

    /// Corpus download url
    #[arg(long, env = "KAZKY_DOWNLOAD_URL")]
    url: Option<String>,

    /// Local tokenizer.json
    #[arg(long, default_value = "tokenizer.json", conflicts_with = "tokenizer_repo")]
    tokenizer: PathBuf,

    /// Hugging Face Hub model repository to take tokenizer.json from
    #[arg(long)]
    tokenizer_repo: Option<String>,

    #[arg(long, default_value = "<s>")]
    bos_token: String,

    #[arg(long, default_value = "</s>")]
    eos_token: String,

    /// Destination of the `upload` stage
    #[arg(long)]
    upload_url: Option<String>,

    /// Distributed process rank, mixed into sampler seeds
    #[arg(long, default_value_t = 0)]
    rank: usize,

    #[arg(long, default_value = "train")]
    split: Split,

    #[arg(long, default_value_t = 8)]
    batch_size: usize,

    #[arg(long, default_value_t = 256)]
    max_seq_len: usize,

    #[arg(long, default_value_t = 0)]
    num_workers: usize,

    /// Batches pulled by `inspect`
    #[arg(long, default_value_t = 4)]
    steps: usize,
}

impl From<&Cli> for PipelineConfig {
    fn from(cli: &Cli) -> Self {
        let tokenizer = match &cli.tokenizer_repo {
            Some(repo) => TokenizerSource::Hub { repo: repo.clone() },
            None => TokenizerSource::File(cli.tokenizer.clone()),
        };
        PipelineConfig::default()
            .with_cache_dir(&cli.cache_dir)
            .with_dataset(&cli.dataset)
            .with_download_url(cli.url.clone())
            .with_tokenizer(tokenizer)
            .with_special_tokens(&cli.bos_token, &cli.eos_token)
            .with_rank(cli.rank)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tinykazky=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = PipelineConfig::from(&cli);

    match cli.stage {
        Stage::Download => {
            pipeline::download(&cfg).context("download failed")?;
        }
        Stage::Pretokenize => {
            let summary = pipeline::pretokenize(&cfg).context("pretokenize failed")?;
            println!("{} tokens written to {}", summary.tokens, summary.output.display());
        }
        Stage::Upload => {
            let url = cli
                .upload_url
                .as_deref()
                .context("the upload stage needs --upload-url")?;
            pipeline::upload(&cfg, url).context("upload failed")?;
        }
        Stage::Checksum => {
            for (path, digest) in pipeline::checksum(&cfg)? {
                println!("{digest}  {}", path.display());
            }
        }
        Stage::Inspect => {
            pipeline::inspect(
                &cfg,
                cli.split,
                cli.batch_size,
                cli.max_seq_len,
                cli.num_workers,
                cli.steps,
            )
            .context("inspect failed")?;
        }
    }
    Ok(())
}
