//! One entry point per CLI stage.

use std::fs;
use std::path::PathBuf;

use candle_core::Device;

use crate::acquire;
use crate::checksum::sha256_file;
use crate::config::PipelineConfig;
use crate::data::Split;
use crate::error::{DataError, Result};
use crate::loader::iter_batches;
use crate::pretokenize::{self, PretokenizeSummary};
use crate::tokenizer::BpeTokenizer;

/// Fetches the raw corpus into the cache directory.
pub fn download(cfg: &PipelineConfig) -> Result<PathBuf> {
    fs::create_dir_all(cfg.cache_dir())?;
    let url = cfg.download_url().ok_or(DataError::MissingDownloadUrl)?;
    let destination = cfg.corpus_path();
    acquire::fetch(url, &destination)?;
    Ok(destination)
}

pub fn pretokenize(cfg: &PipelineConfig) -> Result<PretokenizeSummary> {
    let tokenizer = BpeTokenizer::from_config(cfg)?;
    pretokenize::pretokenize(&cfg.corpus_path(), &tokenizer)
}

pub fn upload(cfg: &PipelineConfig, url: &str) -> Result<()> {
    acquire::put(&cfg.tokens_path(), url)
}

/// SHA-256 of whichever pipeline artifacts are present.
pub fn checksum(cfg: &PipelineConfig) -> Result<Vec<(PathBuf, String)>> {
    let mut sums = Vec::new();
    for path in [cfg.corpus_path(), cfg.tokens_path()] {
        if path.exists() {
            let digest = sha256_file(&path)?;
            tracing::debug!("{}  {}", digest, path.display());
            sums.push((path, digest));
        }
    }
    Ok(sums)
}

/// Pulls `steps` batches and logs their shape and leading tokens.
pub fn inspect(
    cfg: &PipelineConfig,
    split: Split,
    batch_size: usize,
    max_seq_len: usize,
    num_workers: usize,
    steps: usize,
) -> Result<()> {
    let device = Device::cuda_if_available(0)?;
    let batches = iter_batches(cfg, split, batch_size, max_seq_len, &device, num_workers)?;
    for (step, batch) in batches.take(steps).enumerate() {
        let (x, y) = batch?;
        let head: Vec<u32> = x.get(0)?.narrow(0, 0, max_seq_len.min(8))?.to_vec1()?;
        tracing::info!(step, shape = ?x.dims(), target_shape = ?y.dims(), ?head, "batch");
    }
    Ok(())
}
