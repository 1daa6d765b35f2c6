use std::path::{Path, PathBuf};

/// Where the BPE tokenizer definition comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenizerSource {
    /// A local `tokenizer.json`.
    File(PathBuf),
    /// `tokenizer.json` fetched from a Hugging Face Hub model repository.
    Hub { repo: String },
}

pub struct PipelineConfig {
    cache_dir: PathBuf,
    dataset: String,
    download_url: Option<String>,
    tokenizer: TokenizerSource,
    bos_token: String,
    eos_token: String,
    rank: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("data"),
            dataset: "tinykazky".to_string(),
            download_url: None,
            tokenizer: TokenizerSource::File(PathBuf::from("tokenizer.json")),
            bos_token: "<s>".to_string(),
            eos_token: "</s>".to_string(),
            rank: 0,
        }
    }
}

impl PipelineConfig {
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = dataset.into();
        self
    }

    pub fn with_download_url(mut self, url: Option<String>) -> Self {
        self.download_url = url;
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: TokenizerSource) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_special_tokens(mut self, bos: impl Into<String>, eos: impl Into<String>) -> Self {
        self.bos_token = bos.into();
        self.eos_token = eos.into();
        self
    }

    pub fn with_rank(mut self, rank: usize) -> Self {
        self.rank = rank;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn download_url(&self) -> Option<&str> {
        self.download_url.as_deref()
    }

    pub fn tokenizer(&self) -> &TokenizerSource {
        &self.tokenizer
    }

    pub fn bos_token(&self) -> &str {
        &self.bos_token
    }

    pub fn eos_token(&self) -> &str {
        &self.eos_token
    }

    /// Distributed process rank, mixed into every sampler seed.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn corpus_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}.json", self.dataset))
    }

    pub fn tokens_path(&self) -> PathBuf {
        tokens_path_for(&self.corpus_path())
    }
}

/// Sibling `.bin` path of a corpus file: `x.json` and `x.json.gz` both map to `x.bin`.
pub fn tokens_path_for(corpus: &Path) -> PathBuf {
    let mut path = corpus.to_path_buf();
    if path.extension().is_some_and(|ext| ext == "gz") {
        path.set_extension("");
    }
    path.set_extension("bin");
    path
}
