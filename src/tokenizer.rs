use std::path::Path;

use hf_hub::api::sync::Api;
use tokenizers::Tokenizer;

use crate::config::{PipelineConfig, TokenizerSource};
use crate::error::{DataError, Result};

/// Text to token ids, optionally framed by sequence markers.
pub trait Encode {
    fn encode(&self, text: &str, bos: bool, eos: bool) -> Result<Vec<u32>>;

    fn vocab_size(&self) -> usize;
}

/// A Hugging Face BPE tokenizer with explicit BOS/EOS handling.
pub struct BpeTokenizer {
    inner: Tokenizer,
    bos_token: String,
    eos_token: String,
}

impl BpeTokenizer {
    pub fn new(inner: Tokenizer, bos_token: impl Into<String>, eos_token: impl Into<String>) -> Self {
        Self {
            inner,
            bos_token: bos_token.into(),
            eos_token: eos_token.into(),
        }
    }

    pub fn from_file(
        path: impl AsRef<Path>,
        bos_token: impl Into<String>,
        eos_token: impl Into<String>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let inner = Tokenizer::from_file(path)
            .map_err(|e| DataError::Tokenizer(format!("load {}: {e}", path.display())))?;
        Ok(Self::new(inner, bos_token, eos_token))
    }

    pub fn from_config(cfg: &PipelineConfig) -> Result<Self> {
        match cfg.tokenizer() {
            TokenizerSource::File(path) => Self::from_file(path, cfg.bos_token(), cfg.eos_token()),
            TokenizerSource::Hub { repo } => {
                tracing::info!("fetching tokenizer.json from {repo}");
                let path = Api::new()?.model(repo.clone()).get("tokenizer.json")?;
                Self::from_file(path, cfg.bos_token(), cfg.eos_token())
            }
        }
    }

    fn special_id(&self, token: &str) -> Result<u32> {
        self.inner
            .token_to_id(token)
            .ok_or_else(|| DataError::MissingSpecialToken(token.to_string()))
    }
}

impl Encode for BpeTokenizer {
    fn encode(&self, text: &str, bos: bool, eos: bool) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| DataError::Tokenizer(e.to_string()))?;
        let mut ids = Vec::with_capacity(encoding.len() + 2);
        if bos {
            ids.push(self.special_id(&self.bos_token)?);
        }
        ids.extend_from_slice(encoding.get_ids());
        if eos {
            ids.push(self.special_id(&self.eos_token)?);
        }
        Ok(ids)
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}
