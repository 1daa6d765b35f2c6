use std::path::PathBuf;

use thiserror::Error;

use crate::data::Split;

pub type Result<T> = std::result::Result<T, DataError>;

#[derive(Debug, Error)]
pub enum DataError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} answered with HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("invalid corpus json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("special token {0:?} is not in the tokenizer vocabulary")]
    MissingSpecialToken(String),

    #[error("token id {token} at position {position} does not fit in u16 storage")]
    TokenOutOfRange { token: u32, position: usize },

    #[error("{}: {bytes} bytes is not a whole number of u16 tokens", .path.display())]
    MalformedTokenFile { path: PathBuf, bytes: u64 },

    #[error(
        "{split} split has {len} tokens, too small for max_seq_len={max_seq_len}; \
         a split needs at least two windows' worth of tokens"
    )]
    SplitTooSmall {
        split: Split,
        len: usize,
        max_seq_len: usize,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("loader worker {0} exited")]
    WorkerExited(usize),

    #[error("no download url configured (pass --url or set KAZKY_DOWNLOAD_URL)")]
    MissingDownloadUrl,

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),

    #[error("hugging face hub: {0}")]
    Hub(#[from] hf_hub::api::sync::ApiError),

    #[error("progress bar template: {0}")]
    ProgressTemplate(#[from] indicatif::style::TemplateError),
}

impl DataError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
