//! Corpus acquisition, pretokenization and windowed sampling for language
//! model training.
//!
//! The pipeline is `download -> pretokenize -> sample`: a JSON corpus is
//! fetched into a cache directory, flattened into a raw little-endian `u16`
//! token stream (`<name>.bin`), and that stream is memory-mapped and served as
//! shuffled `(input, target)` windows by [`data::WindowSampler`] or as device
//! tensors by [`loader::iter_batches`].

pub mod acquire;
pub mod checksum;
pub mod config;
pub mod data;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod pretokenize;
pub mod tokenizer;

pub use config::{PipelineConfig, TokenizerSource};
pub use data::{Split, TokenFile, Window, WindowSampler};
pub use error::{DataError, Result};
pub use loader::{iter_batches, BatchIter};
pub use tokenizer::{BpeTokenizer, Encode};
