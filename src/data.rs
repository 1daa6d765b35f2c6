use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use memmap2::Mmap;
use rand::prelude::*;
use rand::rngs::StdRng;

use crate::error::{DataError, Result};

/// On-disk width of one token.
pub const TOKEN_BYTES: usize = std::mem::size_of::<u16>();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Validation,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => f.write_str("train"),
            Split::Validation => f.write_str("validation"),
        }
    }
}

impl FromStr for Split {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Split::Train),
            "validation" | "val" => Ok(Split::Validation),
            other => Err(DataError::invalid(format!(
                "unknown split {other:?}, expected train or validation"
            ))),
        }
    }
}

/// First validation index of a stream of `len` tokens: `floor(0.9 * len)`.
pub fn split_index(len: usize) -> usize {
    len / 10 * 9 + len % 10 * 9 / 10
}

/// Seed of the sampler owned by `worker_id` in process `rank`.
pub fn sampler_seed(worker_id: usize, rank: usize) -> u64 {
    42 + worker_id as u64 + 1337 * rank as u64
}

/// Read-only view over a range of the mapped token stream.
///
/// Clones share the same mapping; the map is unmapped when the last view is
/// dropped.
#[derive(Clone)]
pub struct TokenSlice {
    map: Arc<Mmap>,
    start: usize,
    len: usize,
}

impl TokenSlice {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Option<u16> {
        if index >= self.len {
            return None;
        }
        let at = (self.start + index) * TOKEN_BYTES;
        Some(u16::from_le_bytes([self.map[at], self.map[at + 1]]))
    }

    /// Copies tokens `[start, end)` of this view out of the map, or `None`
    /// if the range does not lie inside the view.
    pub fn copy_range(&self, start: usize, end: usize) -> Option<Vec<u32>> {
        if start > end || end > self.len {
            return None;
        }
        Some(self.decode(start, end))
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.decode(0, self.len)
    }

    fn decode(&self, start: usize, end: usize) -> Vec<u32> {
        let from = (self.start + start) * TOKEN_BYTES;
        let to = (self.start + end) * TOKEN_BYTES;
        self.map[from..to]
            .chunks_exact(TOKEN_BYTES)
            .map(|b| u16::from_le_bytes([b[0], b[1]]) as u32)
            .collect()
    }
}

/// A pretokenized `.bin` file mapped into memory.
#[derive(Clone)]
pub struct TokenFile {
    path: PathBuf,
    map: Arc<Mmap>,
}

impl TokenFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let bytes = file.metadata()?.len();
        if bytes % TOKEN_BYTES as u64 != 0 {
            return Err(DataError::MalformedTokenFile {
                path: path.to_path_buf(),
                bytes,
            });
        }
        // SAFETY: the map is read-only and never handed out mutably. Writers
        // replace the file by renaming a sibling over it, so the mapped inode
        // is never truncated or rewritten in place.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self {
            path: path.to_path_buf(),
            map: Arc::new(map),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.map.len() / TOKEN_BYTES
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> TokenSlice {
        TokenSlice {
            map: Arc::clone(&self.map),
            start: 0,
            len: self.len(),
        }
    }

    pub fn split(&self, split: Split) -> TokenSlice {
        let len = self.len();
        let boundary = split_index(len);
        let (start, len) = match split {
            Split::Train => (0, boundary),
            Split::Validation => (boundary, len - boundary),
        };
        TokenSlice {
            map: Arc::clone(&self.map),
            start,
            len,
        }
    }
}

/// One next-token prediction example.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub input: Vec<u32>,
    pub target: Vec<u32>,
}

/// Infinite, reshuffled-every-epoch stream of non-overlapping windows from
/// one split.
pub struct WindowSampler {
    tokens: TokenSlice,
    split: Split,
    max_seq_len: usize,
    num_batches: usize,
    seed: u64,
    rng: StdRng,
    order: Vec<usize>,
    cursor: usize,
    epoch: usize,
}

impl WindowSampler {
    pub fn new(
        file: &TokenFile,
        split: Split,
        max_seq_len: usize,
        worker_id: usize,
        rank: usize,
    ) -> Result<Self> {
        if max_seq_len == 0 {
            return Err(DataError::invalid("max_seq_len must be greater than zero"));
        }
        let tokens = file.split(split);
        // the trailing partial window is always dropped
        let num_batches = (tokens.len() / max_seq_len).saturating_sub(1);
        if num_batches == 0 {
            return Err(DataError::SplitTooSmall {
                split,
                len: tokens.len(),
                max_seq_len,
            });
        }
        let seed = sampler_seed(worker_id, rank);
        tracing::info!(
            %split,
            seed,
            num_batches,
            "created window sampler over {}",
            file.path().display()
        );
        Ok(Self {
            tokens,
            split,
            max_seq_len,
            num_batches,
            seed,
            rng: StdRng::seed_from_u64(seed),
            order: Vec::new(),
            cursor: 0,
            epoch: 0,
        })
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    /// Windows per epoch.
    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    /// Number of shuffles performed so far.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    fn reshuffle(&mut self) {
        self.order.clear();
        self.order.extend(0..self.num_batches);
        self.order.shuffle(&mut self.rng);
        self.cursor = 0;
        self.epoch += 1;
        tracing::debug!(split = %self.split, seed = self.seed, epoch = self.epoch, "reshuffled windows");
    }

    /// `ix < num_batches` keeps the window inside the split.
    fn window(&self, ix: usize) -> Option<Window> {
        let start = ix * self.max_seq_len;
        let end = start + self.max_seq_len + 1;
        let chunk = self.tokens.copy_range(start, end)?;
        Some(Window {
            input: chunk[..self.max_seq_len].to_vec(),
            target: chunk[1..].to_vec(),
        })
    }
}

impl Iterator for WindowSampler {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.cursor == self.order.len() {
            self.reshuffle();
        }
        let ix = self.order[self.cursor];
        self.cursor += 1;
        self.window(ix)
    }
}
