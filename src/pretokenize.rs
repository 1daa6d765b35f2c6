use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::bufread::GzDecoder;
use serde::Deserialize;

use crate::config::tokens_path_for;
use crate::error::{DataError, Result};
use crate::tokenizer::Encode;

/// One corpus record; only the paragraphs are kept.
#[derive(Debug, Deserialize)]
pub struct Record {
    pub text: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PretokenizeSummary {
    pub output: PathBuf,
    pub records: usize,
    pub paragraphs: usize,
    pub tokens: usize,
}

fn read_corpus(path: &Path) -> Result<Vec<Record>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut raw = Vec::new();
    if path.extension().is_some_and(|ext| ext == "gz") {
        GzDecoder::new(reader).read_to_end(&mut raw)?;
    } else {
        reader.read_to_end(&mut raw)?;
    }
    Ok(serde_json::from_slice(&raw)?)
}

/// Narrows token ids to the u16 storage width, refusing ids that don't fit.
pub fn narrow_tokens(ids: &[u32]) -> Result<Vec<u16>> {
    ids.iter()
        .enumerate()
        .map(|(position, &token)| {
            u16::try_from(token).map_err(|_| DataError::TokenOutOfRange { token, position })
        })
        .collect()
}

/// Writes `tokens` as raw little-endian `u16` to `path`.
///
/// The bytes go to a sibling `.tmp` file that is renamed over `path`, so a
/// process that still maps the old file keeps reading intact data.
pub fn write_tokens(path: &Path, tokens: &[u16]) -> Result<()> {
    let tmp = path.with_extension("bin.tmp");
    if let Err(err) = write_le(&tmp, tokens) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn write_le(path: &Path, tokens: &[u16]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for t in tokens {
        out.write_all(&t.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

/// Tokenizes every paragraph of the corpus at `corpus_path` into one flat
/// stream and writes it next to the corpus as `<name>.bin`, replacing any
/// previous output.
pub fn pretokenize(corpus_path: &Path, tokenizer: &impl Encode) -> Result<PretokenizeSummary> {
    if tokenizer.vocab_size() > u16::MAX as usize + 1 {
        tracing::warn!(
            vocab_size = tokenizer.vocab_size(),
            "vocabulary exceeds u16 storage; out-of-range ids will be rejected"
        );
    }

    let records = read_corpus(corpus_path)?;
    let mut all_tokens: Vec<u32> = Vec::new();
    let mut paragraphs = 0;
    for record in &records {
        for paragraph in &record.text {
            let ids = tokenizer.encode(paragraph.trim(), true, false)?;
            all_tokens.extend(ids);
            paragraphs += 1;
        }
    }
    let tokens = narrow_tokens(&all_tokens)?;
    tracing::info!("Total tokens: {}", tokens.len());

    let output = tokens_path_for(corpus_path);
    write_tokens(&output, &tokens)?;
    tracing::info!("Saved {}", output.display());

    Ok(PretokenizeSummary {
        output,
        records: records.len(),
        paragraphs,
        tokens: tokens.len(),
    })
}
