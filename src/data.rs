use crate::error::{Result, Seq2SeqError};
use crate::vocab::{CharVocab, TrainingArtifacts, END_MARKER, START_MARKER};
use candle_core::{Device, Tensor};
use flate2::bufread::GzDecoder;
use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;
use std::path::Path;

/// One training example. `target` already carries the start and end markers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequencePair {
    pub input: String,
    pub target: String,
}

impl SequencePair {
    pub fn new(input: &str, raw_target: &str) -> Self {
        let mut target = String::with_capacity(raw_target.len() + 2);
        target.push(START_MARKER);
        target.push_str(raw_target);
        target.push(END_MARKER);
        Self {
            input: input.to_string(),
            target,
        }
    }
}

pub(crate) fn extract_data(filepath: &Path) -> Result<String> {
    let file = File::open(filepath)?;
    let mut bufreader = BufReader::new(file);
    let mut text = String::new();
    if filepath.extension().is_some_and(|ext| ext == "gz") {
        let mut gz = GzDecoder::new(bufreader);
        gz.read_to_string(&mut text)?;
    } else {
        bufreader.read_to_string(&mut text)?;
    }
    Ok(text)
}

/// Splits raw corpus text into at most `num_samples` pairs, one per
/// `input<TAB>target` line.
pub fn parse_corpus(text: &str, num_samples: usize) -> Result<Vec<SequencePair>> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    let mut pairs = Vec::with_capacity(lines.len().min(num_samples));
    for (line_no, line) in lines.into_iter().take(num_samples).enumerate() {
        let fields: Vec<&str> = line.split('\t').collect();
        match fields.as_slice() {
            [input, target] => pairs.push(SequencePair::new(input, target)),
            _ => {
                return Err(Seq2SeqError::MalformedLine {
                    line: line_no + 1,
                    separators: fields.len() - 1,
                })
            }
        }
    }

    if pairs.is_empty() {
        return Err(Seq2SeqError::EmptyCorpus);
    }
    Ok(pairs)
}

/// Reads a tab-separated corpus, gzip-compressed when the path ends in `.gz`.
pub fn read_corpus(filepath: impl AsRef<Path>, num_samples: usize) -> Result<Vec<SequencePair>> {
    let text = extract_data(filepath.as_ref())?;
    parse_corpus(&text, num_samples)
}

/// Writes one example's one-hot rows into `row`, which spans
/// `max_len * width` floats. Timesteps past `indices` get the pad slot.
fn fill_one_hot(row: &mut [f32], indices: &[usize], width: usize, vocab: &CharVocab) -> Result<()> {
    let steps = row.len() / width;
    for t in 0..steps {
        let slot = match indices.get(t) {
            Some(&idx) => idx,
            None => vocab.pad_index()?,
        };
        row[t * width + slot] = 1.0;
    }
    Ok(())
}

/// The three training tensors, shaped `(examples, timesteps, vocab)`.
pub struct EncodedCorpus {
    pub encoder_input: Tensor,
    pub decoder_input: Tensor,
    pub decoder_target: Tensor,
}

impl EncodedCorpus {
    pub fn encode(
        pairs: &[SequencePair],
        artifacts: &TrainingArtifacts,
        device: &Device,
    ) -> Result<Self> {
        let n = pairs.len();
        let enc_len = artifacts.max_encoder_seq_length;
        let dec_len = artifacts.max_decoder_seq_length;
        let enc_width = artifacts.num_encoder_tokens();
        let dec_width = artifacts.num_decoder_tokens();

        let mut encoder_input = vec![0f32; n * enc_len * enc_width];
        let mut decoder_input = vec![0f32; n * dec_len * dec_width];
        let mut decoder_target = vec![0f32; n * dec_len * dec_width];

        let enc_rows = encoder_input.chunks_mut(enc_len * enc_width);
        let dec_rows = decoder_input
            .chunks_mut(dec_len * dec_width)
            .zip(decoder_target.chunks_mut(dec_len * dec_width));

        for ((pair, enc_row), (dec_in_row, dec_tgt_row)) in pairs.iter().zip(enc_rows).zip(dec_rows) {
            let input_idx = artifacts.input_vocab.encode(&pair.input)?;
            let target_idx = artifacts.target_vocab.encode(&pair.target)?;
            fill_one_hot(enc_row, &input_idx, enc_width, &artifacts.input_vocab)?;
            fill_one_hot(dec_in_row, &target_idx, dec_width, &artifacts.target_vocab)?;
            // one step ahead, so the start marker never shows up here
            let shifted = target_idx.get(1..).unwrap_or(&[]);
            fill_one_hot(dec_tgt_row, shifted, dec_width, &artifacts.target_vocab)?;
        }

        Ok(Self {
            encoder_input: Tensor::from_vec(encoder_input, (n, enc_len, enc_width), device)?,
            decoder_input: Tensor::from_vec(decoder_input, (n, dec_len, dec_width), device)?,
            decoder_target: Tensor::from_vec(decoder_target, (n, dec_len, dec_width), device)?,
        })
    }

    pub fn num_examples(&self) -> usize {
        self.encoder_input.dims()[0]
    }

    /// Encoder input for example `index`, shaped `(1, timesteps, vocab)`.
    pub fn encoder_example(&self, index: usize) -> Result<Tensor> {
        Ok(self.encoder_input.narrow(0, index, 1)?)
    }

    /// Encodes a held-out string with the training-time input vocabulary.
    pub fn encode_input(
        text: &str,
        artifacts: &TrainingArtifacts,
        device: &Device,
    ) -> Result<Tensor> {
        let enc_len = artifacts.max_encoder_seq_length;
        let width = artifacts.num_encoder_tokens();
        let mut indices = artifacts.input_vocab.encode(text)?;
        if indices.len() > enc_len {
            tracing::warn!(
                "input of {} chars truncated to {} timesteps",
                indices.len(),
                enc_len
            );
            indices.truncate(enc_len);
        }
        let mut row = vec![0f32; enc_len * width];
        fill_one_hot(&mut row, &indices, width, &artifacts.input_vocab)?;
        Ok(Tensor::from_vec(row, (1, enc_len, width), device)?)
    }
}
