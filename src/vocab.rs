use crate::data::SequencePair;
use crate::error::{Result, Seq2SeqError};
use std::collections::{BTreeSet, HashMap};

/// Marks the beginning of every target sequence.
pub const START_MARKER: char = '\t';
/// Marks the end of every target sequence.
pub const END_MARKER: char = '\n';
/// Timesteps past a sequence's true length activate this character's slot.
pub const PAD_CHAR: char = ' ';

/// Sorted, deduplicated character alphabet with contiguous indices from 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CharVocab {
    name: &'static str,
    chars: Vec<char>,
    index: HashMap<char, usize>,
}

impl CharVocab {
    pub fn from_texts<'a>(name: &'static str, texts: impl IntoIterator<Item = &'a str>) -> Self {
        let set: BTreeSet<char> = texts.into_iter().flat_map(str::chars).collect();
        let chars: Vec<char> = set.into_iter().collect();
        let index = chars.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        Self { name, chars, index }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn index_of(&self, ch: char) -> Result<usize> {
        self.index
            .get(&ch)
            .copied()
            .ok_or(Seq2SeqError::UnknownCharacter {
                ch,
                vocab: self.name,
            })
    }

    pub fn char_at(&self, index: usize) -> Option<char> {
        self.chars.get(index).copied()
    }

    pub fn lookup(&self, index: usize) -> Result<char> {
        self.char_at(index).ok_or(Seq2SeqError::IndexOutOfVocab {
            index,
            vocab: self.name,
        })
    }

    pub fn pad_index(&self) -> Result<usize> {
        self.index
            .get(&PAD_CHAR)
            .copied()
            .ok_or(Seq2SeqError::MissingPadCharacter { vocab: self.name })
    }

    pub fn encode(&self, text: &str) -> Result<Vec<usize>> {
        text.chars().map(|c| self.index_of(c)).collect()
    }

    /// `(char, index)` pairs in index order, for logging.
    pub fn index_map(&self) -> Vec<(char, usize)> {
        self.chars().iter().copied().zip(0..).collect()
    }
}

/// Everything derived from the corpus that training and inference must agree on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrainingArtifacts {
    pub input_vocab: CharVocab,
    pub target_vocab: CharVocab,
    pub max_encoder_seq_length: usize,
    pub max_decoder_seq_length: usize,
}

impl TrainingArtifacts {
    pub fn build(pairs: &[SequencePair]) -> Result<Self> {
        if pairs.is_empty() {
            return Err(Seq2SeqError::EmptyCorpus);
        }
        let input_vocab = CharVocab::from_texts("input", pairs.iter().map(|p| p.input.as_str()));
        let target_vocab = CharVocab::from_texts("target", pairs.iter().map(|p| p.target.as_str()));
        let max_encoder_seq_length = pairs.iter().map(|p| p.input.chars().count()).max().unwrap_or(0);
        let max_decoder_seq_length = pairs.iter().map(|p| p.target.chars().count()).max().unwrap_or(0);
        // the encoder needs at least one timestep to produce a state
        if max_encoder_seq_length == 0 {
            return Err(Seq2SeqError::EmptyInputs);
        }
        Ok(Self {
            input_vocab,
            target_vocab,
            max_encoder_seq_length,
            max_decoder_seq_length,
        })
    }

    pub fn num_encoder_tokens(&self) -> usize {
        self.input_vocab.len()
    }

    pub fn num_decoder_tokens(&self) -> usize {
        self.target_vocab.len()
    }

    pub fn log_summary(&self, num_samples: usize) {
        tracing::info!("Number of samples: {}", num_samples);
        tracing::info!("Number of unique input tokens: {}", self.num_encoder_tokens());
        tracing::info!("Number of unique output tokens: {}", self.num_decoder_tokens());
        tracing::info!("Max sequence length for inputs: {}", self.max_encoder_seq_length);
        tracing::info!("Max sequence length for outputs: {}", self.max_decoder_seq_length);
        tracing::info!("Input token index: {:?}", self.input_vocab.index_map());
        tracing::info!("Target token index: {:?}", self.target_vocab.index_map());
    }
}
