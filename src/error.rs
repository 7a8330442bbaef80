use thiserror::Error;

#[derive(Error, Debug)]
pub enum Seq2SeqError {
    #[error("line {line}: expected exactly one tab separator, found {separators}")]
    MalformedLine { line: usize, separators: usize },

    #[error("character {ch:?} is not part of the {vocab} vocabulary")]
    UnknownCharacter { ch: char, vocab: &'static str },

    #[error("the {vocab} vocabulary has no ' ' character to pad with")]
    MissingPadCharacter { vocab: &'static str },

    #[error("corpus contains no usable lines")]
    EmptyCorpus,

    #[error("every input text in the corpus is empty")]
    EmptyInputs,

    #[error("index {index} is outside the {vocab} vocabulary")]
    IndexOutOfVocab { index: usize, vocab: &'static str },

    #[error("saved model does not match the current corpus: {0}")]
    IncompatibleModel(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization/Deserialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Seq2SeqError>;
