use crate::data::{EncodedCorpus, SequencePair};
use crate::decode::GreedyDecoder;
use crate::model::Seq2SeqParameters;
use crate::vocab::{TrainingArtifacts, END_MARKER};
use anyhow::Context;
use candle_core::Device;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct GenerateConfig {
    pub num_generate: usize,
    pub output_dir: PathBuf,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            num_generate: 1000,
            output_dir: PathBuf::from("."),
        }
    }
}

pub struct Generation {
    pub path: PathBuf,
    pub sentences: Vec<String>,
}

/// `<local time>_<fname>`, unique per second.
pub fn timestamped(fname: &str) -> String {
    format!("{}_{}", chrono::Local::now().format("%Y-%m-%d-%H-%M-%S"), fname)
}

/// Drops the input's last character and appends the continuation.
pub fn complete_sentence(input: &str, decoded: &str) -> String {
    let mut chars = input.chars();
    chars.next_back();
    let mut sentence = chars.as_str().to_string();
    sentence.push_str(decoded);
    sentence
}

/// Decodes the first `cfg.num_generate` corpus inputs and appends the
/// completed sentences to a fresh timestamped file in `cfg.output_dir`.
pub fn generate(
    params: &Seq2SeqParameters,
    artifacts: &TrainingArtifacts,
    pairs: &[SequencePair],
    data: &EncodedCorpus,
    cfg: &GenerateConfig,
    device: &Device,
) -> anyhow::Result<Generation> {
    let path = cfg.output_dir.join(timestamped("gen.txt"));
    let sentences = generate_into(&path, params, artifacts, pairs, data, cfg.num_generate, device)?;
    Ok(Generation { path, sentences })
}

fn generate_into(
    path: &Path,
    params: &Seq2SeqParameters,
    artifacts: &TrainingArtifacts,
    pairs: &[SequencePair],
    data: &EncodedCorpus,
    num_generate: usize,
    device: &Device,
) -> anyhow::Result<Vec<String>> {
    let decoder = GreedyDecoder::new(params, artifacts, device)?;
    let count = num_generate.min(pairs.len()).min(data.num_examples());
    tracing::info!("Generating {} sentences into '{}'", count, path.display());

    let mut sentences = Vec::with_capacity(count);
    for (seq_index, pair) in pairs.iter().take(count).enumerate() {
        let input_seq = data.encoder_example(seq_index)?;
        let decoded = decoder.decode(&input_seq)?;
        let sentence = complete_sentence(&pair.input, &decoded);

        let mut outf = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Cannot open output file '{}'", path.display()))?;
        outf.write_all(sentence.as_bytes())?;
        if !sentence.ends_with(END_MARKER) {
            outf.write_all(b"\n")?;
        }

        tracing::info!("Input sentence: {}", pair.input);
        tracing::info!("Decoded sentence: {}", decoded);
        sentences.push(sentence);
    }
    Ok(sentences)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_corpus;
    use crate::model::Seq2SeqConfig;

    #[test]
    fn test_complete_sentence() {
        assert_eq!(complete_sentence("the dog ", "barked\n"), "the dogbarked\n");
        assert_eq!(complete_sentence("héllo ", "x"), "héllox");
        assert_eq!(complete_sentence("", "abc"), "abc");
    }

    #[test]
    fn test_timestamped_name() {
        let name = timestamped("gen.txt");
        assert!(name.ends_with("_gen.txt"));
        // %Y-%m-%d-%H-%M-%S
        assert_eq!(name.len(), "2024-01-01-00-00-00_gen.txt".len());
    }

    #[test]
    fn test_generate_writes_one_line_per_example() {
        let pairs = parse_corpus("she said \thi there\nhe sang \tloud\nthey \tleft\n", 10).unwrap();
        let artifacts = TrainingArtifacts::build(&pairs).unwrap();
        let encoded = EncodedCorpus::encode(&pairs, &artifacts, &Device::Cpu).unwrap();
        let params = Seq2SeqParameters::new(Seq2SeqConfig::new(&artifacts, 4), &Device::Cpu).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gen.txt");
        let sentences =
            generate_into(&path, &params, &artifacts, &pairs, &encoded, 2, &Device::Cpu).unwrap();
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].starts_with("she said"));
        assert!(sentences[1].starts_with("he sang"));

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.lines().count(), 2);
        assert!(written.ends_with('\n'));
    }
}
