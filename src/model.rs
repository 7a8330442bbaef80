use crate::error::Seq2SeqError;
use crate::vocab::TrainingArtifacts;
use candle_core::{DType, Device, Result, Tensor, Var, D};
use candle_nn::rnn::{lstm, LSTMConfig, LSTM, RNN};
use candle_nn::{linear, ops, Linear, Module, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Final `(hidden, cell)` pair handed from the encoder to the decoder.
pub use candle_nn::rnn::LSTMState as LatentState;

#[derive(Clone, Debug, PartialEq)]
pub struct Seq2SeqConfig {
    num_encoder_tokens: usize,
    num_decoder_tokens: usize,
    latent_dim: usize,
}

impl Seq2SeqConfig {
    pub fn new(artifacts: &TrainingArtifacts, latent_dim: usize) -> Self {
        Self {
            num_encoder_tokens: artifacts.num_encoder_tokens(),
            num_decoder_tokens: artifacts.num_decoder_tokens(),
            latent_dim,
        }
    }

    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }
}

/// Written next to the weights so a later run can rebuild the same shapes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelMeta {
    pub latent_dim: usize,
    pub num_encoder_tokens: usize,
    pub num_decoder_tokens: usize,
    pub max_encoder_seq_length: usize,
    pub max_decoder_seq_length: usize,
}

impl ModelMeta {
    fn new(config: &Seq2SeqConfig, artifacts: &TrainingArtifacts) -> Self {
        Self {
            latent_dim: config.latent_dim,
            num_encoder_tokens: config.num_encoder_tokens,
            num_decoder_tokens: config.num_decoder_tokens,
            max_encoder_seq_length: artifacts.max_encoder_seq_length,
            max_decoder_seq_length: artifacts.max_decoder_seq_length,
        }
    }

    fn check(&self, artifacts: &TrainingArtifacts) -> crate::error::Result<()> {
        let current = [
            ("input vocabulary", self.num_encoder_tokens, artifacts.num_encoder_tokens()),
            ("target vocabulary", self.num_decoder_tokens, artifacts.num_decoder_tokens()),
            ("max input length", self.max_encoder_seq_length, artifacts.max_encoder_seq_length),
            ("max target length", self.max_decoder_seq_length, artifacts.max_decoder_seq_length),
        ];
        for (what, saved, now) in current {
            if saved != now {
                return Err(Seq2SeqError::IncompatibleModel(format!(
                    "{what} is {now}, model was trained with {saved}"
                )));
            }
        }
        Ok(())
    }
}

fn meta_path(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push(".json");
    PathBuf::from(p)
}

/// Owns every trained weight: encoder LSTM, decoder LSTM and the output
/// projection. The graphs used for training and inference are borrowed
/// views over this one parameter set.
pub struct Seq2SeqParameters {
    varmap: VarMap,
    encoder: LSTM,
    decoder: LSTM,
    to_probs: Linear,
    config: Seq2SeqConfig,
}

impl Seq2SeqParameters {
    pub fn new(config: Seq2SeqConfig, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let encoder = lstm(
            config.num_encoder_tokens,
            config.latent_dim,
            LSTMConfig::default(),
            vb.pp("encoder"),
        )?;
        let decoder = lstm(
            config.num_decoder_tokens,
            config.latent_dim,
            LSTMConfig::default(),
            vb.pp("decoder"),
        )?;
        let to_probs = linear(config.latent_dim, config.num_decoder_tokens, vb.pp("dense"))?;
        Ok(Self {
            varmap,
            encoder,
            decoder,
            to_probs,
            config,
        })
    }

    pub fn config(&self) -> &Seq2SeqConfig {
        &self.config
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    pub fn training_graph(&self) -> TrainingGraph<'_> {
        TrainingGraph { params: self }
    }

    pub fn encoder_extractor(&self) -> EncoderExtractor<'_> {
        EncoderExtractor { params: self }
    }

    pub fn decoder_step(&self) -> DecoderStep<'_> {
        DecoderStep { params: self }
    }

    /// Saves the weights as safetensors plus a `<path>.json` shape record.
    pub fn save(&self, path: impl AsRef<Path>, artifacts: &TrainingArtifacts) -> crate::error::Result<()> {
        let path = path.as_ref();
        self.varmap.save(path)?;
        let meta = ModelMeta::new(&self.config, artifacts);
        std::fs::write(meta_path(path), serde_json::to_string_pretty(&meta)?)?;
        tracing::info!("Saved model to '{}'", path.display());
        Ok(())
    }

    pub fn load(
        path: impl AsRef<Path>,
        artifacts: &TrainingArtifacts,
        device: &Device,
    ) -> crate::error::Result<Self> {
        let path = path.as_ref();
        let meta: ModelMeta = serde_json::from_str(&std::fs::read_to_string(meta_path(path))?)?;
        meta.check(artifacts)?;
        let mut params = Self::new(Seq2SeqConfig::new(artifacts, meta.latent_dim), device)?;
        params.varmap.load(path)?;
        tracing::info!(
            "Loaded model from '{}' (latent_dim={})",
            path.display(),
            meta.latent_dim
        );
        Ok(params)
    }
}

/// Teacher-forced wiring: encoder states seed the decoder, which reads the
/// ground-truth decoder input at every timestep.
pub struct TrainingGraph<'a> {
    params: &'a Seq2SeqParameters,
}

impl TrainingGraph<'_> {
    /// Returns unnormalized logits shaped `(batch, decoder_steps, decoder_vocab)`.
    pub fn forward(&self, encoder_input: &Tensor, decoder_input: &Tensor) -> Result<Tensor> {
        let latent = self.params.encoder_extractor().encode(encoder_input)?;
        let states = self.params.decoder.seq_init(decoder_input, &latent)?;
        let hidden = self.params.decoder.states_to_tensor(&states)?;
        self.params.to_probs.forward(&hidden)
    }

    /// Categorical cross-entropy against one-hot targets, and argmax accuracy.
    /// Both are means over every `(example, timestep)` position.
    pub fn loss_and_accuracy(
        &self,
        encoder_input: &Tensor,
        decoder_input: &Tensor,
        decoder_target: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let logits = self.forward(encoder_input, decoder_input)?;
        let log_probs = ops::log_softmax(&logits, D::Minus1)?;
        let loss = decoder_target
            .mul(&log_probs)?
            .sum(D::Minus1)?
            .mean_all()?
            .neg()?;
        let accuracy = logits
            .argmax(D::Minus1)?
            .eq(&decoder_target.argmax(D::Minus1)?)?
            .to_dtype(DType::F32)?
            .mean_all()?;
        Ok((loss, accuracy))
    }
}

/// Maps an encoder input `(batch, steps, encoder_vocab)` to the encoder's
/// final latent state; per-step outputs are dropped.
pub struct EncoderExtractor<'a> {
    params: &'a Seq2SeqParameters,
}

impl EncoderExtractor<'_> {
    pub fn encode(&self, encoder_input: &Tensor) -> Result<LatentState> {
        let states = self.params.encoder.seq(encoder_input)?;
        states
            .into_iter()
            .last()
            .ok_or_else(|| candle_core::Error::Msg("encoder input has no timesteps".to_string()))
    }
}

/// Runs the decoder from an injected latent state and returns the
/// per-step output distribution together with the updated state.
pub struct DecoderStep<'a> {
    params: &'a Seq2SeqParameters,
}

impl DecoderStep<'_> {
    pub fn step(&self, decoder_input: &Tensor, latent: &LatentState) -> Result<(Tensor, LatentState)> {
        let states = self.params.decoder.seq_init(decoder_input, latent)?;
        let hidden = self.params.decoder.states_to_tensor(&states)?;
        let probs = ops::softmax_last_dim(&self.params.to_probs.forward(&hidden)?)?;
        let next = states
            .into_iter()
            .last()
            .ok_or_else(|| candle_core::Error::Msg("decoder input has no timesteps".to_string()))?;
        Ok((probs, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{parse_corpus, EncodedCorpus};
    use candle_core::IndexOp;

    fn setup() -> (TrainingArtifacts, EncodedCorpus, Seq2SeqParameters) {
        let pairs = parse_corpus("go on\tnow then\nstop it \tplease do\n", 10).unwrap();
        let artifacts = TrainingArtifacts::build(&pairs).unwrap();
        let encoded = EncodedCorpus::encode(&pairs, &artifacts, &Device::Cpu).unwrap();
        let params = Seq2SeqParameters::new(Seq2SeqConfig::new(&artifacts, 4), &Device::Cpu).unwrap();
        (artifacts, encoded, params)
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        a.sub(b)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap()
    }

    #[test]
    fn test_graph_shapes() {
        let (artifacts, encoded, params) = setup();
        let logits = params
            .training_graph()
            .forward(&encoded.encoder_input, &encoded.decoder_input)
            .unwrap();
        assert_eq!(
            logits.dims(),
            &[2, artifacts.max_decoder_seq_length, artifacts.num_decoder_tokens()]
        );

        let latent = params
            .encoder_extractor()
            .encode(&encoded.encoder_example(0).unwrap())
            .unwrap();
        assert_eq!(latent.h().dims(), &[1, 4]);
        assert_eq!(latent.c().dims(), &[1, 4]);

        let step_input = encoded.decoder_input.i((0..1, 0..1)).unwrap();
        let (probs, next) = params.decoder_step().step(&step_input, &latent).unwrap();
        assert_eq!(probs.dims(), &[1, 1, artifacts.num_decoder_tokens()]);
        assert_eq!(next.h().dims(), &[1, 4]);
        let total = probs.sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_views_share_weights() {
        // Stepping the inference views with teacher forcing must reproduce
        // the training graph's distribution at every timestep.
        let (artifacts, encoded, params) = setup();
        let enc = encoded.encoder_example(1).unwrap();
        let dec = encoded.decoder_input.narrow(0, 1, 1).unwrap();
        let logits = params.training_graph().forward(&enc, &dec).unwrap();
        let expected = ops::softmax_last_dim(&logits).unwrap();

        let mut latent = params.encoder_extractor().encode(&enc).unwrap();
        for t in 0..artifacts.max_decoder_seq_length {
            let step_input = dec.narrow(1, t, 1).unwrap();
            let (probs, next) = params.decoder_step().step(&step_input, &latent).unwrap();
            let want = expected.narrow(1, t, 1).unwrap();
            assert!(max_abs_diff(&probs, &want) < 1e-5);
            latent = next;
        }
    }

    #[test]
    fn test_loss_and_accuracy_are_scalars() {
        let (_, encoded, params) = setup();
        let (loss, accuracy) = params
            .training_graph()
            .loss_and_accuracy(
                &encoded.encoder_input,
                &encoded.decoder_input,
                &encoded.decoder_target,
            )
            .unwrap();
        let loss = loss.to_scalar::<f32>().unwrap();
        let accuracy = accuracy.to_scalar::<f32>().unwrap();
        assert!(loss.is_finite() && loss > 0.0);
        assert!((0.0..=1.0).contains(&accuracy));
    }

    #[test]
    fn test_save_and_load() {
        let (artifacts, encoded, params) = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s2s.safetensors");
        params.save(&path, &artifacts).unwrap();

        let loaded = Seq2SeqParameters::load(&path, &artifacts, &Device::Cpu).unwrap();
        assert_eq!(loaded.config(), params.config());
        let before = params
            .training_graph()
            .forward(&encoded.encoder_input, &encoded.decoder_input)
            .unwrap();
        let after = loaded
            .training_graph()
            .forward(&encoded.encoder_input, &encoded.decoder_input)
            .unwrap();
        assert!(max_abs_diff(&before, &after) < 1e-6);

        let mut other = artifacts.clone();
        other.max_decoder_seq_length += 1;
        assert!(matches!(
            Seq2SeqParameters::load(&path, &other, &Device::Cpu),
            Err(Seq2SeqError::IncompatibleModel(_))
        ));
        assert!(meta_path(&path).exists());
    }
}
