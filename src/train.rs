use crate::data::EncodedCorpus;
use crate::model::Seq2SeqParameters;
use anyhow::ensure;
use candle_core::{Result, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

#[derive(Clone, Debug)]
pub struct TrainConfig {
    pub batch_size: usize,
    pub epochs: usize,
    pub latent_dim: usize,
    pub learning_rate: f64,
    pub validation_split: f64,
    pub seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 512,
            epochs: 1500,
            latent_dim: 256,
            learning_rate: 1e-3,
            validation_split: 0.2,
            seed: None,
        }
    }
}

impl TrainConfig {
    fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.batch_size > 0, "batch size must be positive");
        ensure!(self.latent_dim > 0, "latent dimensionality must be positive");
        ensure!(
            (0.0..1.0).contains(&self.validation_split),
            "validation split must lie in [0, 1), got {}",
            self.validation_split
        );
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f32,
    pub train_accuracy: f32,
    pub val_loss: Option<f32>,
    pub val_accuracy: Option<f32>,
}

/// Index where the held-out tail starts. At least one example always trains.
pub fn validation_split_index(num_examples: usize, validation_split: f64) -> usize {
    let split_at = (num_examples as f64 * (1.0 - validation_split)).floor() as usize;
    split_at.clamp(num_examples.min(1), num_examples)
}

fn gather(t: &Tensor, indices: &[usize]) -> Result<Tensor> {
    let idx: Vec<u32> = indices.iter().map(|&i| i as u32).collect();
    let idx = Tensor::from_vec(idx, indices.len(), t.device())?;
    t.index_select(&idx, 0)
}

struct Batch {
    encoder_input: Tensor,
    decoder_input: Tensor,
    decoder_target: Tensor,
}

impl Batch {
    fn gather(data: &EncodedCorpus, indices: &[usize]) -> Result<Self> {
        Ok(Self {
            encoder_input: gather(&data.encoder_input, indices)?,
            decoder_input: gather(&data.decoder_input, indices)?,
            decoder_target: gather(&data.decoder_target, indices)?,
        })
    }
}

#[derive(Default)]
struct RunningMean {
    loss: f64,
    accuracy: f64,
    count: usize,
}

impl RunningMean {
    fn add(&mut self, loss: &Tensor, accuracy: &Tensor, batch_len: usize) -> Result<()> {
        self.loss += loss.to_scalar::<f32>()? as f64 * batch_len as f64;
        self.accuracy += accuracy.to_scalar::<f32>()? as f64 * batch_len as f64;
        self.count += batch_len;
        Ok(())
    }

    fn finish(&self) -> Option<(f32, f32)> {
        (self.count > 0).then(|| {
            (
                (self.loss / self.count as f64) as f32,
                (self.accuracy / self.count as f64) as f32,
            )
        })
    }
}

fn evaluate(
    params: &Seq2SeqParameters,
    data: &EncodedCorpus,
    indices: &[usize],
    batch_size: usize,
) -> Result<Option<(f32, f32)>> {
    let graph = params.training_graph();
    let mut mean = RunningMean::default();
    for chunk in indices.chunks(batch_size) {
        let batch = Batch::gather(data, chunk)?;
        let (loss, accuracy) = graph.loss_and_accuracy(
            &batch.encoder_input,
            &batch.decoder_input,
            &batch.decoder_target,
        )?;
        mean.add(&loss, &accuracy, chunk.len())?;
    }
    Ok(mean.finish())
}

/// Fits `params` to `data` in place and returns per-epoch metrics.
pub fn training_loop(
    params: &Seq2SeqParameters,
    data: &EncodedCorpus,
    cfg: &TrainConfig,
) -> anyhow::Result<Vec<EpochMetrics>> {
    cfg.validate()?;

    let n = data.num_examples();
    let split_at = validation_split_index(n, cfg.validation_split);
    let mut train_idx: Vec<usize> = (0..split_at).collect();
    let val_idx: Vec<usize> = (split_at..n).collect();
    tracing::info!(
        "Train on {} samples, validate on {} samples (latent_dim={})",
        train_idx.len(),
        val_idx.len(),
        params.config().latent_dim()
    );

    let adam = ParamsAdamW {
        lr: cfg.learning_rate,
        beta1: 0.9,
        beta2: 0.999,
        eps: 1e-7,
        weight_decay: 0.0,
    };
    let mut optim = AdamW::new(params.trainable_vars(), adam)?;
    let mut rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let graph = params.training_graph();
    let mut history = Vec::with_capacity(cfg.epochs);
    for epoch in 1..=cfg.epochs {
        train_idx.shuffle(&mut rng);

        let mut mean = RunningMean::default();
        for chunk in train_idx.chunks(cfg.batch_size) {
            let batch = Batch::gather(data, chunk)?;
            let (loss, accuracy) = graph.loss_and_accuracy(
                &batch.encoder_input,
                &batch.decoder_input,
                &batch.decoder_target,
            )?;
            optim.backward_step(&loss)?;
            mean.add(&loss, &accuracy, chunk.len())?;
        }
        let (train_loss, train_accuracy) = mean.finish().unwrap_or((f32::NAN, f32::NAN));

        let val = evaluate(params, data, &val_idx, cfg.batch_size)?;
        let metrics = EpochMetrics {
            epoch,
            train_loss,
            train_accuracy,
            val_loss: val.map(|(loss, _)| loss),
            val_accuracy: val.map(|(_, acc)| acc),
        };
        match val {
            Some((val_loss, val_accuracy)) => tracing::info!(
                "Epoch {}/{} - loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4}",
                epoch,
                cfg.epochs,
                train_loss,
                train_accuracy,
                val_loss,
                val_accuracy
            ),
            None => tracing::info!(
                "Epoch {}/{} - loss: {:.4} - accuracy: {:.4}",
                epoch,
                cfg.epochs,
                train_loss,
                train_accuracy
            ),
        }
        history.push(metrics);
    }

    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_corpus;
    use crate::model::Seq2SeqConfig;
    use crate::vocab::TrainingArtifacts;
    use candle_core::Device;

    fn two_example_setup(latent_dim: usize) -> (EncodedCorpus, Seq2SeqParameters) {
        let pairs = parse_corpus("the cat \tsat\na dog\tran away\n", 10).unwrap();
        let artifacts = TrainingArtifacts::build(&pairs).unwrap();
        let encoded = EncodedCorpus::encode(&pairs, &artifacts, &Device::Cpu).unwrap();
        let params =
            Seq2SeqParameters::new(Seq2SeqConfig::new(&artifacts, latent_dim), &Device::Cpu).unwrap();
        (encoded, params)
    }

    #[test]
    fn test_split_index() {
        assert_eq!(validation_split_index(100, 0.2), 80);
        assert_eq!(validation_split_index(10, 0.0), 10);
        assert_eq!(validation_split_index(2, 0.2), 1);
        assert_eq!(validation_split_index(1, 0.5), 1);
        assert_eq!(validation_split_index(0, 0.2), 0);
    }

    #[test]
    fn test_one_epoch_on_tiny_corpus() {
        let (encoded, params) = two_example_setup(4);
        let cfg = TrainConfig {
            batch_size: 2,
            epochs: 1,
            latent_dim: 4,
            seed: Some(7),
            ..TrainConfig::default()
        };
        let history = training_loop(&params, &encoded, &cfg).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].epoch, 1);
        assert!(history[0].train_loss.is_finite());
        assert!(history[0].val_loss.is_some());
    }

    #[test]
    fn test_training_updates_shared_weights() {
        let (encoded, params) = two_example_setup(8);
        let graph = params.training_graph();
        let before = graph
            .loss_and_accuracy(&encoded.encoder_input, &encoded.decoder_input, &encoded.decoder_target)
            .unwrap()
            .0
            .to_scalar::<f32>()
            .unwrap();
        let cfg = TrainConfig {
            batch_size: 2,
            epochs: 30,
            latent_dim: 8,
            learning_rate: 1e-2,
            validation_split: 0.0,
            seed: Some(1),
        };
        let history = training_loop(&params, &encoded, &cfg).unwrap();
        assert!(history.iter().all(|m| m.val_loss.is_none()));
        let after = graph
            .loss_and_accuracy(&encoded.encoder_input, &encoded.decoder_input, &encoded.decoder_target)
            .unwrap()
            .0
            .to_scalar::<f32>()
            .unwrap();
        assert!(after < before);
    }

    #[test]
    fn test_rejects_bad_config() {
        let (encoded, params) = two_example_setup(4);
        let cfg = TrainConfig {
            validation_split: 1.0,
            epochs: 1,
            ..TrainConfig::default()
        };
        assert!(training_loop(&params, &encoded, &cfg).is_err());
        let cfg = TrainConfig {
            batch_size: 0,
            epochs: 1,
            ..TrainConfig::default()
        };
        assert!(training_loop(&params, &encoded, &cfg).is_err());
    }
}
