use crate::error::Result;
use crate::model::{DecoderStep, EncoderExtractor, LatentState, Seq2SeqParameters};
use crate::vocab::{TrainingArtifacts, END_MARKER, START_MARKER};
use candle_core::{Device, IndexOp, Tensor};

/// Greedy decode loop, one transition per decoder step.
pub enum DecodeState {
    AwaitingFirstToken {
        latent: LatentState,
    },
    Emitting {
        previous: usize,
        latent: LatentState,
        decoded: String,
        emitted: usize,
    },
    Done {
        decoded: String,
    },
}

impl DecodeState {
    /// Feeds the last emitted character (the start marker at first) back
    /// into the decoder and emits one more. `Done` stays `Done`.
    pub fn advance(self, decoder: &GreedyDecoder<'_>) -> Result<Self> {
        match self {
            DecodeState::AwaitingFirstToken { latent } => {
                decoder.emit(decoder.start_index, &latent, String::new(), 0)
            }
            DecodeState::Emitting {
                previous,
                latent,
                decoded,
                emitted,
            } => decoder.emit(previous, &latent, decoded, emitted),
            done @ DecodeState::Done { .. } => Ok(done),
        }
    }
}

fn argmax(probs: &[f32]) -> usize {
    let mut best = 0;
    for (i, &p) in probs.iter().enumerate() {
        if p > probs[best] {
            best = i;
        }
    }
    best
}

pub struct GreedyDecoder<'a> {
    encoder: EncoderExtractor<'a>,
    step: DecoderStep<'a>,
    artifacts: &'a TrainingArtifacts,
    start_index: usize,
    device: Device,
}

impl<'a> GreedyDecoder<'a> {
    pub fn new(params: &'a Seq2SeqParameters, artifacts: &'a TrainingArtifacts, device: &Device) -> Result<Self> {
        Ok(Self {
            encoder: params.encoder_extractor(),
            step: params.decoder_step(),
            artifacts,
            start_index: artifacts.target_vocab.index_of(START_MARKER)?,
            device: device.clone(),
        })
    }

    fn one_hot(&self, index: usize) -> Result<Tensor> {
        let width = self.artifacts.num_decoder_tokens();
        let mut row = vec![0f32; width];
        row[index] = 1.0;
        Ok(Tensor::from_vec(row, (1, 1, width), &self.device)?)
    }

    fn emit(
        &self,
        previous: usize,
        latent: &LatentState,
        mut decoded: String,
        emitted: usize,
    ) -> Result<DecodeState> {
        let (probs, latent) = self.step.step(&self.one_hot(previous)?, latent)?;
        let last = probs.dim(1)? - 1;
        let index = argmax(&probs.i((0, last))?.to_vec1::<f32>()?);
        let ch = self.artifacts.target_vocab.lookup(index)?;
        decoded.push(ch);
        let emitted = emitted + 1;

        if ch == END_MARKER || emitted > self.artifacts.max_decoder_seq_length {
            return Ok(DecodeState::Done { decoded });
        }
        Ok(DecodeState::Emitting {
            previous: index,
            latent,
            decoded,
            emitted,
        })
    }

    /// Decodes one encoder input shaped `(1, timesteps, encoder_vocab)`.
    ///
    /// The end marker, when produced, is kept at the end of the result. The
    /// result never exceeds `max_decoder_seq_length + 1` characters.
    pub fn decode(&self, input_seq: &Tensor) -> Result<String> {
        let latent = self.encoder.encode(input_seq)?;
        let mut state = DecodeState::AwaitingFirstToken { latent };
        loop {
            state = match state.advance(self)? {
                DecodeState::Done { decoded } => return Ok(decoded),
                next => next,
            };
        }
    }
}
