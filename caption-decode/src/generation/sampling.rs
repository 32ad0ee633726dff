use candle::{DType, Tensor, D};
use rand::{
    distr::{weighted::WeightedIndex, Distribution},
    rngs::StdRng,
    Rng, SeedableRng,
};

use super::check_seq_len;
use crate::model::check_scores;
use crate::{Error, Result, StepMode, StepModel};

/// Stochastic decoding for policy-gradient training.
///
/// Every step draws one token per row from the categorical distribution
/// defined by the step logits and records the log-probability of the drawn
/// token. The random source is owned by the sampler, so runs are reproducible
/// under a fixed seed.
pub struct CategoricalSampler<R = StdRng> {
    rng: R,
}

impl CategoricalSampler<StdRng> {
    pub fn new(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> CategoricalSampler<R> {
    pub fn from_rng(rng: R) -> Self {
        Self { rng }
    }

    fn sample_row(&mut self, prs: &[f32]) -> Result<u32> {
        let distr = WeightedIndex::new(prs).map_err(|e| Error::Sampling(e.to_string()))?;
        Ok(distr.sample(&mut self.rng) as u32)
    }

    /// Samples one token per row of `logits`, shape `(rows, vocab_size)`.
    ///
    /// Returns the `u32` tokens and their log-probabilities, both of shape
    /// `(rows,)`. The log-probabilities are gathered from the log-softmax of
    /// `logits` and keep their gradient.
    pub fn sample_step(&mut self, logits: &Tensor) -> Result<(Tensor, Tensor)> {
        let logits = logits.to_dtype(DType::F32)?;
        let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
        let prs = log_probs.exp()?.to_vec2::<f32>()?;
        let tokens = prs
            .iter()
            .map(|row| self.sample_row(row))
            .collect::<Result<Vec<u32>>>()?;
        let tokens = Tensor::new(tokens.as_slice(), logits.device())?;
        let picked = log_probs.gather(&tokens.unsqueeze(1)?, 1)?.squeeze(1)?;
        Ok((tokens, picked))
    }

    /// Decodes `seq_len` steps, feeding each sampled token back to the model.
    ///
    /// Returns `(tokens, log_probs)`, both of shape `(batch, seq_len)`.
    pub fn sample<M: StepModel + ?Sized>(
        &mut self,
        model: &M,
        inputs: &Tensor,
        seq_len: usize,
    ) -> Result<(Tensor, Tensor)> {
        let _enter = tracing::span!(tracing::Level::TRACE, "sample").entered();
        check_seq_len(seq_len)?;
        let b_sz = inputs.dim(0)?;
        let mut state = model.init_state(b_sz, inputs.device())?;
        let mut out: Option<Tensor> = None;
        let mut outputs = Vec::with_capacity(seq_len);
        let mut log_probs = Vec::with_capacity(seq_len);
        let mut vocab = None;
        for t in 0..seq_len {
            let (logits, next_state) =
                model.step(t, &state, out.as_ref(), inputs, None, StepMode::Feedback)?;
            vocab = Some(check_scores("sample", &logits, b_sz, vocab)?);
            let (tokens, lp) = self.sample_step(&logits)?;
            outputs.push(tokens.clone());
            log_probs.push(lp);
            out = Some(tokens);
            state = next_state;
        }
        Ok((Tensor::stack(&outputs, 1)?, Tensor::stack(&log_probs, 1)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{example_inputs, ScriptedModel};
    use candle::Device;

    fn halves(_: u32, history: &[u32]) -> Vec<f32> {
        // Uniform over the first two tokens after an odd history length.
        if history.len() % 2 == 1 {
            vec![0.5f32.ln(), 0.5f32.ln(), f32::NEG_INFINITY]
        } else {
            vec![0.5f32.ln(), 0.25f32.ln(), 0.25f32.ln()]
        }
    }

    #[test]
    fn seeded_runs_are_reproducible() -> Result<()> {
        let dev = Device::Cpu;
        let model = ScriptedModel::new(3, 8, halves);
        let inputs = example_inputs(4, &dev)?;
        let (a, lp_a) = CategoricalSampler::new(42).sample(&model, &inputs, 6)?;
        let (b, lp_b) = CategoricalSampler::new(42).sample(&model, &inputs, 6)?;
        assert_eq!(a.dims(), &[4, 6]);
        assert_eq!(lp_a.dims(), &[4, 6]);
        assert_eq!(a.to_vec2::<u32>()?, b.to_vec2::<u32>()?);
        assert_eq!(lp_a.to_vec2::<f32>()?, lp_b.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn log_probs_match_the_drawn_tokens() -> Result<()> {
        let dev = Device::Cpu;
        let model = ScriptedModel::new(3, 8, halves);
        let inputs = example_inputs(3, &dev)?;
        let (tokens, lp) = CategoricalSampler::new(7).sample(&model, &inputs, 5)?;
        let tokens = tokens.to_vec2::<u32>()?;
        let lp = lp.to_vec2::<f32>()?;
        for (example, (tokens, lp)) in tokens.iter().zip(lp.iter()).enumerate() {
            // the masked token can never be drawn
            for (t, &token) in tokens.iter().enumerate() {
                if t % 2 == 1 {
                    assert_ne!(token, 2);
                }
            }
            let total: f32 = lp.iter().sum();
            let replayed = model.path_score(example as u32, tokens);
            assert!((total - replayed).abs() < 1e-5, "{total} {replayed}");
        }
        Ok(())
    }

    #[test]
    fn sample_step_normalizes_logits() -> Result<()> {
        let dev = Device::Cpu;
        let logits = Tensor::new(&[[2f32, 2., f32::NEG_INFINITY]], &dev)?;
        let (token, lp) = CategoricalSampler::new(0).sample_step(&logits)?;
        assert!(token.to_vec1::<u32>()?[0] < 2);
        assert!((lp.to_vec1::<f32>()?[0] - 0.5f32.ln()).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn invalid_weights_are_reported() -> Result<()> {
        let dev = Device::Cpu;
        let logits = Tensor::new(&[[f32::NAN, f32::NAN]], &dev)?;
        let err = CategoricalSampler::new(0).sample_step(&logits).unwrap_err();
        assert!(matches!(err, Error::Sampling(_)));
        Ok(())
    }
}
