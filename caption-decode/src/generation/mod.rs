//! Single-path decoding: greedy argmax, categorical sampling and the
//! teacher-forced forward pass.
use candle::{Tensor, D};

use crate::model::check_scores;
use crate::{Error, Result, StepMode, StepModel};

mod sampling;

pub use sampling::CategoricalSampler;

pub(crate) fn check_seq_len(seq_len: usize) -> Result<()> {
    if seq_len == 0 {
        return Err(Error::InvalidConfig("seq_len must be at least 1".to_string()));
    }
    Ok(())
}

/// Greedy decoding: at each step the argmax token is fed back as the next
/// input. Always runs `seq_len` steps, an end-of-sequence token does not stop
/// the loop.
///
/// Returns a `u32` tensor of shape `(batch, seq_len)`.
pub fn greedy<M: StepModel + ?Sized>(model: &M, inputs: &Tensor, seq_len: usize) -> Result<Tensor> {
    let _enter = tracing::span!(tracing::Level::TRACE, "greedy").entered();
    check_seq_len(seq_len)?;
    let b_sz = inputs.dim(0)?;
    let mut state = model.init_state(b_sz, inputs.device())?;
    let mut out: Option<Tensor> = None;
    let mut outputs = Vec::with_capacity(seq_len);
    let mut vocab = None;
    for t in 0..seq_len {
        let (logprobs, next_state) =
            model.step(t, &state, out.as_ref(), inputs, None, StepMode::Feedback)?;
        vocab = Some(check_scores("greedy", &logprobs, b_sz, vocab)?);
        let tokens = logprobs.argmax(D::Minus1)?;
        outputs.push(tokens.clone());
        out = Some(tokens);
        state = next_state;
    }
    Ok(Tensor::stack(&outputs, 1)?)
}

/// Teacher-forced forward pass over the ground-truth batch `seq` of shape
/// `(batch, seq_len)`.
///
/// Returns the stacked step outputs, `(batch, seq_len, vocab_size)`.
pub fn teacher_forcing<M: StepModel + ?Sized>(
    model: &M,
    inputs: &Tensor,
    seq: &Tensor,
) -> Result<Tensor> {
    let _enter = tracing::span!(tracing::Level::TRACE, "teacher-forcing").entered();
    let (b_sz, seq_len) = seq.dims2()?;
    check_seq_len(seq_len)?;
    let mut state = model.init_state(b_sz, inputs.device())?;
    let mut out: Option<Tensor> = None;
    let mut outputs = Vec::with_capacity(seq_len);
    let mut vocab = None;
    for t in 0..seq_len {
        let (logprobs, next_state) = model.step(
            t,
            &state,
            out.as_ref(),
            inputs,
            Some(seq),
            StepMode::TeacherForcing,
        )?;
        vocab = Some(check_scores("teacher-forcing", &logprobs, b_sz, vocab)?);
        outputs.push(logprobs.clone());
        out = Some(logprobs);
        state = next_state;
    }
    Ok(Tensor::stack(&outputs, 1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{example_inputs, ScriptedModel};
    use candle::{DType, Device};

    #[test]
    fn greedy_runs_fixed_length() -> Result<()> {
        let dev = Device::Cpu;
        // eos (0) is always the best token, decoding still runs to seq_len.
        let model = ScriptedModel::new(4, 8, |_, _| vec![-0.1, -3.0, -2.0, -4.0]);
        let inputs = example_inputs(2, &dev)?;
        let tokens = greedy(&model, &inputs, 5)?;
        assert_eq!(tokens.dtype(), DType::U32);
        assert_eq!(tokens.to_vec2::<u32>()?, [[0; 5], [0; 5]]);
        Ok(())
    }

    #[test]
    fn teacher_forcing_follows_ground_truth() -> Result<()> {
        let dev = Device::Cpu;
        // The best token is the sum of the history fed so far, mod 4.
        let model = ScriptedModel::new(4, 8, |_, history: &[u32]| {
            let mut lp = vec![-5.0; 4];
            lp[history.iter().map(|&t| t as usize).sum::<usize>() % 4] = -0.5;
            lp
        });
        let inputs = example_inputs(1, &dev)?;
        let seq = Tensor::new(&[[1u32, 2, 3]], &dev)?;
        let out = teacher_forcing(&model, &inputs, &seq)?;
        assert_eq!(out.dims(), &[1, 3, 4]);
        // histories fed are [], [1], [1, 2]
        let best = out.argmax(D::Minus1)?.to_vec2::<u32>()?;
        assert_eq!(best, [[0, 1, 3]]);
        Ok(())
    }

    #[test]
    fn zero_length_is_rejected() -> Result<()> {
        let dev = Device::Cpu;
        let model = ScriptedModel::new(2, 2, |_, _| vec![0.0, -1.0]);
        let inputs = example_inputs(1, &dev)?;
        assert!(matches!(
            greedy(&model, &inputs, 0),
            Err(Error::InvalidConfig(_))
        ));
        Ok(())
    }
}
