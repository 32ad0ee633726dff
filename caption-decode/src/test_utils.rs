//! A deterministic [`StepModel`] for tests and examples.
use std::sync::Mutex;

use candle::{DType, Device, Tensor};

use crate::{RecurrentState, Result, StepMode, StepModel};

/// Context tensor of shape `(batch, 1)` holding each example's index.
pub fn example_inputs(batch: usize, device: &Device) -> Result<Tensor> {
    Ok(Tensor::arange(0f32, batch as f32, device)?.reshape((batch, 1))?)
}

fn scripted_error(msg: String) -> crate::Error {
    candle::Error::Msg(format!("scripted model: {msg}")).into()
}

/// A model whose log-probabilities are scripted by a closure over the example
/// index and the tokens fed so far.
///
/// The state is a `(rows, max_len)` history buffer padded with `-1` and a
/// `(rows,)` length vector, so beam reordering bugs show up as wrong
/// histories. The inputs must come from [`example_inputs`] (or be reordered
/// alongside the state); column 0 holds the example index.
pub struct ScriptedModel<F> {
    vocab_size: usize,
    max_len: usize,
    script: F,
    calls: Mutex<Vec<usize>>,
}

impl<F> ScriptedModel<F>
where
    F: Fn(u32, &[u32]) -> Vec<f32>,
{
    pub fn new(vocab_size: usize, max_len: usize, script: F) -> Self {
        Self {
            vocab_size,
            max_len,
            script,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Live row count seen by each `step` call, in call order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Sum of the scripted log-probabilities along `tokens`.
    pub fn path_score(&self, example: u32, tokens: &[u32]) -> f32 {
        (0..tokens.len())
            .map(|t| (self.script)(example, &tokens[..t])[tokens[t] as usize])
            .sum()
    }

    fn row_scores(&self, example: u32, history: &[u32]) -> candle::Result<Vec<f32>> {
        let lp = (self.script)(example, history);
        if lp.len() != self.vocab_size {
            candle::bail!(
                "scripted model: got {} scores for a vocab of {}",
                lp.len(),
                self.vocab_size
            )
        }
        Ok(lp)
    }
}

impl<F> StepModel for ScriptedModel<F>
where
    F: Fn(u32, &[u32]) -> Vec<f32>,
{
    fn init_state(&self, batch_size: usize, device: &Device) -> Result<RecurrentState> {
        let history = Tensor::full(-1f32, (batch_size, self.max_len), device)?;
        let len = Tensor::zeros(batch_size, DType::U32, device)?;
        RecurrentState::new(vec![history, len])
    }

    fn step(
        &self,
        t: usize,
        state: &RecurrentState,
        prev_output: Option<&Tensor>,
        inputs: &Tensor,
        seq: Option<&Tensor>,
        mode: StepMode,
    ) -> Result<(Tensor, RecurrentState)> {
        let rows = inputs.dim(0)?;
        if rows != state.rows() {
            return Err(scripted_error(format!(
                "{rows} input rows for {} state rows",
                state.rows()
            )));
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(rows);
        }
        let device = inputs.device();
        let mut history = state.tensors()[0].to_vec2::<f32>()?;
        let mut len = state.tensors()[1].to_vec1::<u32>()?;
        let fed: Option<Vec<u32>> = match (t, mode) {
            (0, _) => None,
            (_, StepMode::TeacherForcing) => match seq {
                Some(seq) => Some(seq.narrow(1, t - 1, 1)?.squeeze(1)?.to_vec1::<u32>()?),
                None => return Err(scripted_error("teacher forcing without a sequence".into())),
            },
            (_, StepMode::Feedback) => match prev_output {
                Some(prev) => Some(prev.to_vec1::<u32>()?),
                None => return Err(scripted_error(format!("no previous output at step {t}"))),
            },
        };
        if let Some(fed) = fed {
            for (row, token) in fed.into_iter().enumerate() {
                let l = len[row] as usize;
                if l < self.max_len {
                    history[row][l] = token as f32;
                    len[row] += 1;
                }
            }
        }

        let examples = inputs.narrow(1, 0, 1)?.squeeze(1)?.to_vec1::<f32>()?;
        let mut scores = Vec::with_capacity(rows * self.vocab_size);
        for row in 0..rows {
            let tokens: Vec<u32> = history[row][..len[row] as usize]
                .iter()
                .map(|&x| x as u32)
                .collect();
            scores.extend(self.row_scores(examples[row] as u32, &tokens)?);
        }
        let scores = Tensor::from_vec(scores, (rows, self.vocab_size), device)?;

        let history: Vec<f32> = history.into_iter().flatten().collect();
        let history = Tensor::from_vec(history, (rows, self.max_len), device)?;
        let len = Tensor::from_vec(len, rows, device)?;
        Ok((scores, RecurrentState::new(vec![history, len])?))
    }
}
