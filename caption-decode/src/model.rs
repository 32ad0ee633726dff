use candle::{Device, Tensor};

use crate::{Error, RecurrentState, Result};

/// How the model picks its next input token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// The next input comes from the ground-truth sequence.
    TeacherForcing,
    /// The next input is the decoder's own previous output.
    Feedback,
}

/// A sequence model that can be driven one time step at a time.
///
/// Implementations must be pure given their inputs: two calls with the same
/// arguments return the same distribution. The number of rows in `state` and
/// `inputs` changes over the course of a beam search, so `step` must accept
/// any leading dimension.
pub trait StepModel {
    /// The state from which decoding starts, with one row per example.
    fn init_state(&self, batch_size: usize, device: &Device) -> Result<RecurrentState>;

    /// Runs time step `t`.
    ///
    /// `prev_output` holds the `u32` token fed back for each row, `None` at
    /// `t == 0`. `seq` is the ground-truth batch and is only provided in
    /// [`StepMode::TeacherForcing`].
    ///
    /// Returns log-probabilities of shape `(rows, vocab_size)` together with
    /// the updated state.
    fn step(
        &self,
        t: usize,
        state: &RecurrentState,
        prev_output: Option<&Tensor>,
        inputs: &Tensor,
        seq: Option<&Tensor>,
        mode: StepMode,
    ) -> Result<(Tensor, RecurrentState)>;
}

/// Checks that a step produced one row of scores per live row, and a vocab
/// matching earlier steps when one is known. Returns the vocab size.
pub(crate) fn check_scores(
    op: &'static str,
    scores: &Tensor,
    rows: usize,
    vocab: Option<usize>,
) -> Result<usize> {
    match scores.dims() {
        &[r, v] if r == rows && vocab.map_or(true, |vocab| vocab == v) => Ok(v),
        _ => Err(Error::ShapeMismatch {
            op,
            rows,
            vocab,
            got: scores.shape().clone(),
        }),
    }
}
