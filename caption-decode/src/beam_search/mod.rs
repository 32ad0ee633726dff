//! Beam search with end-of-sequence pruning and per-example beam width.
//!
//! Every example owns a beam whose width starts at `beam_size` and shrinks by
//! one each time a hypothesis emits the end-of-sequence token. Live
//! hypotheses of all examples are stored as rows
//! of a single [`RecurrentState`], each example owning a contiguous segment.
//! After every step the surviving rows are gathered in one go, so state,
//! context inputs and fed-back tokens stay aligned with the beams.
//!
//! - [`beam_search`] decodes the examples one after the other.
//! - [`par_beam_search`] decodes them on the rayon thread pool.
//! - [`batched_beam_search`] runs a single model call per step for the whole
//!   batch. Examples that finish early simply stop contributing rows.
use candle::{DType, Tensor};
use rayon::prelude::*;

use crate::model::check_scores;
use crate::{RecurrentState, Result, StepMode, StepModel};

mod config;
mod hypothesis;

pub use config::BeamSearchConfig;
pub use hypothesis::Hypothesis;

use hypothesis::Beam;

/// The ranked hypotheses of one example.
#[derive(Debug, Clone, PartialEq)]
pub enum BeamOutput {
    /// Exactly one hypothesis was returned, e.g. with `out_size == 1`.
    Single(Hypothesis),
    /// Hypotheses sorted by decreasing score.
    Many(Vec<Hypothesis>),
}

impl BeamOutput {
    fn from_ranked(mut ranked: Vec<Hypothesis>) -> Self {
        if ranked.len() == 1 {
            Self::Single(ranked.remove(0))
        } else {
            Self::Many(ranked)
        }
    }

    pub fn hypotheses(&self) -> &[Hypothesis] {
        match self {
            Self::Single(h) => std::slice::from_ref(h),
            Self::Many(hs) => hs,
        }
    }

    /// The highest scoring hypothesis.
    pub fn best(&self) -> Option<&Hypothesis> {
        self.hypotheses().first()
    }

    pub fn into_vec(self) -> Vec<Hypothesis> {
        match self {
            Self::Single(h) => vec![h],
            Self::Many(hs) => hs,
        }
    }
}

/// Rows fed to the model at the next step.
struct LiveRows {
    state: RecurrentState,
    inputs: Tensor,
    prev_tokens: Option<Tensor>,
}

impl LiveRows {
    /// Replaces the state with `state` restricted to `rows`, reindexes the
    /// context inputs the same way and records `tokens` as the next input.
    fn reorder(&mut self, state: RecurrentState, rows: &[u32], tokens: &[u32]) -> Result<()> {
        let device = self.inputs.device().clone();
        let rows = Tensor::new(rows, &device)?;
        self.state = state.select(&rows)?;
        self.inputs = self.inputs.index_select(&rows, 0)?;
        self.prev_tokens = Some(Tensor::new(tokens, &device)?);
        Ok(())
    }
}

/// Runs the search for all examples whose initial rows are in `state` and
/// `inputs`, one row per example.
fn run_beams<M: StepModel + ?Sized>(
    model: &M,
    config: &BeamSearchConfig,
    state: RecurrentState,
    inputs: Tensor,
) -> Result<Vec<Beam>> {
    let b_sz = inputs.dim(0)?;
    if b_sz == 0 {
        return Ok(Vec::new());
    }
    if state.rows() != b_sz {
        return Err(crate::Error::StateRows {
            index: 0,
            expected: b_sz,
            got: state.rows(),
        });
    }
    let mut beams: Vec<Beam> = (0..b_sz)
        .map(|_| Beam::new(config.beam_size, config.eos_idx))
        .collect();
    let mut live = LiveRows {
        state,
        inputs,
        prev_tokens: None,
    };
    let mut vocab = None;
    for t in 0..config.seq_len {
        let rows = live.state.rows();
        let (logprobs, state) = model.step(
            t,
            &live.state,
            live.prev_tokens.as_ref(),
            &live.inputs,
            None,
            StepMode::Feedback,
        )?;
        vocab = Some(check_scores("beam-search", &logprobs, rows, vocab)?);

        let running: Vec<f32> = beams.iter().flat_map(|b| b.scores()).collect();
        let running = Tensor::new(running.as_slice(), logprobs.device())?.unsqueeze(1)?;
        let scores = logprobs
            .to_dtype(DType::F32)?
            .broadcast_add(&running)?
            .to_vec2::<f32>()?;

        let mut keep = Vec::with_capacity(rows);
        let mut tokens = Vec::with_capacity(rows);
        let mut offset = 0;
        for beam in beams.iter_mut() {
            let n = beam.live();
            let picked = beam.select(&scores[offset..offset + n]);
            for (slot, token) in beam.advance(&picked) {
                keep.push((offset + slot) as u32);
                tokens.push(token);
            }
            offset += n;
        }
        tracing::trace!(
            t,
            rows,
            kept = keep.len(),
            widths = ?beams.iter().map(|b| b.cap()).collect::<Vec<_>>(),
            "beam-search step"
        );
        if keep.is_empty() {
            tracing::debug!(t, "every beam completed before seq_len");
            break;
        }
        live.reorder(state, &keep, &tokens)?;
    }
    Ok(beams)
}

fn search_example<M: StepModel + ?Sized>(
    model: &M,
    config: &BeamSearchConfig,
    state: &RecurrentState,
    inputs: &Tensor,
    index: usize,
) -> Result<BeamOutput> {
    let state = state.narrow_rows(index, 1)?;
    let inputs = inputs.narrow(0, index, 1)?;
    let ranked = run_beams(model, config, state, inputs)?
        .into_iter()
        .flat_map(|beam| beam.finish(config.out_size))
        .collect();
    Ok(BeamOutput::from_ranked(ranked))
}

/// Beam search over each example of `inputs` in turn.
///
/// Returns, per example, the `out_size` best hypotheses among the completed
/// and still-live ones. Fewer are returned when fewer exist.
pub fn beam_search<M: StepModel + ?Sized>(
    model: &M,
    inputs: &Tensor,
    config: &BeamSearchConfig,
) -> Result<Vec<BeamOutput>> {
    config.validate()?;
    let _enter = tracing::span!(tracing::Level::TRACE, "beam-search").entered();
    let b_sz = inputs.dim(0)?;
    let state = model.init_state(b_sz, inputs.device())?;
    (0..b_sz)
        .map(|i| search_example(model, config, &state, inputs, i))
        .collect()
}

/// Same as [`beam_search`] with the examples decoded in parallel.
pub fn par_beam_search<M: StepModel + Sync + ?Sized>(
    model: &M,
    inputs: &Tensor,
    config: &BeamSearchConfig,
) -> Result<Vec<BeamOutput>> {
    config.validate()?;
    let _enter = tracing::span!(tracing::Level::TRACE, "par-beam-search").entered();
    let b_sz = inputs.dim(0)?;
    let state = model.init_state(b_sz, inputs.device())?;
    (0..b_sz)
        .into_par_iter()
        .map(|i| search_example(model, config, &state, inputs, i))
        .collect()
}

/// Beam search over the whole batch with one model call per step.
///
/// The model sees the live rows of every example at once, so it must not mix
/// information across rows.
pub fn batched_beam_search<M: StepModel + ?Sized>(
    model: &M,
    inputs: &Tensor,
    config: &BeamSearchConfig,
) -> Result<Vec<BeamOutput>> {
    config.validate()?;
    let _enter = tracing::span!(tracing::Level::TRACE, "batched-beam-search").entered();
    let b_sz = inputs.dim(0)?;
    let state = model.init_state(b_sz, inputs.device())?;
    let beams = run_beams(model, config, state, inputs.clone())?;
    Ok(beams
        .into_iter()
        .map(|beam| BeamOutput::from_ranked(beam.finish(config.out_size)))
        .collect())
}
