//! Decoding strategies for step-wise sequence models such as image
//! captioners.
//!
//! A model only has to implement [`StepModel`]: given the recurrent state and
//! the previously emitted tokens it returns log-probabilities over the
//! vocabulary for the next position. On top of that this crate provides
//!
//! - [`greedy`] argmax decoding,
//! - [`CategoricalSampler`] for sampling with log-probabilities, as used by
//!   policy-gradient training,
//! - [`beam_search`], [`par_beam_search`] and [`batched_beam_search`],
//! - [`teacher_forcing`], the ground-truth driven forward pass.
//!
//! ```no_run
//! use caption_decode::{beam_search, test_utils, BeamSearchConfig};
//! use candle::Device;
//!
//! # fn main() -> caption_decode::Result<()> {
//! let model = test_utils::ScriptedModel::new(5, 16, |_, _| vec![-2.0, -0.5, -1.5, -3.0, -4.0]);
//! let images = test_utils::example_inputs(2, &Device::Cpu)?;
//! let config = BeamSearchConfig::new(3, 16, 0).with_out_size(2);
//! for output in beam_search(&model, &images, &config)? {
//!     println!("{:?}", output.best());
//! }
//! # Ok(())
//! # }
//! ```
pub mod beam_search;
mod error;
pub mod generation;
mod model;
mod state;
pub mod test_utils;

pub use beam_search::{
    batched_beam_search, beam_search, par_beam_search, BeamOutput, BeamSearchConfig, Hypothesis,
};
pub use error::{Error, Result};
pub use generation::{greedy, teacher_forcing, CategoricalSampler};
pub use model::{StepMode, StepModel};
pub use state::RecurrentState;
