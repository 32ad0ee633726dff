use serde::Deserialize;

use crate::{Error, Result};

fn default_out_size() -> usize {
    1
}

/// Beam search parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BeamSearchConfig {
    /// Maximum number of live hypotheses per example.
    pub beam_size: usize,
    /// Number of hypotheses returned per example.
    #[serde(default = "default_out_size")]
    pub out_size: usize,
    /// Maximum number of decoding steps.
    pub seq_len: usize,
    pub eos_idx: u32,
}

impl BeamSearchConfig {
    pub fn new(beam_size: usize, seq_len: usize, eos_idx: u32) -> Self {
        Self {
            beam_size,
            out_size: default_out_size(),
            seq_len,
            eos_idx,
        }
    }

    pub fn with_out_size(mut self, out_size: usize) -> Self {
        self.out_size = out_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let check = |value: usize, name: &str| {
            if value == 0 {
                Err(Error::InvalidConfig(format!("{name} must be at least 1")))
            } else {
                Ok(())
            }
        };
        check(self.beam_size, "beam_size")?;
        check(self.out_size, "out_size")?;
        check(self.seq_len, "seq_len")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sizes_are_rejected() {
        assert!(BeamSearchConfig::new(3, 20, 0).validate().is_ok());
        for cfg in [
            BeamSearchConfig::new(0, 20, 0),
            BeamSearchConfig::new(3, 0, 0),
            BeamSearchConfig::new(3, 20, 0).with_out_size(0),
        ] {
            assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
        }
    }
}
