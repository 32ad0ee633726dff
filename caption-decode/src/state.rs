//! Opaque recurrent state carried between decoding steps.
//!
//! A [`RecurrentState`] is a tuple of tensors sharing their leading dimension,
//! one row per live hypothesis. The decoders never look inside the tensors,
//! they only slice, gather and concatenate rows.
use candle::Tensor;

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct RecurrentState {
    tensors: Vec<Tensor>,
    rows: usize,
}

impl RecurrentState {
    pub fn new(tensors: Vec<Tensor>) -> Result<Self> {
        let first = tensors.first().ok_or(Error::EmptyState)?;
        let rows = first.dim(0)?;
        for (index, t) in tensors.iter().enumerate().skip(1) {
            let got = t.dim(0)?;
            if got != rows {
                return Err(Error::StateRows {
                    index,
                    expected: rows,
                    got,
                });
            }
        }
        Ok(Self { tensors, rows })
    }

    /// Number of rows, i.e. live hypotheses.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of tensors in the tuple.
    pub fn arity(&self) -> usize {
        self.tensors.len()
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    pub fn get(&self, index: usize) -> Option<&Tensor> {
        self.tensors.get(index)
    }

    pub fn into_tensors(self) -> Vec<Tensor> {
        self.tensors
    }

    /// Gathers the given rows from every tensor. Indices may repeat.
    pub fn select(&self, indices: &Tensor) -> Result<Self> {
        let tensors = self
            .tensors
            .iter()
            .map(|t| t.index_select(indices, 0))
            .collect::<candle::Result<Vec<_>>>()?;
        let rows = indices.dim(0)?;
        Ok(Self { tensors, rows })
    }

    pub fn narrow_rows(&self, start: usize, len: usize) -> Result<Self> {
        let tensors = self
            .tensors
            .iter()
            .map(|t| t.narrow(0, start, len))
            .collect::<candle::Result<Vec<_>>>()?;
        Ok(Self { tensors, rows: len })
    }

    /// Concatenates states row-wise, tensor by tensor.
    pub fn cat(states: &[&RecurrentState]) -> Result<Self> {
        let first = states.first().ok_or(Error::EmptyState)?;
        let arity = first.arity();
        if let Some(other) = states.iter().find(|s| s.arity() != arity) {
            return Err(Error::StateArity {
                lhs: arity,
                rhs: other.arity(),
            });
        }
        let tensors = (0..arity)
            .map(|i| {
                let parts: Vec<&Tensor> = states.iter().map(|s| &s.tensors[i]).collect();
                Tensor::cat(&parts, 0)
            })
            .collect::<candle::Result<Vec<_>>>()?;
        Self::new(tensors)
    }
}

impl TryFrom<Vec<Tensor>> for RecurrentState {
    type Error = Error;

    fn try_from(tensors: Vec<Tensor>) -> Result<Self> {
        Self::new(tensors)
    }
}
