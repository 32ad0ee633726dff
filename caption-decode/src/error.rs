use candle::Shape;

/// Main library error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Candle(#[from] candle::Error),

    #[error("{op}: expected scores for {rows} rows and a vocab of {vocab:?}, got {got:?}")]
    ShapeMismatch {
        op: &'static str,
        rows: usize,
        vocab: Option<usize>,
        got: Shape,
    },

    #[error("state tensor {index} has {got} rows, expected {expected}")]
    StateRows {
        index: usize,
        expected: usize,
        got: usize,
    },

    #[error("recurrent state must hold at least one tensor")]
    EmptyState,

    #[error("cannot concatenate states of arity {lhs} and {rhs}")]
    StateArity { lhs: usize, rhs: usize },

    #[error("invalid decoding config: {0}")]
    InvalidConfig(String),

    #[error("sampling: {0}")]
    Sampling(String),
}

pub type Result<T> = std::result::Result<T, Error>;
