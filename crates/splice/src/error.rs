use std::fmt;

use stitch_ir::{AnalyzeError, InstId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpliceError {
    /// The request cannot be honoured; the target is left untouched.
    #[error("{0}")]
    Validation(ValidationError),
    /// An engine invariant broke while emitting or merging.
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
}

impl SpliceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(ValidationError {
            pos: None,
            index: None,
            message: message.into(),
        })
    }

    /// A validation error located at a handler instruction. `index` is the
    /// instruction's stream position in the handler.
    pub fn at(pos: InstId, index: usize, message: impl Into<String>) -> Self {
        Self::Validation(ValidationError {
            pos: Some(pos),
            index: Some(index),
            message: message.into(),
        })
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn message(&self) -> String {
        match self {
            Self::Validation(err) => err.message.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub pos: Option<InstId>,
    pub index: Option<usize>,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{} (handler instruction {index})", self.message),
            None => self.message.fmt(f),
        }
    }
}
