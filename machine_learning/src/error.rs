use std::{io, path::PathBuf};

use thiserror::Error;

use crate::session::SessionKind;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug, Error)]
pub enum MlErr {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed model artifact: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    #[error("invalid array shape: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("{path}:{line}: can't parse {value:?} as a number")]
    Parse {
        path: PathBuf,
        line: usize,
        value: String,
    },

    #[error("{path}:{line}: row has {got} columns, expected {expected}")]
    RaggedRow {
        path: PathBuf,
        line: usize,
        got: usize,
        expected: usize,
    },

    #[error("there's a size mismatch in the {what}, got {got} and expected {expected}")]
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("the artifact has no {0} tensor")]
    MissingTensor(&'static str),

    #[error("tensor {name} has dtype {dtype}, only F32 is supported")]
    UnsupportedDtype { name: String, dtype: String },

    #[error("tensor {name} has shape {shape:?}, which doesn't fit a dense layer")]
    BadTensorShape { name: String, shape: Vec<usize> },

    #[error("feature {name} has {got} values but the model expects {expected}")]
    FeatureShape {
        name: String,
        got: usize,
        expected: usize,
    },

    #[error("can't {op} with a {kind} session")]
    WrongSession {
        op: &'static str,
        kind: SessionKind,
    },

    #[error("the dataset is empty")]
    EmptyDataset,
}
