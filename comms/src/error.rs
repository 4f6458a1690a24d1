use std::{io, path::PathBuf};

use thiserror::Error;

/// The comms module's result type.
pub type Result<T> = std::result::Result<T, CommsErr>;

/// Failures while encoding, decoding or moving messages to the server.
#[derive(Debug, Error)]
pub enum CommsErr {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {url} with status {status}")]
    Status { url: String, status: u16 },

    #[error("cannot load certificate {}: {source}", path.display())]
    Certificate { path: PathBuf, source: io::Error },

    #[error("payload holds {got} values but the feature specs describe {expected}")]
    PayloadMismatch { got: usize, expected: usize },

    #[error("feature `{0}` appears more than once")]
    DuplicateFeature(String),
}

/// Boundary conversion for the codec, which speaks `io::Error`.
impl From<CommsErr> for io::Error {
    fn from(value: CommsErr) -> Self {
        match value {
            CommsErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
