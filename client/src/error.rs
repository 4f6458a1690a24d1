use std::{io, path::PathBuf};

use comms::{CommsErr, msg::MsgKind};
use machine_learning::MlErr;
use thiserror::Error;

/// The client module's result type.
pub type Result<T> = std::result::Result<T, ClientErr>;

/// Participant side failures.
///
/// None of these escape a round phase, they are logged and turned into a failed outcome.
#[derive(Debug, Error)]
pub enum ClientErr {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Comms(#[from] CommsErr),

    #[error(transparent)]
    Ml(#[from] MlErr),

    #[error("can't read config {}: {source}", path.display())]
    ConfigFile {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("expected a {expected:?} response, got {got:?}")]
    UnexpectedResponse { expected: MsgKind, got: MsgKind },

    #[error("the server accepted the request but sent no model")]
    MissingModel,

    #[error("feature maps differ in shape")]
    FeatureShape,

    #[error("the {0} phase ran without its prerequisites")]
    OutOfOrder(&'static str),

    #[error("invalid noise scale: {0}")]
    Noise(#[from] rand_distr::NormalError),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

