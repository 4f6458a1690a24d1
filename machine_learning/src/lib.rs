pub mod artifact;
pub mod dataset;
pub mod error;
pub mod model;
pub mod session;

pub use artifact::Artifact;
pub use dataset::Dataset;
pub use error::{MlErr, Result};
pub use model::{Backend, Dense, Model, ModelFamily};
pub use session::{
    Engine, EvalReport, LocalEngine, Session, SessionKind, TrainParams, TrainStats,
};
