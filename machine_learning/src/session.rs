use std::{
    fmt,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use comms::FeatureMap;
use log::debug;
use rand::{SeedableRng, rngs::StdRng};

use crate::{Artifact, Backend, Dataset, Dense, MlErr, Model, ModelFamily, Result};

/// What a session is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Train,
    Infer,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Train => f.write_str("train"),
            SessionKind::Infer => f.write_str("inference"),
        }
    }
}

/// Hyper parameters of a local training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainParams {
    pub learning_rate: f32,
    pub epochs: usize,
    pub batch_size: NonZeroUsize,
    /// Seeds the per epoch shuffling.
    pub seed: u64,
}

/// The outcome of `Session::train`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainStats {
    pub samples: usize,
    /// The mean batch loss of every epoch, in order.
    pub losses: Vec<f32>,
}

impl TrainStats {
    pub fn final_loss(&self) -> Option<f32> {
        self.losses.last().copied()
    }
}

/// The outcome of `Session::evaluate`.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    pub samples: usize,
    pub loss: f32,
    /// Fraction of correctly predicted labels, only for classifiers.
    pub accuracy: Option<f32>,
}

/// Opens sessions over model artifacts.
pub trait Engine: Send + Sync {
    /// Loads the artifact at `path` into a new session.
    ///
    /// # Errors
    /// If the artifact is missing or isn't a model this engine can run.
    fn init_session(&self, path: &Path, kind: SessionKind) -> Result<Session>;

    /// The amount of sessions opened and not yet dropped.
    fn live_sessions(&self) -> usize;
}

/// An `Engine` running a single `ModelFamily` on the cpu.
#[derive(Debug, Clone)]
pub struct LocalEngine {
    family: ModelFamily,
    live: Arc<AtomicUsize>,
}

impl LocalEngine {
    /// Creates a new `LocalEngine`.
    pub fn new(family: ModelFamily) -> Self {
        Self {
            family,
            live: Arc::default(),
        }
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }
}

impl Engine for LocalEngine {
    fn init_session(&self, path: &Path, kind: SessionKind) -> Result<Session> {
        let artifact = Artifact::load(path)?;
        let dense = Dense::from_artifact(&artifact)?;

        self.live.fetch_add(1, Ordering::SeqCst);
        debug!("opened {kind} session over {}", path.display());

        Ok(Session {
            kind,
            path: path.to_path_buf(),
            model: self.family.build(dense),
            _live: LiveGuard(Arc::clone(&self.live)),
        })
    }

    fn live_sessions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A model loaded from its artifact. Dropping it releases it.
#[derive(Debug)]
pub struct Session {
    kind: SessionKind,
    path: PathBuf,
    model: Backend,
    _live: LiveGuard,
}

impl Session {
    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// The artifact this session was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn model(&self) -> &Backend {
        &self.model
    }

    /// Runs `params.epochs` epochs of mini batch gradient descent over `data`.
    ///
    /// # Arguments
    /// * `data` - The training set, shuffled in place before every epoch.
    /// * `params` - The hyper parameters.
    ///
    /// # Errors
    /// If this isn't a training session, the dataset is empty or its shape doesn't fit the
    /// model.
    pub fn train(&mut self, data: &mut Dataset, params: &TrainParams) -> Result<TrainStats> {
        if self.kind != SessionKind::Train {
            return Err(MlErr::WrongSession {
                op: "train",
                kind: self.kind,
            });
        }

        if data.is_empty() {
            return Err(MlErr::EmptyDataset);
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut grad = vec![0.0; self.model.dense().size()];
        let mut losses = Vec::with_capacity(params.epochs);

        for epoch in 0..params.epochs {
            data.shuffle(&mut rng);

            let mut total = 0.0;
            let mut batches = 0;

            for (x, y) in data.batches(params.batch_size) {
                total += self.model.backward(x, y, &mut grad)?;
                batches += 1;

                let lr = params.learning_rate;
                for (w, g) in self.model.dense_mut().params_mut().iter_mut().zip(&grad) {
                    *w -= lr * g;
                }
            }

            let loss = total / batches as f32;
            debug!(epoch = epoch, loss = loss; "epoch finished");
            losses.push(loss);
        }

        Ok(TrainStats {
            samples: data.len(),
            losses,
        })
    }

    /// Measures the model over a labelled dataset.
    pub fn evaluate(&self, data: &Dataset) -> Result<EvalReport> {
        if data.is_empty() {
            return Err(MlErr::EmptyDataset);
        }

        let loss = self.model.loss(data.x(), data.y())?;

        let accuracy = if self.model.is_classifier() {
            let out = self.model.forward(data.x())?;
            let hits = out
                .iter()
                .zip(data.y())
                .filter(|&(o, y)| self.model.label(*o) == *y)
                .count();

            Some(hits as f32 / out.len() as f32)
        } else {
            None
        };

        Ok(EvalReport {
            samples: data.len(),
            loss,
            accuracy,
        })
    }

    /// Predicts a label for every output of every sample, row by row.
    pub fn infer(&self, data: &Dataset) -> Result<Vec<f32>> {
        let out = self.model.forward(data.x())?;
        Ok(out.iter().map(|o| self.model.label(*o)).collect())
    }

    /// Exports the current parameters.
    pub fn feature_map(&self) -> FeatureMap {
        self.model.dense().feature_map()
    }

    /// Overwrites the parameters named in `features`, see `Dense::load_feature_map`.
    pub fn load_feature_map(&mut self, features: &FeatureMap) -> Result<()> {
        self.model.dense_mut().load_feature_map(features)
    }

    /// Writes the current parameters back to the artifact the session was loaded from.
    pub fn save(&self) -> Result<()> {
        self.save_to(&self.path)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        self.model.dense().to_artifact()?.save(path)
    }
}
