use std::{fs, num::NonZeroUsize, path::Path, path::PathBuf, time::Duration};

use clap::ValueEnum;
use comms::ServerAddr;
use machine_learning::{ModelFamily, TrainParams};
use serde::{Deserialize, Serialize};

use crate::{ClientErr, Result};

/// Used whenever the job has no `sleep_time_ms` of its own.
pub const DEFAULT_SLEEP_TIME_MS: u64 = 1000;

/// How the server combines the participants' models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    /// One model, trained and evaluated through the same session.
    #[default]
    FederatedLearning,
    /// Separate training and inference models.
    HybridTraining,
}

/// How the submitted update is protected, fixed for the whole job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EncryptLevel {
    #[default]
    NotEncrypt,
    /// Clipped and noised updates with an adaptive clip bound.
    DpEncrypt,
    /// Pairwise masking, removed by the server after aggregation.
    PwEncrypt,
}

/// Differential privacy parameters, only read with `EncryptLevel::DpEncrypt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DpConfig {
    pub eps: f64,
    pub delta: f64,
    /// Scales the observed global update norm into the next clip bound.
    pub norm_clip_factor: f32,
    /// The clip bound used until the first global update has been observed.
    pub norm_clip: f32,
}

impl Default for DpConfig {
    fn default() -> Self {
        Self {
            eps: 100.0,
            delta: 0.01,
            norm_clip_factor: 1.0,
            norm_clip: 1.0,
        }
    }
}

/// A participant's whole job configuration, built once and shared by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlConfig {
    pub fl_name: String,
    pub client_id: String,

    pub train_model_path: PathBuf,
    /// Required in `ServerMode::HybridTraining`.
    #[serde(default)]
    pub infer_model_path: Option<PathBuf>,
    pub train_dataset: PathBuf,
    /// Evaluation runs after every round only when set.
    #[serde(default)]
    pub test_dataset: Option<PathBuf>,
    #[serde(default)]
    pub infer_dataset: Option<PathBuf>,

    pub server: ServerAddr,
    pub model: ModelFamily,
    #[serde(default)]
    pub mode: ServerMode,
    #[serde(default)]
    pub encrypt_level: EncryptLevel,
    #[serde(default)]
    pub dp: DpConfig,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: NonZeroUsize,
    /// Seeds shuffling and masks, random when missing.
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Upper bound for a single request/response exchange.
    #[serde(default = "default_time_window_ms")]
    pub time_window_ms: u64,
    #[serde(default = "default_sleep_time_ms")]
    pub sleep_time_ms: u64,
    /// Honor the server's next request time when a round restarts.
    #[serde(default)]
    pub use_timer: bool,
    /// Fail the job after this many consecutive restarts, never when missing.
    #[serde(default)]
    pub max_restarts: Option<u32>,
}

fn default_learning_rate() -> f32 {
    0.01
}

fn default_epochs() -> usize {
    1
}

fn default_batch_size() -> NonZeroUsize {
    NonZeroUsize::new(32).unwrap_or(NonZeroUsize::MIN)
}

fn default_iterations() -> u32 {
    1
}

fn default_time_window_ms() -> u64 {
    300_000
}

fn default_sleep_time_ms() -> u64 {
    DEFAULT_SLEEP_TIME_MS
}

impl FlConfig {
    /// Reads a json config file.
    ///
    /// # Errors
    /// If the file can't be read or parsed. The result isn't validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;

        serde_json::from_str(&contents).map_err(|source| ClientErr::ConfigFile {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks the values a job can't start without.
    ///
    /// # Errors
    /// `ClientErr::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ClientErr::InvalidConfig(msg.to_string()));

        if self.fl_name.is_empty() {
            return invalid("fl_name can't be empty");
        }

        if self.client_id.is_empty() {
            return invalid("client_id can't be empty");
        }

        if self.iterations == 0 {
            return invalid("iterations must be positive");
        }

        if self.epochs == 0 {
            return invalid("epochs must be positive");
        }

        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid("learning_rate must be a positive number");
        }

        if self.mode == ServerMode::HybridTraining && self.infer_model_path.is_none() {
            return invalid("hybrid training needs an infer_model_path");
        }

        if self.server.use_elb {
            let server = &self.server;
            if server.server_num == 0 {
                return invalid("server_num must be positive with load balancing");
            }

            if u32::from(server.port) + u32::from(server.server_num) - 1 > u32::from(u16::MAX) {
                return invalid("port + server_num - 1 must be a valid port with load balancing");
            }
        }

        if self.encrypt_level == EncryptLevel::DpEncrypt {
            let dp = &self.dp;

            if !(dp.eps > 0.0) {
                return invalid("dp.eps must be positive");
            }

            if !(dp.delta > 0.0 && dp.delta < 1.0) {
                return invalid("dp.delta must be in (0, 1)");
            }

            if !(dp.norm_clip_factor > 0.0) {
                return invalid("dp.norm_clip_factor must be positive");
            }

            if !(dp.norm_clip > 0.0) {
                return invalid("dp.norm_clip must be positive");
            }
        }

        Ok(())
    }

    pub fn dp_active(&self) -> bool {
        self.encrypt_level == EncryptLevel::DpEncrypt
    }

    pub fn mask_active(&self) -> bool {
        self.encrypt_level == EncryptLevel::PwEncrypt
    }

    /// The pause between retries of a phase the server asked to wait.
    pub fn sleep_time(&self) -> Duration {
        Duration::from_millis(self.sleep_time_ms)
    }

    pub fn time_window(&self) -> Duration {
        Duration::from_millis(self.time_window_ms)
    }

    /// The model used for evaluation and inference.
    pub fn eval_model_path(&self) -> &Path {
        match (self.mode, &self.infer_model_path) {
            (ServerMode::HybridTraining, Some(path)) => path,
            _ => &self.train_model_path,
        }
    }

    /// The hyper parameters of one round of local training.
    ///
    /// # Arguments
    /// * `iteration` - The round, mixed into the seed so every round shuffles differently.
    /// * `learning_rate` - Overrides the configured learning rate when set.
    pub fn train_params(&self, iteration: u32, learning_rate: Option<f32>) -> TrainParams {
        let seed = self.seed.unwrap_or_else(rand::random);

        TrainParams {
            learning_rate: learning_rate.unwrap_or(self.learning_rate),
            epochs: self.epochs,
            batch_size: self.batch_size,
            seed: seed.wrapping_add(iteration as u64),
        }
    }
}
