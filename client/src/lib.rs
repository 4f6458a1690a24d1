pub mod client;
pub mod clip;
pub mod config;
pub mod error;
pub mod mask;
pub mod net;
pub mod orchestrator;
pub mod phase;
pub mod privacy;
pub mod pull;
pub mod reporter;
pub mod state;
pub mod task;

pub use client::FlClient;
pub use clip::{AdaptiveClipTracker, update_norm};
pub use config::{DpConfig, EncryptLevel, FlConfig, ServerMode};
pub use error::{ClientErr, Result};
pub use orchestrator::{JobSummary, RetryPolicy, Sleeper, SyncFlJob, TokioSleeper};
pub use phase::{Phase, RoundPhases};
pub use pull::{ModelPullProtocol, PullOutcome};
pub use reporter::{LogReporter, ResultReporter};
pub use state::RoundState;
pub use task::Task;
