use clap::ValueEnum;
use comms::{ControlStatus, HttpTransport, Transport};
use log::{error, info};
use machine_learning::{Dataset, Engine, LocalEngine, Model, SessionKind};

use crate::{
    FlConfig, Result,
    client::FlClient,
    net::ServerClient,
    orchestrator::{RetryPolicy, Sleeper, SyncFlJob, TokioSleeper},
    pull::ModelPullProtocol,
    reporter::LogReporter,
};

/// What the process was started to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Task {
    /// Take part in every configured round.
    Train,
    /// Label the inference dataset with the local model.
    Inference,
    /// Fetch the latest global model once.
    GetModel,
}

/// Runs `task` against the real engine and an http transport.
///
/// # Errors
/// Only if the transport can't be built, every other failure is logged and reported as
/// `ControlStatus::Failed`.
pub async fn run(task: Task, config: &FlConfig) -> Result<ControlStatus> {
    let engine = LocalEngine::new(config.model);

    let status = match task {
        Task::Train => {
            let transport = HttpTransport::new(&config.server, config.time_window())?;
            train(config, engine, transport, TokioSleeper).await
        }
        Task::GetModel => {
            let transport = HttpTransport::new(&config.server, config.time_window())?;
            let server = ServerClient::new(transport, config.server.clone());
            get_model(config, &engine, &server).await
        }
        Task::Inference => inference(config, &engine),
    };

    Ok(status)
}

/// Runs the whole job.
pub async fn train<E, T, S>(config: &FlConfig, engine: E, transport: T, sleeper: S) -> ControlStatus
where
    E: Engine,
    T: Transport + Sync,
    S: Sleeper,
{
    let client = FlClient::new(config, engine, transport);
    let mut job = SyncFlJob::new(client, sleeper, LogReporter, RetryPolicy::from_config(config));

    let summary = job.run().await;
    info!(
        rounds = summary.completed_rounds,
        retcode = summary.retcode.0;
        "job ended with {}", summary.status
    );

    summary.status
}

/// Pulls the latest global model into the local artifacts.
pub async fn get_model<E, T>(config: &FlConfig, engine: &E, server: &ServerClient<T>) -> ControlStatus
where
    E: Engine,
    T: Transport + Sync,
{
    ModelPullProtocol::new(config, engine, server).pull(0).await.status
}

/// Labels every sample of the inference dataset.
pub fn inference<E: Engine>(config: &FlConfig, engine: &E) -> ControlStatus {
    match predict(config, engine) {
        Ok(labels) if labels.is_empty() => {
            error!("[inference] no predictions were produced");
            ControlStatus::Failed
        }
        Ok(labels) => {
            info!(samples = labels.len(); "[inference] predicted labels: {labels:?}");
            ControlStatus::Success
        }
        Err(e) => {
            error!("[inference] {e}");
            ControlStatus::Failed
        }
    }
}

fn predict<E: Engine>(config: &FlConfig, engine: &E) -> Result<Vec<f32>> {
    let session = engine.init_session(config.eval_model_path(), SessionKind::Infer)?;

    let path = config
        .infer_dataset
        .as_ref()
        .or(config.test_dataset.as_ref())
        .unwrap_or(&config.train_dataset);

    let dataset = Dataset::load_csv(path, session.model().dense().dim().0)?;
    Ok(session.infer(&dataset)?)
}
