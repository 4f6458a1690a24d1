use std::borrow::Cow;

use comms::{
    ControlStatus, Transport,
    msg::{ExchangeKeys, ReconstructSecrets, Request, Response, StartFlJob, UpdateModel},
};
use log::{error, info, warn};
use machine_learning::{Dataset, Engine, Model, SessionKind};
use rand::{SeedableRng, rngs::StdRng};
use tokio::task;

use crate::{
    ClientErr, Result,
    clip::update_norm,
    config::FlConfig,
    mask::AggregationMask,
    net::ServerClient,
    phase::{Phase, RoundPhases},
    privacy,
    pull::ModelPullProtocol,
    state::{RoundState, unix_millis},
};

/// A federated learning participant: local data, a model engine and a link to the server.
pub struct FlClient<'a, E, T> {
    config: &'a FlConfig,
    engine: E,
    server: ServerClient<T>,
    state: RoundState,
    rng: StdRng,
}

impl<'a, E, T> FlClient<'a, E, T>
where
    E: Engine,
    T: Transport + Sync,
{
    /// Creates a new `FlClient` positioned at the first round.
    pub fn new(config: &'a FlConfig, engine: E, transport: T) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            config,
            engine,
            server: ServerClient::new(transport, config.server.clone()),
            state: RoundState::new(config.iterations),
            rng,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn transport(&self) -> &T {
        self.server.transport()
    }

    /// Turns the outcome of a phase into its control status, recording local failures.
    fn settle(&mut self, phase: Phase, outcome: Result<ControlStatus>) -> ControlStatus {
        outcome.unwrap_or_else(|e| {
            error!("[{phase}] {e}");
            self.state.local_error();
            ControlStatus::Failed
        })
    }

    /// Records what every server response carries.
    fn observe(&mut self, phase: Phase, res: &Response) -> ControlStatus {
        self.state.retcode = res.retcode;
        if res.next_req_time.is_some() {
            self.state.next_req_time = res.next_req_time;
        }

        let status = res.status();
        match status {
            ControlStatus::Success => info!("[{phase}] succeeded"),
            ControlStatus::Wait => info!("[{phase}] the server asked to wait"),
            ControlStatus::Restart => warn!(retcode = res.retcode.0; "[{phase}] out of time"),
            ControlStatus::Failed => {
                error!(retcode = res.retcode.0; "[{phase}] rejected: {}", res.reason)
            }
        }

        status
    }

    fn load_local_data(&mut self) -> Result<ControlStatus> {
        let samples = Dataset::count_samples(&self.config.train_dataset)?;
        if samples == 0 {
            error!(
                "[{}] no samples in {}",
                Phase::LoadLocalData,
                self.config.train_dataset.display()
            );
            self.state.local_error();
            return Ok(ControlStatus::Failed);
        }

        self.state.data_size = samples;
        info!(samples = samples; "[{}] local data ready", Phase::LoadLocalData);
        Ok(ControlStatus::Success)
    }

    async fn start_job(&mut self) -> Result<ControlStatus> {
        let req = Request::StartFlJob(StartFlJob {
            fl_name: self.config.fl_name.clone(),
            fl_id: self.config.client_id.clone(),
            data_size: self.state.data_size,
            iteration: self.state.iteration,
            timestamp: unix_millis(),
        });

        let res = self.server.request(&req).await?;
        let status = self.observe(Phase::StartJob, &res);
        if status != ControlStatus::Success {
            return Ok(status);
        }

        if let Some(iteration) = res.iteration {
            info!(
                round = self.state.iteration,
                server_iteration = iteration;
                "[{}] admitted", Phase::StartJob
            );
        }

        if let Some(iterations) = res.iterations {
            info!(iterations = iterations; "the server set the amount of rounds");
            self.state.iterations = iterations;
        }

        if let Some(lr) = res.learning_rate {
            self.state.learning_rate = Some(lr);
        }

        if let Some(features) = &res.features {
            let mut session = self
                .engine
                .init_session(&self.config.train_model_path, SessionKind::Train)?;

            session.load_feature_map(features)?;
            session.save()?;
            info!("[{}] loaded the initial model", Phase::StartJob);
        }

        Ok(status)
    }

    fn snapshot_old_feature_map(&mut self) -> Result<ControlStatus> {
        let session = self
            .engine
            .init_session(&self.config.train_model_path, SessionKind::Train)?;

        self.state.old_features = Some(session.feature_map());
        Ok(ControlStatus::Success)
    }

    async fn create_aggregation_mask(&mut self) -> Result<ControlStatus> {
        let len = self
            .engine
            .init_session(&self.config.train_model_path, SessionKind::Train)?
            .feature_map()
            .num_params();

        let mask = AggregationMask::random(&mut self.rng, len);
        let req = Request::ExchangeKeys(ExchangeKeys {
            fl_id: self.config.client_id.clone(),
            iteration: self.state.iteration,
            mask_len: mask.len(),
        });

        let res = self.server.request(&req).await?;
        let status = self.observe(Phase::CreateAggregationMask, &res);
        if status == ControlStatus::Success {
            self.state.mask = Some(mask);
        }

        Ok(status)
    }

    async fn local_train(&mut self) -> Result<ControlStatus> {
        let mut session = self
            .engine
            .init_session(&self.config.train_model_path, SessionKind::Train)?;

        let x_size = session.model().dense().dim().0;
        let mut dataset = Dataset::load_csv(&self.config.train_dataset, x_size)?;
        let params = self
            .config
            .train_params(self.state.iteration, self.state.learning_rate);

        // Training is cpu bound, the session and dataset are moved in and back out.
        let (session, stats) = task::spawn_blocking(move || {
            let stats = session.train(&mut dataset, &params);
            (session, stats)
        })
        .await?;

        let stats = stats?;
        info!(
            samples = stats.samples,
            loss = stats.final_loss().unwrap_or(f32::NAN);
            "[{}] finished", Phase::LocalTrain
        );

        self.state.trained = Some(session.feature_map());
        Ok(ControlStatus::Success)
    }

    /// Builds the weights to submit, once per round so retries resend the same update.
    fn submission(&mut self) -> Result<()> {
        if self.state.submission.is_some() {
            return Ok(());
        }

        let trained = self
            .state
            .trained
            .as_ref()
            .ok_or(ClientErr::OutOfOrder(Phase::SubmitUpdate.name()))?;

        let mut submission = if self.config.dp_active() {
            let old = self
                .state
                .old_features
                .as_ref()
                .ok_or(ClientErr::OutOfOrder(Phase::SubmitUpdate.name()))?;

            let bound = self.state.clip.bound().unwrap_or(self.config.dp.norm_clip);
            privacy::privatize(old, trained, bound, &self.config.dp, &mut self.rng)?
        } else {
            trained.clone()
        };

        if self.config.mask_active() {
            let mask = self
                .state
                .mask
                .ok_or(ClientErr::OutOfOrder(Phase::SubmitUpdate.name()))?;

            mask.apply(&mut submission)?;
        }

        self.state.submission = Some(submission);
        Ok(())
    }

    async fn submit_update(&mut self) -> Result<ControlStatus> {
        self.submission()?;

        let Some(submission) = &self.state.submission else {
            return Err(ClientErr::OutOfOrder(Phase::SubmitUpdate.name()));
        };

        let res = {
            let req = Request::UpdateModel(
                UpdateModel {
                    fl_name: self.config.fl_name.clone(),
                    fl_id: self.config.client_id.clone(),
                    iteration: self.state.iteration,
                    data_size: self.state.data_size,
                },
                Cow::Borrowed(submission),
            );

            self.server.request(&req).await?
        };

        Ok(self.observe(Phase::SubmitUpdate, &res))
    }

    async fn unmask(&mut self) -> Result<ControlStatus> {
        let mask = self
            .state
            .mask
            .ok_or(ClientErr::OutOfOrder(Phase::Unmask.name()))?;

        let req = Request::ReconstructSecrets(ReconstructSecrets {
            fl_id: self.config.client_id.clone(),
            iteration: self.state.iteration,
            seed: mask.seed(),
        });

        let res = self.server.request(&req).await?;
        Ok(self.observe(Phase::Unmask, &res))
    }

    async fn pull_global_model(&mut self) -> ControlStatus {
        let outcome = ModelPullProtocol::new(self.config, &self.engine, &self.server)
            .pull(self.state.iteration)
            .await;

        self.state.retcode = outcome.retcode;
        if outcome.next_req_time.is_some() {
            self.state.next_req_time = outcome.next_req_time;
        }

        outcome.status
    }

    fn update_clip_bound(&mut self) -> Result<ControlStatus> {
        let session = self
            .engine
            .init_session(&self.config.train_model_path, SessionKind::Train)?;

        let global = session.feature_map();
        let old = self
            .state
            .old_features
            .as_ref()
            .ok_or(ClientErr::OutOfOrder(Phase::UpdateClipBound.name()))?;

        if !old.same_shape(&global) {
            return Err(ClientErr::FeatureShape);
        }

        let norm = update_norm(old, &global);
        let bound = self.state.clip.update_bound(
            self.state.iteration,
            norm,
            self.config.dp.norm_clip_factor,
        );

        info!(norm = norm, bound = bound; "[{}] adaptive clip bound", Phase::UpdateClipBound);
        Ok(ControlStatus::Success)
    }

    fn evaluate(&mut self) -> Result<ControlStatus> {
        let Some(path) = &self.config.test_dataset else {
            return Ok(ControlStatus::Success);
        };

        let session = self
            .engine
            .init_session(self.config.eval_model_path(), SessionKind::Infer)?;
        let dataset = Dataset::load_csv(path, session.model().dense().dim().0)?;
        let report = session.evaluate(&dataset)?;

        match report.accuracy {
            Some(accuracy) => info!(
                samples = report.samples,
                loss = report.loss,
                accuracy = accuracy;
                "[{}] finished", Phase::Evaluate
            ),
            None => info!(
                samples = report.samples,
                loss = report.loss;
                "[{}] finished", Phase::Evaluate
            ),
        }

        Ok(ControlStatus::Success)
    }
}

impl<E, T> RoundPhases for FlClient<'_, E, T>
where
    E: Engine,
    T: Transport + Sync,
{
    fn fl_name(&self) -> &str {
        &self.config.fl_name
    }

    fn state(&self) -> &RoundState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RoundState {
        &mut self.state
    }

    fn enabled(&self, phase: Phase) -> bool {
        match phase {
            Phase::SnapshotOldFeatureMap | Phase::UpdateClipBound => self.config.dp_active(),
            Phase::CreateAggregationMask | Phase::Unmask => self.config.mask_active(),
            Phase::Evaluate => self.config.test_dataset.is_some(),
            _ => true,
        }
    }

    async fn run_phase(&mut self, phase: Phase) -> ControlStatus {
        let outcome = match phase {
            Phase::LoadLocalData => self.load_local_data(),
            Phase::StartJob => self.start_job().await,
            Phase::SnapshotOldFeatureMap => self.snapshot_old_feature_map(),
            Phase::CreateAggregationMask => self.create_aggregation_mask().await,
            Phase::LocalTrain => self.local_train().await,
            Phase::SubmitUpdate => self.submit_update().await,
            Phase::Unmask => self.unmask().await,
            Phase::PullGlobalModel => return self.pull_global_model().await,
            Phase::UpdateClipBound => self.update_clip_bound(),
            Phase::Evaluate => self.evaluate(),
        };

        self.settle(phase, outcome)
    }
}
