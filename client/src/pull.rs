use comms::{
    ControlStatus, FeatureMap, ResultCode, Transport,
    msg::{GetModel, Request, Response},
};
use log::{error, info};
use machine_learning::{Engine, Session, SessionKind};

use crate::{
    ClientErr, Result,
    config::{FlConfig, ServerMode},
    net::ServerClient,
};

/// What a model pull ended with.
#[derive(Debug, Clone, PartialEq)]
pub struct PullOutcome {
    pub status: ControlStatus,
    pub retcode: ResultCode,
    pub next_req_time: Option<u64>,
}

impl PullOutcome {
    fn local_failure() -> Self {
        Self {
            status: ControlStatus::Failed,
            retcode: ResultCode::LOCAL_ERROR,
            next_req_time: None,
        }
    }
}

/// Fetches the latest global model and writes it into the local model artifacts.
///
/// The sessions the pull needs are opened before the request and dropped before `pull`
/// returns, whatever the outcome.
pub struct ModelPullProtocol<'a, E, T> {
    config: &'a FlConfig,
    engine: &'a E,
    server: &'a ServerClient<T>,
}

impl<'a, E, T> ModelPullProtocol<'a, E, T>
where
    E: Engine,
    T: Transport + Sync,
{
    pub fn new(config: &'a FlConfig, engine: &'a E, server: &'a ServerClient<T>) -> Self {
        Self {
            config,
            engine,
            server,
        }
    }

    /// Runs one model pull.
    ///
    /// # Arguments
    /// * `iteration` - The round the model is requested for.
    ///
    /// # Returns
    /// The outcome, failures of any kind are folded into `ControlStatus::Failed`.
    pub async fn pull(&self, iteration: u32) -> PullOutcome {
        let mut sessions = match self.open_sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                error!("[getModel] can't initialize the model sessions: {e}");
                return PullOutcome::local_failure();
            }
        };

        let req = Request::GetModel(GetModel {
            fl_name: self.config.fl_name.clone(),
            iteration,
            index: 0,
        });

        let res = match self.server.request(&req).await {
            Ok(res) => res,
            Err(e) => {
                error!("[getModel] request failed: {e}");
                return PullOutcome::local_failure();
            }
        };

        let outcome = PullOutcome {
            status: res.status(),
            retcode: res.retcode,
            next_req_time: res.next_req_time,
        };

        match outcome.status {
            ControlStatus::Success => {
                if let Err(e) = Self::store(&mut sessions, res) {
                    error!("[getModel] can't store the global model: {e}");
                    return PullOutcome::local_failure();
                }

                info!(iteration = iteration; "[getModel] global model updated");
            }
            ControlStatus::Wait => info!("[getModel] the server is still aggregating"),
            ControlStatus::Restart => info!("[getModel] the round is out of time"),
            ControlStatus::Failed => {
                error!(retcode = res.retcode.0; "[getModel] rejected: {}", res.reason)
            }
        }

        outcome
    }

    fn open_sessions(&self) -> Result<Vec<Session>> {
        let cfg = self.config;
        let mut sessions = vec![
            self.engine
                .init_session(&cfg.train_model_path, SessionKind::Train)?,
        ];

        if let (ServerMode::HybridTraining, Some(path)) = (cfg.mode, &cfg.infer_model_path) {
            sessions.push(self.engine.init_session(path, SessionKind::Infer)?);
        }

        Ok(sessions)
    }

    fn store(sessions: &mut [Session], res: Response) -> Result<()> {
        let features: FeatureMap = res.features.ok_or(ClientErr::MissingModel)?;

        for session in sessions {
            session.load_feature_map(&features)?;
            session.save()?;
        }

        Ok(())
    }
}
