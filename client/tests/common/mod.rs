#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    fs,
    path::Path,
    sync::Arc,
    time::Duration,
};

use comms::{
    CommsErr, Deserialize, FeatureMap, ResultCode, Serialize, Transport,
    msg::{MsgKind, Request, Response},
};
use fl_client::{FlConfig, ResultReporter, Sleeper};
use machine_learning::{Dense, Engine, LocalEngine};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Round(u32, ResultCode),
    Job(u32, ResultCode),
}

/// Keeps every notification.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    pub events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl ResultReporter for RecordingReporter {
    fn on_round_finished(&mut self, _: &str, round: u32, retcode: ResultCode) {
        self.events.lock().push(Event::Round(round, retcode));
    }

    fn on_job_finished(&mut self, _: &str, rounds: u32, retcode: ResultCode) {
        self.events.lock().push(Event::Job(rounds, retcode));
    }
}

/// Returns immediately, remembering each requested pause and the live sessions at that time.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    pub sleeps: Arc<Mutex<Vec<(Duration, usize)>>>,
    pub engine: Option<LocalEngine>,
}

impl RecordingSleeper {
    pub fn watching(engine: &LocalEngine) -> Self {
        Self {
            sleeps: Arc::default(),
            engine: Some(engine.clone()),
        }
    }

    pub fn sleeps(&self) -> Vec<(Duration, usize)> {
        self.sleeps.lock().clone()
    }
}

impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        let live = self.engine.as_ref().map_or(0, |e| e.live_sessions());
        self.sleeps.lock().push((duration, live));
    }
}

#[derive(Debug, Default)]
struct ServerState {
    requests: Vec<Request<'static>>,
    replies: HashMap<MsgKind, VecDeque<Response>>,
    global: Option<FeatureMap>,
}

/// An in memory aggregation server, scripted per request kind.
///
/// Unscripted requests succeed, model pulls then answer with the configured global model.
#[derive(Debug, Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    pub fn new(global: FeatureMap) -> Self {
        let server = Self::default();
        server.state.lock().global = Some(global);
        server
    }

    pub fn script(&self, kind: MsgKind, replies: impl IntoIterator<Item = Response>) {
        self.state
            .lock()
            .replies
            .entry(kind)
            .or_default()
            .extend(replies);
    }

    pub fn requests(&self) -> Vec<Request<'static>> {
        self.state.lock().requests.clone()
    }

    pub fn kinds(&self) -> Vec<MsgKind> {
        self.requests().iter().map(Request::kind).collect()
    }
}

impl Transport for MockServer {
    async fn sync_request(&self, url: &str, body: Vec<u8>) -> comms::Result<Vec<u8>> {
        let req: Request<'static> = Deserialize::deserialize(&body)?;
        let kind = req.kind();
        assert!(url.ends_with(kind.endpoint()), "{url} for {kind:?}");

        let mut state = self.state.lock();
        let res = match state.replies.get_mut(&kind).and_then(VecDeque::pop_front) {
            Some(res) => res,
            None => {
                let res = Response::new(kind, ResultCode::SUCCEED);
                match (kind, &state.global) {
                    (MsgKind::GetModel, Some(global)) => res.with_features(global.clone()),
                    _ => res,
                }
            }
        };

        state.requests.push(req);
        Ok(res.to_bytes()?)
    }
}

/// A server nobody can reach.
#[derive(Debug, Clone, Default)]
pub struct Unreachable {
    pub attempts: Arc<Mutex<usize>>,
}

impl Transport for Unreachable {
    async fn sync_request(&self, url: &str, _: Vec<u8>) -> comms::Result<Vec<u8>> {
        *self.attempts.lock() += 1;
        Err(CommsErr::Status {
            url: url.to_string(),
            status: 503,
        })
    }
}

pub fn write_model(path: &Path, dim: (usize, usize)) {
    Dense::zeros(dim).to_artifact().unwrap().save(path).unwrap();
}

/// Two clusters split by the sign of the first feature.
pub fn write_separable(path: &Path, rows: usize) {
    let mut csv = String::new();
    for i in 0..rows / 2 {
        let v = 0.5 + i as f32 / 10.0;
        csv.push_str(&format!("{v},0.3,1\n-{v},-0.2,0\n"));
    }

    fs::write(path, csv).unwrap();
}

pub fn global_model() -> FeatureMap {
    let mut features = FeatureMap::new();
    features.insert("dense.weight", vec![0.25, -0.25]);
    features.insert("dense.bias", vec![0.1]);
    features
}

/// A logistic job over `dir/model.safetensors` and `dir/train.csv`, both written here.
pub fn config(dir: &Path) -> FlConfig {
    write_model(&dir.join("model.safetensors"), (2, 1));
    write_separable(&dir.join("train.csv"), 40);

    serde_json::from_value(serde_json::json!({
        "fl_name": "logistic",
        "client_id": "client-0",
        "train_model_path": dir.join("model.safetensors"),
        "train_dataset": dir.join("train.csv"),
        "server": { "ip": "127.0.0.1", "port": 6666 },
        "model": "logistic",
        "learning_rate": 0.5,
        "epochs": 2,
        "batch_size": 8,
        "seed": 7,
        "sleep_time_ms": 250,
    }))
    .unwrap()
}

pub fn approx_eq(a: &FeatureMap, b: &FeatureMap, tol: f32) -> bool {
    a.same_shape(b)
        && a
            .iter()
            .zip(b.iter())
            .all(|((_, x), (_, y))| x.iter().zip(y).all(|(x, y)| (x - y).abs() <= tol))
}
