//! Requests the participant sends to the aggregation server and the responses it gets back.

use std::{borrow::Cow, io};

use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::{
    ControlStatus, Deserialize, FeatureMap, FeatureSpec, ResultCode, Serialize,
    codec::{self, invalid_data},
};

/// Every exchange of the round protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgKind {
    StartFlJob,
    ExchangeKeys,
    UpdateModel,
    ReconstructSecrets,
    GetModel,
}

impl MsgKind {
    /// The path, relative to the server url, this kind of request is posted to.
    pub fn endpoint(self) -> &'static str {
        match self {
            MsgKind::StartFlJob => "/startFLJob",
            MsgKind::ExchangeKeys => "/exchangeKeys",
            MsgKind::UpdateModel => "/updateModel",
            MsgKind::ReconstructSecrets => "/reconstructSecrets",
            MsgKind::GetModel => "/getModel",
        }
    }

    fn header(self) -> u32 {
        match self {
            MsgKind::StartFlJob => 1,
            MsgKind::ExchangeKeys => 2,
            MsgKind::UpdateModel => 3,
            MsgKind::ReconstructSecrets => 4,
            MsgKind::GetModel => 5,
        }
    }

    fn from_header(header: u32) -> io::Result<Self> {
        Ok(match header {
            1 => MsgKind::StartFlJob,
            2 => MsgKind::ExchangeKeys,
            3 => MsgKind::UpdateModel,
            4 => MsgKind::ReconstructSecrets,
            5 => MsgKind::GetModel,
            byte => return invalid_data(format!("received an invalid kind header {byte}")),
        })
    }
}

/// Asks the server to admit this participant into the current round.
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct StartFlJob {
    pub fl_name: String,
    pub fl_id: String,
    pub data_size: usize,
    pub iteration: u32,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
}

/// Registers this round's aggregation mask with the server.
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct ExchangeKeys {
    pub fl_id: String,
    pub iteration: u32,
    pub mask_len: usize,
}

#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct UpdateModel {
    pub fl_name: String,
    pub fl_id: String,
    pub iteration: u32,
    pub data_size: usize,
}

/// Hands the mask seed to the server so it can remove it from the aggregate.
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct ReconstructSecrets {
    pub fl_id: String,
    pub iteration: u32,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct GetModel {
    pub fl_name: String,
    pub iteration: u32,
    /// Zero-based retrieval index, reserved for chunked downloads.
    pub index: u32,
}

/// The application layer request of the round protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Request<'a> {
    StartFlJob(StartFlJob),
    ExchangeKeys(ExchangeKeys),
    UpdateModel(UpdateModel, Cow<'a, FeatureMap>),
    ReconstructSecrets(ReconstructSecrets),
    GetModel(GetModel),
}

impl Request<'_> {
    pub fn kind(&self) -> MsgKind {
        match self {
            Request::StartFlJob(_) => MsgKind::StartFlJob,
            Request::ExchangeKeys(_) => MsgKind::ExchangeKeys,
            Request::UpdateModel(..) => MsgKind::UpdateModel,
            Request::ReconstructSecrets(_) => MsgKind::ReconstructSecrets,
            Request::GetModel(_) => MsgKind::GetModel,
        }
    }
}

/// The json section of every frame.
#[derive(SerdeSerialize, SerdeDeserialize)]
struct Envelope<M> {
    meta: M,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    features: Option<Vec<FeatureSpec>>,
}

fn write_with_features<M>(
    buf: &mut Vec<u8>,
    kind: MsgKind,
    meta: &M,
    features: Option<&FeatureMap>,
) -> io::Result<()>
where
    M: SerdeSerialize,
{
    let (specs, flat) = match features {
        Some(features) => {
            let (specs, flat) = features.flatten();
            (Some(specs), flat)
        }
        None => (None, Vec::new()),
    };

    let envelope = Envelope {
        meta,
        features: specs,
    };

    codec::write_frame(buf, kind.header(), &envelope, &flat)
}

fn read_features(specs: Option<Vec<FeatureSpec>>, payload: &[u8]) -> io::Result<Option<FeatureMap>> {
    let Some(specs) = specs else {
        if !payload.is_empty() {
            return invalid_data(format!(
                "received a {} bytes payload without feature specs",
                payload.len()
            ));
        }

        return Ok(None);
    };

    let flat = codec::read_payload(payload)?;
    Ok(Some(FeatureMap::from_flat(&specs, &flat)?))
}

fn read_meta<'a, M>(meta: &'a [u8]) -> io::Result<Envelope<M>>
where
    M: SerdeDeserialize<'a>,
{
    Ok(serde_json::from_slice(meta)?)
}

impl Serialize for Request<'_> {
    fn serialize(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        let kind = self.kind();

        match self {
            Request::StartFlJob(meta) => write_with_features(buf, kind, meta, None),
            Request::ExchangeKeys(meta) => write_with_features(buf, kind, meta, None),
            Request::UpdateModel(meta, features) => {
                write_with_features(buf, kind, meta, Some(features.as_ref()))
            }
            Request::ReconstructSecrets(meta) => write_with_features(buf, kind, meta, None),
            Request::GetModel(meta) => write_with_features(buf, kind, meta, None),
        }
    }
}

impl<'a> Deserialize<'a> for Request<'static> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        let frame = codec::read_frame(buf)?;

        Ok(match MsgKind::from_header(frame.kind)? {
            MsgKind::StartFlJob => Request::StartFlJob(read_meta(frame.meta)?.meta),
            MsgKind::ExchangeKeys => Request::ExchangeKeys(read_meta(frame.meta)?.meta),
            MsgKind::UpdateModel => {
                let envelope: Envelope<UpdateModel> = read_meta(frame.meta)?;
                let Some(features) = read_features(envelope.features, frame.payload)? else {
                    return invalid_data("update request without a feature map");
                };

                Request::UpdateModel(envelope.meta, Cow::Owned(features))
            }
            MsgKind::ReconstructSecrets => {
                Request::ReconstructSecrets(read_meta(frame.meta)?.meta)
            }
            MsgKind::GetModel => Request::GetModel(read_meta(frame.meta)?.meta),
        })
    }
}

/// Scalar fields of a server response.
#[derive(Debug, Clone, Default, PartialEq, SerdeSerialize, SerdeDeserialize)]
struct ResponseMeta {
    retcode: ResultCode,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    next_req_time: Option<u64>,
    #[serde(default)]
    iteration: Option<u32>,
    #[serde(default)]
    iterations: Option<u32>,
    #[serde(default)]
    learning_rate: Option<f32>,
}

/// A decoded server response to any of the protocol requests.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub kind: MsgKind,
    pub retcode: ResultCode,
    pub reason: String,
    /// When the server wants to hear from us again, in milliseconds since the unix epoch.
    pub next_req_time: Option<u64>,
    /// The server side iteration this response belongs to.
    pub iteration: Option<u32>,
    /// Overrides the configured amount of rounds for the job.
    pub iterations: Option<u32>,
    /// Overrides the configured local learning rate.
    pub learning_rate: Option<f32>,
    /// The global model, for model pulls and job admission.
    pub features: Option<FeatureMap>,
}

impl Response {
    /// Creates a bare `Response` holding only a return code.
    pub fn new(kind: MsgKind, retcode: ResultCode) -> Self {
        Self {
            kind,
            retcode,
            reason: String::new(),
            next_req_time: None,
            iteration: None,
            iterations: None,
            learning_rate: None,
            features: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_next_req_time(mut self, millis: u64) -> Self {
        self.next_req_time = Some(millis);
        self
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = Some(iterations);
        self
    }

    pub fn with_learning_rate(mut self, lr: f32) -> Self {
        self.learning_rate = Some(lr);
        self
    }

    pub fn with_features(mut self, features: FeatureMap) -> Self {
        self.features = Some(features);
        self
    }

    /// The control outcome the return code stands for.
    pub fn status(&self) -> ControlStatus {
        self.retcode.status()
    }
}

impl Serialize for Response {
    fn serialize(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        let meta = ResponseMeta {
            retcode: self.retcode,
            reason: self.reason.clone(),
            next_req_time: self.next_req_time,
            iteration: self.iteration,
            iterations: self.iterations,
            learning_rate: self.learning_rate,
        };

        write_with_features(buf, self.kind, &meta, self.features.as_ref())
    }
}

impl<'a> Deserialize<'a> for Response {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        let frame = codec::read_frame(buf)?;
        let kind = MsgKind::from_header(frame.kind)?;

        let Envelope {
            meta,
            features: specs,
        } = read_meta::<ResponseMeta>(frame.meta)?;

        let features = read_features(specs, frame.payload)?;

        Ok(Self {
            kind,
            retcode: meta.retcode,
            reason: meta.reason,
            next_req_time: meta.next_req_time,
            iteration: meta.iteration,
            iterations: meta.iterations,
            learning_rate: meta.learning_rate,
            features,
        })
    }
}
