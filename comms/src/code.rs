use std::fmt;

use serde::{Deserialize, Serialize};

/// The outcome of a single round phase, as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStatus {
    Success,
    /// The server asked to retry the same request shortly.
    Wait,
    /// The round expired server side, the whole sequence must start over.
    Restart,
    Failed,
}

impl fmt::Display for ControlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControlStatus::Success => "SUCCESS",
            ControlStatus::Wait => "WAIT",
            ControlStatus::Restart => "RESTART",
            ControlStatus::Failed => "FAILED",
        };

        f.write_str(s)
    }
}

/// A return code, either sent by the server or synthesized locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultCode(pub i32);

impl ResultCode {
    /// Nothing has been exchanged with the server yet.
    pub const UNSET: Self = Self(0);
    /// A failure produced on this side, without a server verdict.
    pub const LOCAL_ERROR: Self = Self(-1);

    pub const SUCCEED: Self = Self(200);
    pub const SUC_NOT_READY: Self = Self(201);
    pub const OUT_OF_TIME: Self = Self(300);
    pub const REQUEST_ERROR: Self = Self(400);
    pub const SYSTEM_ERROR: Self = Self(500);

    /// Maps this code to the control outcome it stands for.
    ///
    /// # Returns
    /// `Success` for 200, `Wait` for 201, `Restart` for 300 and `Failed` otherwise.
    pub fn status(self) -> ControlStatus {
        match self {
            Self::SUCCEED => ControlStatus::Success,
            Self::SUC_NOT_READY => ControlStatus::Wait,
            Self::OUT_OF_TIME => ControlStatus::Restart,
            _ => ControlStatus::Failed,
        }
    }
}

impl Default for ResultCode {
    fn default() -> Self {
        Self::UNSET
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
