use std::fmt;

use comms::ControlStatus;

use crate::state::RoundState;

/// The steps of a round, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    LoadLocalData,
    StartJob,
    SnapshotOldFeatureMap,
    CreateAggregationMask,
    LocalTrain,
    SubmitUpdate,
    Unmask,
    PullGlobalModel,
    UpdateClipBound,
    Evaluate,
}

impl Phase {
    /// Every phase of a round, in order.
    pub const ROUND: [Phase; 10] = [
        Phase::LoadLocalData,
        Phase::StartJob,
        Phase::SnapshotOldFeatureMap,
        Phase::CreateAggregationMask,
        Phase::LocalTrain,
        Phase::SubmitUpdate,
        Phase::Unmask,
        Phase::PullGlobalModel,
        Phase::UpdateClipBound,
        Phase::Evaluate,
    ];

    /// Whether the server may answer this phase with a wait.
    pub fn may_wait(self) -> bool {
        matches!(
            self,
            Phase::StartJob | Phase::SubmitUpdate | Phase::PullGlobalModel
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::LoadLocalData => "loadLocalData",
            Phase::StartJob => "startJob",
            Phase::SnapshotOldFeatureMap => "snapshotOldFeatureMap",
            Phase::CreateAggregationMask => "createAggregationMask",
            Phase::LocalTrain => "localTrain",
            Phase::SubmitUpdate => "submitUpdate",
            Phase::Unmask => "unmask",
            Phase::PullGlobalModel => "pullGlobalModel",
            Phase::UpdateClipBound => "updateClipBound",
            Phase::Evaluate => "evaluate",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The participant side of a round, driven phase by phase by the orchestrator.
///
/// Implementations never fail outright: every error is logged, recorded in the state's return
/// code and reported as `ControlStatus::Failed`.
#[allow(unused)]
#[trait_variant::make(RoundPhases: Send)]
pub trait RoundPhasesTemplate {
    /// The job's name, as reported to the `ResultReporter`.
    fn fl_name(&self) -> &str;

    fn state(&self) -> &RoundState;

    fn state_mut(&mut self) -> &mut RoundState;

    /// Whether `phase` takes part in this job's rounds at all.
    fn enabled(&self, phase: Phase) -> bool {
        let _ = phase;
        true
    }

    /// Runs a single attempt of `phase`.
    async fn run_phase(&mut self, phase: Phase) -> ControlStatus;
}
