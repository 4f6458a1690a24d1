use std::time::{SystemTime, UNIX_EPOCH};

use comms::{FeatureMap, ResultCode};

use crate::{clip::AdaptiveClipTracker, mask::AggregationMask};

/// Mutable job progress, created once per job and carried across rounds.
#[derive(Debug, Clone)]
pub struct RoundState {
    /// The 1-based round being run, advanced only once a round succeeds.
    pub iteration: u32,
    /// The amount of rounds the job runs, the server may override it.
    pub iterations: u32,
    /// Consecutive restarts of the current round.
    pub restarts: u32,

    /// The last return code, from the server or synthesized locally.
    pub retcode: ResultCode,
    /// When the server wants the next request, in milliseconds since the unix epoch.
    pub next_req_time: Option<u64>,
    pub learning_rate: Option<f32>,

    pub clip: AdaptiveClipTracker,

    /// Per round values, cleared whenever a round (re)starts.
    pub data_size: usize,
    pub old_features: Option<FeatureMap>,
    pub mask: Option<AggregationMask>,
    pub trained: Option<FeatureMap>,
    pub submission: Option<FeatureMap>,
}

impl RoundState {
    /// Creates a new `RoundState` positioned at the first round.
    pub fn new(iterations: u32) -> Self {
        Self {
            iteration: 1,
            iterations,
            restarts: 0,
            retcode: ResultCode::UNSET,
            next_req_time: None,
            learning_rate: None,
            clip: AdaptiveClipTracker::new(),
            data_size: 0,
            old_features: None,
            mask: None,
            trained: None,
            submission: None,
        }
    }

    /// Whether there are rounds left to run.
    pub fn has_rounds_left(&self) -> bool {
        self.iteration <= self.iterations
    }

    /// Drops whatever the previous attempt left behind.
    pub fn begin_round(&mut self) {
        self.data_size = 0;
        self.old_features = None;
        self.mask = None;
        self.trained = None;
        self.submission = None;
    }

    /// Moves on to the next round.
    pub fn finish_round(&mut self) {
        self.iteration += 1;
        self.restarts = 0;
    }

    /// Records a failure that never reached the server.
    pub fn local_error(&mut self) {
        self.retcode = ResultCode::LOCAL_ERROR;
    }
}

/// Milliseconds since the unix epoch, zero if the clock is before it.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_advance_only_when_finished() {
        let mut state = RoundState::new(2);
        assert!(state.has_rounds_left());

        state.restarts = 3;
        state.begin_round();
        assert_eq!(state.iteration, 1);

        state.finish_round();
        assert_eq!((state.iteration, state.restarts), (2, 0));
        state.finish_round();
        assert!(!state.has_rounds_left());
    }

    #[test]
    fn begin_round_keeps_the_clip_bound() {
        let mut state = RoundState::new(3);
        state.clip.update_bound(1, 4.0, 1.0);
        state.trained = Some(FeatureMap::new());

        state.begin_round();
        assert!(state.trained.is_none());
        assert_eq!(state.clip.bound(), Some(4.0));
    }
}
