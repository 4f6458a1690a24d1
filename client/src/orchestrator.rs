use std::time::Duration;

use comms::{ControlStatus, ResultCode};
use log::{debug, error, info, warn};

use crate::{
    config::FlConfig,
    phase::{Phase, RoundPhases},
    reporter::ResultReporter,
    state::unix_millis,
};

/// Suspends the job between retries.
#[allow(unused)]
#[trait_variant::make(Sleeper: Send)]
pub trait SleeperTemplate {
    async fn sleep(&self, duration: Duration);
}

/// A `Sleeper` backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How the job waits and when it gives up on restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause before retrying a waiting phase, and before a restart without server timing.
    pub sleep_time: Duration,
    /// Honor the server's next request time on restarts.
    pub use_timer: bool,
    /// Consecutive restarts tolerated before the job fails.
    pub max_restarts: Option<u32>,
}

impl RetryPolicy {
    pub fn from_config(config: &FlConfig) -> Self {
        Self {
            sleep_time: config.sleep_time(),
            use_timer: config.use_timer,
            max_restarts: config.max_restarts,
        }
    }

    /// The pause before a restarted round begins again.
    ///
    /// # Arguments
    /// * `next_req_time` - The server's requested time, in milliseconds since the unix epoch.
    /// * `now` - The current time, in the same unit.
    pub fn restart_delay(&self, next_req_time: Option<u64>, now: u64) -> Duration {
        match next_req_time {
            Some(at) if self.use_timer && at > now => Duration::from_millis(at - now),
            _ => self.sleep_time,
        }
    }
}

/// How a job run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSummary {
    /// `Success` if every round completed, `Failed` otherwise.
    pub status: ControlStatus,
    pub completed_rounds: u32,
    pub retcode: ResultCode,
}

/// Drives a participant through the rounds of a synchronous federated learning job.
pub struct SyncFlJob<P, S, R> {
    phases: P,
    sleeper: S,
    reporter: R,
    policy: RetryPolicy,
}

impl<P, S, R> SyncFlJob<P, S, R>
where
    P: RoundPhases,
    S: Sleeper,
    R: ResultReporter,
{
    /// Creates a new `SyncFlJob`.
    ///
    /// # Arguments
    /// * `phases` - The participant running each phase.
    /// * `sleeper` - Where waits are spent.
    /// * `reporter` - Gets the round and job notifications.
    /// * `policy` - Wait and restart rules.
    pub fn new(phases: P, sleeper: S, reporter: R, policy: RetryPolicy) -> Self {
        Self {
            phases,
            sleeper,
            reporter,
            policy,
        }
    }

    pub fn phases(&self) -> &P {
        &self.phases
    }

    pub fn into_phases(self) -> P {
        self.phases
    }

    /// Runs rounds until the configured amount completes or one fails.
    ///
    /// # Returns
    /// A summary of the run. The reporter has been told about every round attempt and, exactly
    /// once, about the job.
    pub async fn run(&mut self) -> JobSummary {
        let mut completed = 0;

        let status = loop {
            let state = self.phases.state();
            if !state.has_rounds_left() {
                break ControlStatus::Success;
            }

            let round = state.iteration;
            info!(round = round, total = state.iterations; "round started");

            let status = self.run_round().await;
            let retcode = self.phases.state().retcode;
            let fl_name = self.phases.fl_name().to_string();

            match status {
                ControlStatus::Success => {
                    self.reporter.on_round_finished(&fl_name, round, retcode);
                    self.phases.state_mut().finish_round();
                    completed += 1;
                }
                ControlStatus::Restart => {
                    self.reporter.on_round_finished(&fl_name, round, retcode);

                    let state = self.phases.state_mut();
                    state.restarts += 1;

                    let restarts = state.restarts;
                    if self.policy.max_restarts.is_some_and(|max| restarts > max) {
                        error!(round = round; "restarted {restarts} times in a row, giving up");
                        break ControlStatus::Failed;
                    }

                    let delay = self.policy.restart_delay(state.next_req_time, unix_millis());
                    warn!(round = round; "round restarts in {delay:?}");
                    self.sleeper.sleep(delay).await;
                }
                ControlStatus::Wait | ControlStatus::Failed => {
                    self.reporter.on_round_finished(&fl_name, round, retcode);
                    error!(round = round, retcode = retcode.0; "round failed");
                    break ControlStatus::Failed;
                }
            }
        };

        let state = self.phases.state();
        let summary = JobSummary {
            status,
            completed_rounds: completed,
            retcode: state.retcode,
        };

        let fl_name = self.phases.fl_name().to_string();
        self.reporter
            .on_job_finished(&fl_name, state.iterations, summary.retcode);

        summary
    }

    async fn run_round(&mut self) -> ControlStatus {
        self.phases.state_mut().begin_round();

        for phase in Phase::ROUND {
            if !self.phases.enabled(phase) {
                debug!("[{phase}] skipped");
                continue;
            }

            match self.run_phase(phase).await {
                ControlStatus::Success => {}
                status => return status,
            }
        }

        ControlStatus::Success
    }

    /// Runs `phase` until it stops asking to wait.
    async fn run_phase(&mut self, phase: Phase) -> ControlStatus {
        loop {
            match self.phases.run_phase(phase).await {
                ControlStatus::Wait if phase.may_wait() => {
                    info!("[{phase}] retrying in {:?}", self.policy.sleep_time);
                    self.sleeper.sleep(self.policy.sleep_time).await;
                }
                ControlStatus::Wait => {
                    error!("[{phase}] the server asked to wait where it can't");
                    return ControlStatus::Failed;
                }
                status => return status,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(use_timer: bool) -> RetryPolicy {
        RetryPolicy {
            sleep_time: Duration::from_millis(1000),
            use_timer,
            max_restarts: None,
        }
    }

    #[test]
    fn restart_delay_follows_the_server_only_with_the_timer() {
        assert_eq!(
            policy(true).restart_delay(Some(5_000), 2_000),
            Duration::from_millis(3_000)
        );
        assert_eq!(
            policy(false).restart_delay(Some(5_000), 2_000),
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn restart_delay_falls_back_when_the_time_has_passed() {
        assert_eq!(
            policy(true).restart_delay(Some(1_000), 2_000),
            Duration::from_millis(1_000)
        );
        assert_eq!(
            policy(true).restart_delay(None, 2_000),
            Duration::from_millis(1_000)
        );
    }
}
