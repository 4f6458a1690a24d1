mod common;

use std::{
    collections::{HashMap, HashSet, VecDeque},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use comms::{ControlStatus, ResultCode};
use common::{Event, RecordingReporter, RecordingSleeper};
use fl_client::{Phase, RetryPolicy, RoundPhases, RoundState, SyncFlJob};

const SLEEP: Duration = Duration::from_millis(250);

/// Plays back scripted statuses, succeeding whenever a phase's script runs out.
struct ScriptedPhases {
    state: RoundState,
    script: HashMap<Phase, VecDeque<ControlStatus>>,
    disabled: HashSet<Phase>,
    calls: Vec<(u32, Phase)>,
    next_req_time: Option<u64>,
}

impl ScriptedPhases {
    fn new(iterations: u32) -> Self {
        Self {
            state: RoundState::new(iterations),
            script: HashMap::new(),
            disabled: HashSet::new(),
            calls: Vec::new(),
            next_req_time: None,
        }
    }

    fn script(mut self, phase: Phase, statuses: impl IntoIterator<Item = ControlStatus>) -> Self {
        self.script.entry(phase).or_default().extend(statuses);
        self
    }

    fn calls_to(&self, phase: Phase) -> usize {
        self.calls.iter().filter(|(_, p)| *p == phase).count()
    }
}

impl RoundPhases for ScriptedPhases {
    fn fl_name(&self) -> &str {
        "scripted"
    }

    fn state(&self) -> &RoundState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RoundState {
        &mut self.state
    }

    fn enabled(&self, phase: Phase) -> bool {
        !self.disabled.contains(&phase)
    }

    async fn run_phase(&mut self, phase: Phase) -> ControlStatus {
        self.calls.push((self.state.iteration, phase));

        let status = self
            .script
            .get_mut(&phase)
            .and_then(VecDeque::pop_front)
            .unwrap_or(ControlStatus::Success);

        self.state.retcode = match status {
            ControlStatus::Success => ResultCode::SUCCEED,
            ControlStatus::Wait => ResultCode::SUC_NOT_READY,
            ControlStatus::Restart => {
                self.state.next_req_time = self.next_req_time;
                ResultCode::OUT_OF_TIME
            }
            ControlStatus::Failed => ResultCode::SYSTEM_ERROR,
        };

        status
    }
}

fn policy(max_restarts: Option<u32>) -> RetryPolicy {
    RetryPolicy {
        sleep_time: SLEEP,
        use_timer: false,
        max_restarts,
    }
}

fn job(
    phases: ScriptedPhases,
    policy: RetryPolicy,
) -> (
    SyncFlJob<ScriptedPhases, RecordingSleeper, RecordingReporter>,
    RecordingSleeper,
    RecordingReporter,
) {
    let sleeper = RecordingSleeper::default();
    let reporter = RecordingReporter::default();
    let job = SyncFlJob::new(phases, sleeper.clone(), reporter.clone(), policy);
    (job, sleeper, reporter)
}

#[tokio::test]
async fn every_round_runs_every_phase_in_order() {
    let (mut job, sleeper, reporter) = job(ScriptedPhases::new(2), policy(None));

    let summary = job.run().await;
    assert_eq!(summary.status, ControlStatus::Success);
    assert_eq!(summary.completed_rounds, 2);

    let phases = job.into_phases();
    let expected: Vec<_> = [1, 2]
        .into_iter()
        .flat_map(|round| Phase::ROUND.map(|phase| (round, phase)))
        .collect();

    assert_eq!(phases.calls, expected);
    assert_eq!(phases.state.iteration, 3);
    assert!(sleeper.sleeps().is_empty());
    assert_eq!(
        reporter.events(),
        vec![
            Event::Round(1, ResultCode::SUCCEED),
            Event::Round(2, ResultCode::SUCCEED),
            Event::Job(2, ResultCode::SUCCEED),
        ]
    );
}

#[tokio::test]
async fn disabled_phases_are_skipped() {
    let mut phases = ScriptedPhases::new(1);
    phases.disabled.extend([Phase::Unmask, Phase::Evaluate]);

    let (mut job, _, _) = job(phases, policy(None));
    job.run().await;

    let phases = job.into_phases();
    assert_eq!(phases.calls.len(), Phase::ROUND.len() - 2);
    assert_eq!(phases.calls_to(Phase::Unmask), 0);
    assert_eq!(phases.calls_to(Phase::Evaluate), 0);
}

#[tokio::test]
async fn restart_reruns_the_round_without_advancing() {
    let phases = ScriptedPhases::new(1).script(Phase::SubmitUpdate, [ControlStatus::Restart]);
    let (mut job, sleeper, reporter) = job(phases, policy(None));

    let summary = job.run().await;
    assert_eq!(summary.status, ControlStatus::Success);
    assert_eq!(summary.completed_rounds, 1);

    let phases = job.into_phases();
    assert_eq!(phases.calls_to(Phase::LoadLocalData), 2);
    assert_eq!(phases.calls_to(Phase::SubmitUpdate), 2);
    assert!(phases.calls.iter().all(|(round, _)| *round == 1));
    assert_eq!(phases.state.restarts, 0);

    assert_eq!(sleeper.sleeps(), vec![(SLEEP, 0)]);
    assert_eq!(
        reporter.events(),
        vec![
            Event::Round(1, ResultCode::OUT_OF_TIME),
            Event::Round(1, ResultCode::SUCCEED),
            Event::Job(1, ResultCode::SUCCEED),
        ]
    );
}

#[tokio::test]
async fn failure_stops_the_job() {
    let phases = ScriptedPhases::new(3).script(Phase::LocalTrain, [ControlStatus::Failed]);
    let (mut job, sleeper, reporter) = job(phases, policy(None));

    let summary = job.run().await;
    assert_eq!(summary.status, ControlStatus::Failed);
    assert_eq!(summary.completed_rounds, 0);
    assert_eq!(summary.retcode, ResultCode::SYSTEM_ERROR);

    let phases = job.into_phases();
    assert_eq!(phases.calls.last(), Some(&(1, Phase::LocalTrain)));
    assert_eq!(phases.calls_to(Phase::SubmitUpdate), 0);
    assert!(sleeper.sleeps().is_empty());
    assert_eq!(
        reporter.events(),
        vec![
            Event::Round(1, ResultCode::SYSTEM_ERROR),
            Event::Job(3, ResultCode::SYSTEM_ERROR),
        ]
    );
}

#[tokio::test]
async fn waiting_phase_is_retried_after_a_sleep() {
    let phases = ScriptedPhases::new(1).script(Phase::PullGlobalModel, [ControlStatus::Wait; 3]);
    let (mut job, sleeper, _) = job(phases, policy(None));

    let summary = job.run().await;
    assert_eq!(summary.status, ControlStatus::Success);

    let phases = job.into_phases();
    assert_eq!(phases.calls_to(Phase::PullGlobalModel), 4);
    assert_eq!(phases.calls_to(Phase::LocalTrain), 1);
    assert_eq!(sleeper.sleeps(), vec![(SLEEP, 0); 3]);
}

#[tokio::test]
async fn wait_from_a_local_phase_fails_the_round() {
    let phases = ScriptedPhases::new(1).script(Phase::LocalTrain, [ControlStatus::Wait]);
    let (mut job, sleeper, _) = job(phases, policy(None));

    let summary = job.run().await;
    assert_eq!(summary.status, ControlStatus::Failed);
    assert_eq!(job.phases().calls_to(Phase::LocalTrain), 1);
    assert!(sleeper.sleeps().is_empty());
}

#[tokio::test]
async fn too_many_restarts_fail_the_job() {
    let phases = ScriptedPhases::new(1).script(Phase::StartJob, [ControlStatus::Restart; 10]);
    let (mut job, sleeper, reporter) = job(phases, policy(Some(2)));

    let summary = job.run().await;
    assert_eq!(summary.status, ControlStatus::Failed);
    assert_eq!(summary.retcode, ResultCode::OUT_OF_TIME);
    assert_eq!(job.phases().calls_to(Phase::StartJob), 3);
    assert_eq!(sleeper.sleeps().len(), 2);

    let events = reporter.events();
    assert_eq!(events.len(), 4);
    assert_eq!(events.last(), Some(&Event::Job(1, ResultCode::OUT_OF_TIME)));
}

#[tokio::test]
async fn restarts_are_unbounded_by_default() {
    let phases = ScriptedPhases::new(1).script(Phase::StartJob, [ControlStatus::Restart; 10]);
    let (mut job, sleeper, _) = job(phases, policy(None));

    let summary = job.run().await;
    assert_eq!(summary.status, ControlStatus::Success);
    assert_eq!(job.phases().calls_to(Phase::StartJob), 11);
    assert_eq!(sleeper.sleeps().len(), 10);
}

#[tokio::test]
async fn timer_restart_waits_for_the_server() {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64;

    let mut phases = ScriptedPhases::new(1).script(Phase::StartJob, [ControlStatus::Restart]);
    phases.next_req_time = Some(now + 60_000);

    let policy = RetryPolicy {
        use_timer: true,
        ..policy(None)
    };
    let (mut job, sleeper, _) = job(phases, policy);

    assert_eq!(job.run().await.status, ControlStatus::Success);

    let sleeps = sleeper.sleeps();
    assert_eq!(sleeps.len(), 1);
    assert!(sleeps[0].0 > Duration::from_secs(50));
    assert!(sleeps[0].0 <= Duration::from_secs(60));
}
