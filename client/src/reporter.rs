use comms::ResultCode;
use log::{error, info};

/// Notified at round and job boundaries.
pub trait ResultReporter {
    /// Called once per round attempt, whether it succeeded, restarted or failed.
    fn on_round_finished(&mut self, fl_name: &str, round: u32, retcode: ResultCode);

    /// Called once per job run, after its last round.
    fn on_job_finished(&mut self, fl_name: &str, rounds: u32, retcode: ResultCode);
}

/// A `ResultReporter` writing every notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ResultReporter for LogReporter {
    fn on_round_finished(&mut self, fl_name: &str, round: u32, retcode: ResultCode) {
        info!(round = round, retcode = retcode.0; "{fl_name}: round finished");
    }

    fn on_job_finished(&mut self, fl_name: &str, rounds: u32, retcode: ResultCode) {
        match retcode {
            ResultCode::SUCCEED => info!(rounds = rounds; "{fl_name}: job finished"),
            _ => error!(rounds = rounds, retcode = retcode.0; "{fl_name}: job finished"),
        }
    }
}
