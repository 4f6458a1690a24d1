use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use comms::ControlStatus;
use log::{error, info};

use fl_client::{ClientErr, EncryptLevel, FlConfig, ServerMode, Task, task};

/// Federated learning participant.
#[derive(Debug, Parser)]
#[command(name = "fl-client", version, about)]
struct Cli {
    #[arg(long, value_enum)]
    task: Task,

    /// Json job configuration, the flags below override it.
    #[arg(long)]
    config: PathBuf,

    #[arg(long)]
    ip: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    use_https: bool,
    #[arg(long)]
    cert_path: Option<PathBuf>,
    #[arg(long)]
    use_elb: bool,
    #[arg(long)]
    server_num: Option<u16>,

    #[arg(long)]
    train_dataset: Option<PathBuf>,
    #[arg(long)]
    test_dataset: Option<PathBuf>,
    #[arg(long)]
    infer_dataset: Option<PathBuf>,

    #[arg(long, value_enum)]
    mode: Option<ServerMode>,
    #[arg(long, value_enum)]
    encrypt_level: Option<EncryptLevel>,

    #[arg(long)]
    iterations: Option<u32>,
    #[arg(long)]
    time_window_ms: Option<u64>,
    #[arg(long)]
    sleep_time_ms: Option<u64>,
    #[arg(long)]
    use_timer: bool,
}

impl Cli {
    fn apply(self, cfg: &mut FlConfig) {
        if let Some(ip) = self.ip {
            cfg.server.ip = ip;
        }
        if let Some(port) = self.port {
            cfg.server.port = port;
        }
        if self.use_https {
            cfg.server.use_https = true;
        }
        if self.cert_path.is_some() {
            cfg.server.cert_path = self.cert_path;
        }
        if self.use_elb {
            cfg.server.use_elb = true;
        }
        if let Some(n) = self.server_num {
            cfg.server.server_num = n;
        }
        if let Some(path) = self.train_dataset {
            cfg.train_dataset = path;
        }
        if self.test_dataset.is_some() {
            cfg.test_dataset = self.test_dataset;
        }
        if self.infer_dataset.is_some() {
            cfg.infer_dataset = self.infer_dataset;
        }
        if let Some(mode) = self.mode {
            cfg.mode = mode;
        }
        if let Some(level) = self.encrypt_level {
            cfg.encrypt_level = level;
        }
        if let Some(n) = self.iterations {
            cfg.iterations = n;
        }
        if let Some(ms) = self.time_window_ms {
            cfg.time_window_ms = ms;
        }
        if let Some(ms) = self.sleep_time_ms {
            cfg.sleep_time_ms = ms;
        }
        if self.use_timer {
            cfg.use_timer = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, ClientErr> {
    env_logger::init();

    let cli = Cli::parse();
    let task = cli.task;

    let mut cfg = FlConfig::from_file(&cli.config)?;
    cli.apply(&mut cfg);
    cfg.validate()?;

    info!(iterations = cfg.iterations; "running {task:?} for {}", cfg.fl_name);

    match task::run(task, &cfg).await? {
        ControlStatus::Success => Ok(ExitCode::SUCCESS),
        status => {
            error!("{task:?} ended with {status}");
            Ok(ExitCode::FAILURE)
        }
    }
}
