use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use argh::FromArgs;
use exitcode::ExitCode;
use framework::Context;
use framework::discovery::TargetGroup;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use triton_sd::config::{self, Config};
use triton_sd::discovery::triton::Discovery;

use crate::validate;

fn default_worker_threads() -> usize {
    match std::env::var("TRITON_SD_WORKER_THREADS") {
        Ok(value) => value.parse::<usize>().unwrap_or(2),
        // discoverers spend most of the time waiting, two is plenty
        Err(_) => 2,
    }
}

#[derive(FromArgs)]
#[argh(
    description = "Discover scrape targets from Triton Container Monitor",
    help_triggers("-h", "--help")
)]
pub struct RootCommand {
    #[argh(switch, short = 'v', description = "show version")]
    version: bool,

    #[argh(
        option,
        short = 'l',
        default = "\"info\".to_string()",
        description = "log level, TRITON_SD_LOG takes precedence if set"
    )]
    log_level: String,

    #[argh(option, short = 'c', long = "config", description = "the config file")]
    config: Option<PathBuf>,

    #[argh(
        switch,
        description = "refresh every discoverer once, print the target groups and exit"
    )]
    once: bool,

    #[argh(
        option,
        short = 't',
        default = "default_worker_threads()",
        description = "specify how many threads the Tokio runtime will use"
    )]
    threads: usize,

    #[argh(subcommand)]
    sub_commands: Option<SubCommands>,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum SubCommands {
    Validate(validate::Validate),
}

impl SubCommands {
    fn run(&self) -> Result<(), ExitCode> {
        match self {
            SubCommands::Validate(validate) => match validate.run() {
                exitcode::OK => Ok(()),
                other => Err(other),
            },
        }
    }
}

impl RootCommand {
    #![allow(clippy::print_stdout)]
    fn show_version(&self) {
        println!("triton-sd {}", env!("CARGO_PKG_VERSION"));
    }

    pub fn run(&self) -> Result<(), ExitCode> {
        if self.version {
            self.show_version();
            return Ok(());
        }

        if let Some(sub_command) = &self.sub_commands {
            return sub_command.run();
        }

        let Some(path) = &self.config else {
            eprintln!("no config file specified, try `--config <path>`");
            return Err(exitcode::USAGE);
        };

        let log_level = std::env::var("TRITON_SD_LOG").unwrap_or(self.log_level.clone());
        let color = std::io::stderr().is_terminal();
        framework::trace::init(color, false, &log_level);

        let config = config::load_from_path(path).map_err(handle_config_errors)?;
        let discoverers = build_discoverers(&config).map_err(handle_config_errors)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("triton-sd-worker")
            .worker_threads(self.threads.max(1))
            .enable_io()
            .enable_time()
            .build()
            .map_err(|err| {
                error!(message = "build tokio runtime failed", %err);
                exitcode::OSERR
            })?;

        info!(
            message = "start triton-sd",
            threads = self.threads,
            config = ?path,
            discoverers = discoverers.len(),
        );

        let once = self.once;
        let result = runtime.block_on(async move {
            let cx = Context::new();

            let canceller = cx.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                info!(message = "shutdown signal received");
                canceller.cancel();
            });

            if once {
                refresh_once(discoverers, &cx).await
            } else {
                run_forever(discoverers, cx).await;
                Ok(())
            }
        });

        runtime.shutdown_timeout(Duration::from_secs(5));

        result
    }
}

pub fn handle_config_errors(errors: Vec<String>) -> ExitCode {
    for err in errors {
        error!(message = "configuration error", %err);
    }

    exitcode::CONFIG
}

fn build_discoverers(config: &Config) -> Result<Vec<(Discovery, Duration)>, Vec<String>> {
    let mut discoverers = Vec::with_capacity(config.triton_sd_configs.len());
    let mut errs = Vec::new();

    for (index, config) in config.triton_sd_configs.iter().enumerate() {
        match Discovery::new(config) {
            Ok(discovery) => discoverers.push((discovery, config.refresh_interval)),
            Err(err) => errs.push(format!("triton_sd_configs[{index}]: {err}")),
        }
    }

    if errs.is_empty() {
        Ok(discoverers)
    } else {
        Err(errs)
    }
}

#[allow(clippy::print_stdout)]
fn print_groups(groups: &[TargetGroup]) {
    for group in groups {
        match serde_json::to_string(group) {
            Ok(line) => println!("{line}"),
            Err(err) => {
                warn!(message = "encode target group failed", source = %group.source, %err);
            }
        }
    }
}

async fn refresh_once(discoverers: Vec<(Discovery, Duration)>, cx: &Context) -> Result<(), ExitCode> {
    let results = futures::future::join_all(
        discoverers
            .iter()
            .map(|(discovery, _interval)| discovery.refresh(cx)),
    )
    .await;

    let mut failed = false;
    for ((discovery, _interval), result) in discoverers.iter().zip(results) {
        match result {
            Ok(groups) => print_groups(&groups),
            Err(err) => {
                error!(
                    message = "refresh target groups failed",
                    source = discovery.source(),
                    kind = ?err.kind(),
                    %err,
                );

                failed = true;
            }
        }
    }

    if failed {
        Err(exitcode::UNAVAILABLE)
    } else {
        Ok(())
    }
}

async fn run_forever(discoverers: Vec<(Discovery, Duration)>, cx: Context) {
    let (tx, mut rx) = mpsc::channel::<Vec<TargetGroup>>(discoverers.len().max(1));
    let mut tasks = JoinSet::new();

    for (index, (discovery, interval)) in discoverers.into_iter().enumerate() {
        let cx = cx.child();
        let tx = tx.clone();

        tasks.spawn(async move {
            let name = format!("triton_sd_configs[{index}]");

            framework::discovery::run(
                &name,
                interval,
                cx,
                async move |cx: Context| {
                    discovery
                        .refresh(&cx)
                        .await
                        .map_err(framework::Error::from)
                },
                tx,
            )
            .await
        });
    }

    // the channel is closed once every discoverer stopped
    drop(tx);

    while let Some(groups) = rx.recv().await {
        print_groups(&groups);
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(err) = result {
            error!(message = "discoverer task failed", %err);
        }
    }

    info!(message = "all discoverers stopped");
}

/// Resolves once `signal` is delivered. A listener which failed to register
/// never resolves, so it can't be taken as a shutdown request.
async fn received<F>(name: &str, signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(err) = signal.await {
        warn!(message = "listen for signal failed", signal = name, %err);

        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let sigterm = async {
        let mut sigterm = signal(SignalKind::terminate())?;
        sigterm.recv().await;
        Ok::<_, std::io::Error>(())
    };

    tokio::select! {
        _ = received("SIGINT", tokio::signal::ctrl_c()) => {},
        _ = received("SIGTERM", sigterm) => {},
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    received("ctrl-c", tokio::signal::ctrl_c()).await
}
