//! The `gauntlet` CLI: load a YAML suite, materialize its environment,
//! run its tests, tear everything down, and exit non-zero on any failure.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use crossterm::tty::IsTty;
use tracing_subscriber::EnvFilter;

use gauntlet::controller::{Controller, ControllerOptions};
use gauntlet::nodes::create_nodes;
use gauntlet::platform::docker::DockerManager;
use gauntlet::platform::lxd::LxdManager;
use gauntlet::platform::PlatformManager;
use gauntlet::prompt::{AutoQuit, Prompter, StdinPrompter};
use gauntlet_common::config::Suite;
use gauntlet_common::errors::HarnessError;
use gauntlet_common::ui::coordinator::set_debug;
use gauntlet_common::ui::formatter::{Formatter, PlainFormatter, StandardFormatter};

/// Declarative distributed-systems test harness: describe nodes, setup
/// steps, tests and teardown in YAML; gauntlet runs the suite against
/// local shells, SSH hosts, containers and system containers or VMs.
#[derive(Debug, Parser)]
#[command(name = "gauntlet", version, about)]
struct Cli {
    /// Path to the YAML suite
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Print passing evaluations too
    #[arg(short, long)]
    verbose: bool,

    /// Stream command output live as it is produced
    #[arg(short, long)]
    debug: bool,

    /// Prompt continue/retry/quit on setup failures; pause after failed checks
    #[arg(short, long)]
    pause_on_error: bool,

    /// Abort on the first test failure
    #[arg(short, long)]
    stop_on_error: bool,

    /// Only run platforms, nodes and setup steps, then exit
    #[arg(long, alias = "setup")]
    setup_only: bool,

    /// Only run the teardown path over every node and platform
    #[arg(long, alias = "teardown")]
    teardown_only: bool,

    /// Repeat setup, tests and teardown this many times in one process
    #[arg(short, long, default_value_t = 1)]
    iterations: u32,
}

fn report(err: &HarnessError) {
    match err {
        HarnessError::Config(cfg_err) => eprint!("{}", cfg_err.render()),
        other => eprintln!("Error: {other}"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    set_debug(cli.debug);

    // Config errors surface before any resource exists, so there is
    // nothing to clean up here.
    let suite = match Suite::load(&cli.config) {
        Ok(suite) => suite,
        Err(err) => {
            report(&err);
            return ExitCode::FAILURE;
        }
    };

    let docker = DockerManager::new(suite.docker.clone());
    let lxd = match LxdManager::new(suite.lxd.clone()) {
        Ok(lxd) => lxd,
        Err(err) => {
            // The runtime may simply be absent on this machine; nodes that
            // actually need it will fail with a concrete error.
            tracing::warn!(%err, "system-container runtime unavailable");
            match LxdManager::new(None) {
                Ok(lxd) => lxd,
                Err(err) => {
                    report(&err);
                    return ExitCode::FAILURE;
                }
            }
        }
    };

    let nodes = match create_nodes(&suite.nodes, &docker, &lxd) {
        Ok(nodes) => nodes,
        Err(err) => {
            report(&err);
            return ExitCode::FAILURE;
        }
    };

    let platforms: Vec<Arc<dyn PlatformManager>> = vec![Arc::new(docker), Arc::new(lxd)];

    let formatter: Arc<dyn Formatter> = if std::io::stdout().is_tty() {
        Arc::new(StandardFormatter::new())
    } else {
        Arc::new(PlainFormatter::new())
    };

    let prompter: Arc<dyn Prompter> = if cli.pause_on_error {
        Arc::new(StdinPrompter)
    } else {
        Arc::new(AutoQuit)
    };

    let options = ControllerOptions {
        verbose: cli.verbose,
        stop_on_error: cli.stop_on_error,
        pause_on_error: cli.pause_on_error,
        setup_only: cli.setup_only,
        teardown_only: cli.teardown_only,
    };

    let controller = Controller::new(suite, platforms, nodes, formatter, prompter, options);

    let mut failed = false;
    for iteration in 0..cli.iterations.max(1) {
        if cli.iterations > 1 {
            tracing::info!(iteration = iteration + 1, total = cli.iterations, "starting iteration");
        }
        match controller.run().await {
            Ok(summary) => {
                if summary.failed > 0 {
                    failed = true;
                }
            }
            Err(err) => {
                report(&err);
                failed = true;
            }
        }
    }

    controller.close().await;

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
