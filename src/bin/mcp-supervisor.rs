use anyhow::{Context, bail};
use chrono::Utc;
use mcp_supervisor::config::{ConfigSource, SupervisorConfig};
use mcp_supervisor::server::StateStore;
use mcp_supervisor::status::build_report;
use mcp_supervisor::{Supervisor, control};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};

const USAGE: &str = "\
Usage: mcp-supervisor [OPTIONS] <COMMAND>

Commands:
  start    Spawn all supervised servers and keep them healthy until interrupted
  stop     Stop a running supervisor and the servers it started
  restart  Stop, then start
  status   Print the status of every configured server as JSON

Options:
  --config <PATH>  Configuration document [default: config.json]
  --logs <DIR>     Per-server log directory [default: logs]
  --state <PATH>   State file [default: mcp-supervisor-state.json]";

struct Cli {
    command: String,
    config: PathBuf,
    settings: SupervisorConfig,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Option<Cli>> {
    let mut settings = SupervisorConfig::default();
    let mut config = PathBuf::from("config.json");
    let mut command = None;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = args.next().context("--config needs a value")?.into(),
            "--logs" => settings.logs_dir = args.next().context("--logs needs a value")?.into(),
            "--state" => settings.state_file = args.next().context("--state needs a value")?.into(),
            "-h" | "--help" => return Ok(None),
            other if other.starts_with('-') => bail!("unknown option {}", other),
            other if command.is_none() => command = Some(other.to_string()),
            other => bail!("unexpected argument {}", other),
        }
    }

    Ok(command.map(|command| Cli {
        command,
        config,
        settings,
    }))
}

async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
    Ok(())
}

async fn run_start(cli: &Cli) -> anyhow::Result<()> {
    let mut supervisor = Supervisor::new(&cli.config, cli.settings.clone());
    let started = supervisor.start().await?;
    tracing::info!(servers = ?started, "Supervising; press Ctrl-C to stop");

    wait_for_shutdown_signal()
        .await
        .context("Failed to install signal handlers")?;

    tracing::info!("Shutdown signal received");
    supervisor.shutdown().await?;
    Ok(())
}

async fn run_stop(cli: &Cli) -> anyhow::Result<()> {
    let store = StateStore::new(&cli.settings.state_file);
    let outcome = control::stop_from_state(&store, cli.settings.grace_period).await?;
    if outcome.supervisor_signalled {
        println!("Supervisor stopped");
    }
    for name in &outcome.terminated {
        println!("Stopped {}", name);
    }
    Ok(())
}

fn run_status(cli: &Cli) -> anyhow::Result<()> {
    let config = ConfigSource::new(&cli.config).load();
    let state = StateStore::new(&cli.settings.state_file)
        .load()
        .unwrap_or_default();

    let report = build_report(
        &config,
        &cli.settings.eligibility,
        &state.servers,
        state.last_health_check,
        Utc::now(),
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = match parse_args(std::env::args().skip(1)) {
        Ok(Some(cli)) => cli,
        Ok(None) => {
            println!("{}", USAGE);
            return Ok(());
        }
        Err(e) => {
            eprintln!("error: {}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    match cli.command.as_str() {
        "start" => run_start(&cli).await,
        "stop" => run_stop(&cli).await,
        "restart" => {
            run_stop(&cli).await?;
            run_start(&cli).await
        }
        "status" => run_status(&cli),
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }
}
