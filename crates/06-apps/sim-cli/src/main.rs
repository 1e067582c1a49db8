//! Headless runner: drives a simulation worker from the command line.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use runtime_native::{ReadyLoader, SimulationWorker, WorkerStatus};
use sim_host::{HostCapabilities, HostConfig};
use sim_protocol::{Command, Configuration, EncodingMode, Event, ProtocolError};
use solver_reference::ReferenceModule;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_DT: f64 = 1.0 / 30.0;

/// How long to wait for the next event before giving up on the worker.
const EVENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Text rendering helpers used by the runner.
mod render {
    use std::fmt::Write;
    use std::time::Duration;

    use runtime_native::WorkerStatus;

    #[derive(Debug, Default, Clone, Copy)]
    pub struct RunSummary {
        pub ticks: u64,
        pub frames: u64,
        pub stale: u64,
        pub bytes: usize,
        pub elapsed: Duration,
    }

    pub fn tick(iteration: u64, time: f64, particles: usize, bytes: usize) -> String {
        format!("Iteration {iteration}: {time:.3} s, {particles} vortons, {bytes} bytes")
    }

    pub fn summary(run: &RunSummary, status: &WorkerStatus) -> String {
        let mut out = String::new();
        let secs = run.elapsed.as_secs_f64();
        let rate = if secs > 0.0 { run.ticks as f64 / secs } else { 0.0 };
        writeln!(out, "Ran {} ticks in {secs:.2} s ({rate:.1} ticks/s)", run.ticks)
            .expect("write ticks");
        writeln!(
            out,
            "Frames: {} decoded, {} stale, {} bytes",
            run.frames, run.stale, run.bytes
        )
        .expect("write frames");
        writeln!(
            out,
            "Commands: {} ({} deferred), errors: {}, instances: {}",
            status.stats.commands,
            status.stats.deferred,
            status.stats.errors,
            status.stats.instances_created
        )
        .expect("write stats");
        writeln!(out, "Final state: {}", status.state).expect("write state");
        out
    }
}

/// Run a vortex-ring simulation on a background worker thread.
#[derive(Parser, Debug)]
#[command(author, version, about = "Run a simulation in a background worker", long_about = None)]
struct Cli {
    /// Configuration JSON file (defaults to the built-in vortex ring).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the particle count.
    #[arg(long)]
    vortons: Option<usize>,

    /// Solution encoding: json, transferable or shared-transferable.
    #[arg(long, default_value_t = EncodingMode::Json)]
    encoding: EncodingMode,

    /// Time step per tick.
    #[arg(long, default_value_t = DEFAULT_DT)]
    dt: f64,

    /// Number of ticks to run before stopping.
    #[arg(long, default_value_t = 100)]
    ticks: u64,

    /// Artificial module load latency in milliseconds.
    #[arg(long, default_value_t = 0)]
    load_delay_ms: u64,

    /// Give up on the module load after this many milliseconds.
    #[arg(long)]
    load_timeout_ms: Option<u64>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut configuration = load_configuration(cli.config.as_deref())?;
    if let Some(vortons) = cli.vortons {
        configuration.n_vortons = vortons;
    }

    let mut loader = ReadyLoader::new(ReferenceModule::new());
    if cli.load_delay_ms > 0 {
        loader = loader.with_delay(Duration::from_millis(cli.load_delay_ms));
    }
    let mut config = HostConfig::default().with_capabilities(HostCapabilities::native());
    if let Some(ms) = cli.load_timeout_ms {
        config = config.with_load_timeout(Duration::from_millis(ms));
    }

    let worker = SimulationWorker::spawn(loader, config).context("failed to start worker")?;
    info!(
        "making simulation with {} vortons ({} encoding)",
        configuration.n_vortons, cli.encoding
    );
    worker.post(Command::Make {
        configuration,
        encoding: cli.encoding,
    })?;
    // Queued behind the module load.
    worker.post(Command::Start { dt: cli.dt })?;

    let run = drive(&worker, cli.ticks)?;
    worker.post(Command::Stop)?;
    let status = wait_until_idle(&worker);
    print!("{}", render::summary(&run, &status));
    worker.shutdown()?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Ignore error if already set (e.g., during tests).
    let _ = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_configuration(path: Option<&Path>) -> Result<Configuration> {
    let Some(path) = path else {
        return Ok(Configuration::default());
    };
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read config {path:?}"))?;
    Configuration::from_json(&text).with_context(|| format!("invalid config {path:?}"))
}

/// Prints snapshots until `ticks` stepped frames were seen.
fn drive(worker: &SimulationWorker, ticks: u64) -> Result<render::RunSummary> {
    let started = Instant::now();
    let mut run = render::RunSummary::default();
    while run.ticks < ticks {
        let event = worker
            .next_event(EVENT_TIMEOUT)
            .ok_or_else(|| anyhow!("no event from worker within {EVENT_TIMEOUT:?}"))?;
        match event {
            Event::Initialized { iteration, time } => {
                info!("simulation initialized at iteration {iteration} ({time} s)");
            }
            Event::Simulation {
                iteration,
                time,
                payload,
            } => {
                if iteration > 0 {
                    run.ticks += 1;
                }
                match payload.decode() {
                    Ok(solution) => {
                        run.frames += 1;
                        run.bytes += payload.byte_len();
                        println!(
                            "{}",
                            render::tick(iteration, time, solution.len(), payload.byte_len())
                        );
                    }
                    Err(ProtocolError::StaleFrame { expected, found }) => {
                        run.stale += 1;
                        warn!("frame {expected} superseded by {found} before it was read");
                    }
                    Err(err) => return Err(err).context("failed to decode solution"),
                }
            }
            Event::Error { kind, message } => bail!("worker reported {kind} error: {message}"),
        }
    }
    run.elapsed = started.elapsed();
    Ok(run)
}

/// Drains events already in flight after the stop and returns the final status.
fn wait_until_idle(worker: &SimulationWorker) -> WorkerStatus {
    while let Some(event) = worker.next_event(Duration::from_millis(100)) {
        if let Event::Error { kind, message } = event {
            warn!("{kind} error after stop: {message}");
        }
    }
    worker.status()
}

#[cfg(test)]
mod tests {
    use super::render::{self, RunSummary};
    use super::*;
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;
    use sim_host::{HostStats, RunState};

    #[test]
    fn tick_render_matches_expectation() {
        assert_snapshot!(
            render::tick(3, 0.1, 42, 1024),
            @"Iteration 3: 0.100 s, 42 vortons, 1024 bytes"
        );
    }

    #[test]
    fn summary_render_lists_counters() {
        let run = RunSummary {
            ticks: 10,
            frames: 11,
            stale: 0,
            bytes: 2048,
            elapsed: Duration::from_secs(2),
        };
        let status = WorkerStatus {
            state: RunState::Ready,
            stats: HostStats {
                commands: 3,
                deferred: 1,
                instances_created: 1,
                ..HostStats::default()
            },
            pending_load: None,
            deferred: 0,
        };
        assert_eq!(
            render::summary(&run, &status),
            "Ran 10 ticks in 2.00 s (5.0 ticks/s)\n\
             Frames: 11 decoded, 0 stale, 2048 bytes\n\
             Commands: 3 (1 deferred), errors: 0, instances: 1\n\
             Final state: ready\n"
        );
    }

    #[test]
    fn cli_parses_hyphenated_encodings() {
        let cli = Cli::try_parse_from(["sim-cli", "--encoding", "shared-transferable", "--ticks", "5"])
            .expect("parse");
        assert_eq!(cli.encoding, EncodingMode::SharedTransferable);
        assert_eq!(cli.ticks, 5);
        assert_eq!(cli.dt, DEFAULT_DT);
    }

    #[test]
    fn missing_config_falls_back_to_the_vortex_ring() {
        assert_eq!(load_configuration(None).unwrap(), Configuration::default());
        assert!(load_configuration(Some(Path::new("/nonexistent/case.json"))).is_err());
    }
}
