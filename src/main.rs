//! Command-line front end for the DMR TEST device.
//!
//! ```bash
//! dmr-tester tasks
//! dmr-tester run measure_power --set attenuation=10,5 --cycles 5
//! dmr-tester scenario production.json
//! ```

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use dmr_tester::config::{Settings, DEFAULT_CONFIG_PATH};
use dmr_tester::i18n::{self, Language};
use dmr_tester::orchestrator::{ControlMessage, Directive, OrchestratorEvent, OrchestratorHandle};
use dmr_tester::scenario::{Scenario, ScenarioDefinition};
use dmr_tester::task::{Task, TaskContext, TaskKind};
use dmr_tester::diagnostics;
use dmr_tester::transport::registry::{self, ConnectionRegistry, SerialPortOpener};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dmr-tester")]
#[command(about = "Run measurements on the DMR TEST radio test device", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial device path; discovered by USB id when omitted
    #[arg(short, long, global = true)]
    device: Option<String>,

    /// Operator language (en, ru)
    #[arg(short, long, global = true, value_parser = parse_language)]
    lang: Option<Language>,
}

#[derive(Subcommand)]
enum Commands {
    /// List task kinds and their parameters
    Tasks,

    /// Show the discovered device path
    Devices,

    /// Run one task until stopped (Ctrl-C) or for a number of cycles
    Run {
        /// Task kind identifier or display name
        kind: String,

        /// Parameter in display units, e.g. `frequency=433.5`
        #[arg(short, long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Stop after this many measurement cycles
        #[arg(short = 'n', long)]
        cycles: Option<u64>,
    },

    /// Run every task of a JSON scenario definition in order
    Scenario {
        file: PathBuf,

        /// Measurement cycles per task
        #[arg(short = 'n', long, default_value = "1")]
        cycles: u64,
    },
}

fn parse_language(s: &str) -> std::result::Result<Language, String> {
    match s.trim().to_lowercase().as_str() {
        "en" | "english" => Ok(Language::En),
        "ru" | "russian" => Ok(Language::Ru),
        other => Err(format!("unknown language '{other}'")),
    }
}

/// `key=value` in display units; a decimal comma is accepted.
fn parse_assignment(text: &str) -> Result<(String, f64)> {
    let (key, value) = text
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{text}'"))?;
    let value: f64 = value
        .trim()
        .replace(',', ".")
        .parse()
        .with_context(|| format!("invalid number for '{key}'"))?;
    Ok((key.trim().to_string(), value))
}

fn print_tasks() {
    for kind in TaskKind::ALL {
        let task = kind.create();
        println!("{:<28} {}", kind.id(), kind.display_name().text());
        for desc in task.parameter_descriptors() {
            let bounds = desc
                .display_bounds()
                .map(|(low, high)| format!("[{low}, {high}]"))
                .unwrap_or_else(|| "read-only".to_string());
            println!(
                "    {:<16} {:<16} default {} {} {}",
                desc.key,
                desc.label.text(),
                desc.render(desc.default).trim(),
                desc.unit.label(),
                bounds
            );
        }
    }
}

/// One line per snapshot: state, results with pass marks, message.
fn report(view: &Task) {
    let mut line = format!("[{}] {:?}", view.kind(), view.state());
    for desc in view.result_descriptors() {
        if let Some(text) = view.format_result(desc.key) {
            let mark = match view.result_accepted(desc.key) {
                Some(true) => " ok",
                Some(false) => " FAIL",
                None => "",
            };
            line.push_str(&format!("  {}={}{mark}", desc.label.text(), text.trim()));
        }
    }
    println!("{line}");
    if !view.message().is_empty() {
        println!("    {}", view.message().replace('\n', "\n    "));
    }
}

/// Submit a task and print its snapshots until its completion marker.
/// Returns whether the task ended failed.
async fn drive(handle: &mut OrchestratorHandle, mut task: Task, cycles: Option<u64>) -> Result<bool> {
    if task.id().is_none() {
        task.assign_id()?;
    }
    let mut view = task.clone();
    let id = handle.submit(task).await?;
    let mut seen = 0u64;
    let mut stop_sent = false;
    let mut failed = false;

    while let Some(event) = handle.next_event().await {
        match event {
            OrchestratorEvent::Snapshot(snapshot) => {
                if snapshot.id != Some(id) {
                    continue;
                }
                view.apply_snapshot(&snapshot);
                failed = snapshot.failed;
                report(&view);
                seen += 1;
                if !stop_sent && cycles.is_some_and(|n| seen >= n) {
                    handle.directive(Directive::Stop).await?;
                    stop_sent = true;
                }
            }
            OrchestratorEvent::Stopped(stopped) if stopped == id => {
                info!(%stopped, "Task finished");
                return Ok(failed);
            }
            OrchestratorEvent::Stopped(_) => {}
        }
    }
    bail!("orchestrator exited before task {id} finished")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(device) = cli.device {
        settings.device.path = Some(device);
    }
    if let Some(lang) = cli.lang {
        settings.application.language = lang;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.application.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    i18n::set_language(settings.application.language);
    diagnostics::set_debug(settings.application.debug);
    if !registry::install_global(ConnectionRegistry::new(
        Arc::new(SerialPortOpener),
        settings.link_settings(),
    )) {
        warn!("Connection registry was already installed");
    }

    match cli.command {
        Commands::Tasks => print_tasks(),
        Commands::Devices => {
            let path = registry::global().discover()?;
            println!("{path}");
        }
        Commands::Run { kind, set, cycles } => {
            let kind: TaskKind = kind.parse()?;
            let mut task = kind.create();
            task.load_calibration(&settings.calibration);
            for assignment in &set {
                let (key, value) = parse_assignment(assignment)?;
                task.set_display_parameter(&key, value)?;
            }

            let mut handle = spawn(&settings)?;
            let failed = drive(&mut handle, task, cycles).await?;
            handle.shutdown().await?;
            if failed {
                std::process::exit(1);
            }
        }
        Commands::Scenario { file, cycles } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("reading scenario {}", file.display()))?;
            let scenario = Scenario::from_definition(&ScenarioDefinition::from_json(&json)?)?;
            info!(name = scenario.name(), tasks = scenario.len(), "Running scenario");

            let mut handle = spawn(&settings)?;
            let mut failures = 0;
            for (previous, task) in scenario.transitions() {
                if let Some(previous) = previous {
                    info!(from = %previous.kind(), to = %task.kind(), "Next scenario task");
                }
                let mut task = task.clone();
                task.load_calibration(&settings.calibration);
                if drive(&mut handle, task, Some(cycles)).await? {
                    failures += 1;
                }
            }
            handle.shutdown().await?;
            println!("{} of {} tasks failed", failures, scenario.len());
            if failures > 0 {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

/// Orchestrator thread plus a Ctrl-C handler that stops the running task.
fn spawn(settings: &Settings) -> Result<OrchestratorHandle> {
    let ctx = TaskContext::from_settings(settings);
    let handle = OrchestratorHandle::spawn(ctx, settings.orchestrator.control_capacity)?;
    let control = handle.control();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if control
                .send(ControlMessage::Directive(Directive::Stop))
                .await
                .is_err()
            {
                break;
            }
        }
    });
    Ok(handle)
}
