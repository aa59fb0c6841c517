//! CLI entry point: translates curl lines, executes single requests and
//! whole scenarios, validates and compiles scenario sources, and drives load
//! runs.

mod assert;
mod ast;
mod compiler;
mod context;
mod cookie;
mod curl;
mod driver;
mod errors;
mod evaluator;
mod executor;
mod extract;
mod ir;
mod lexer;
mod limits;
mod loader;
mod parser;
mod progress;
mod retry;
mod telemetry;

use clap::{Parser, Subcommand};
use cookie::CookieJar;
use driver::DriverConfig;
use evaluator::EvaluatorConfig;
use ir::{RequestRecord, ScenarioPlan};
use limits::ExecutionLimits;
use progress::ProgressEvent;
use std::path::PathBuf;
use telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "httpx")]
#[command(about = "HTTP load-generation and evaluation engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Silence informational logs; only errors reach stderr.
    #[arg(long, short = 's', global = true, default_value = "false")]
    silent: bool,

    /// Debug-level logging.
    #[arg(long, short = 'v', global = true, default_value = "false")]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate one curl command line into a request record.
    TranslateCurl {
        /// The curl command line, e.g. "curl -X POST https://... -d '{}'".
        curl: String,
        /// Write the JSON record here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Translate and execute one curl command line; print status, latency,
    /// size, and the evaluator's verdict.
    Exec {
        curl: String,
        #[arg(long)]
        evaluator: Option<String>,
        #[arg(long)]
        evaluator_path: Option<PathBuf>,
    },

    /// Execute a request record file and print status, latency, size, and verdict.
    ExecFile {
        file: PathBuf,
        #[arg(long)]
        evaluator: Option<String>,
        #[arg(long)]
        evaluator_path: Option<PathBuf>,
    },

    /// Validate a request record file against the IR schema.
    ValidateIr { file: PathBuf },

    /// Validate a scenario source file (lex, parse, compile; no execution).
    ValidateScenario {
        file: PathBuf,
        #[arg(long)]
        scenario: Option<String>,
    },

    /// Compile a scenario source file and print the plan summary.
    Compile {
        file: PathBuf,
        #[arg(long)]
        scenario: Option<String>,
    },

    /// Run a scenario under its configured load profile.
    Run {
        file: PathBuf,
        /// Select one scenario by name when the file declares several.
        #[arg(long)]
        scenario: Option<String>,
        /// Compile and print the plan summary without executing it.
        #[arg(long, default_value = "false")]
        dry_run: bool,
        /// Print one line per completed request as it happens.
        #[arg(long, default_value = "false")]
        progress: bool,
        /// Suppress the periodic/final stats summary.
        #[arg(long, default_value = "false")]
        quiet: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut telemetry_config = TelemetryConfig::from_env();
    telemetry_config.log_level = if cli.silent {
        Level::ERROR
    } else if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    if let Err(e) = init_telemetry(telemetry_config) {
        if !cli.silent {
            eprintln!("warning: failed to initialize telemetry: {}", e);
        }
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    let exit_code = match &cli.command {
        Commands::TranslateCurl { curl, output } => cmd_translate_curl(curl, output.as_deref()),
        Commands::Exec { curl, evaluator, evaluator_path } => {
            cmd_exec_curl(curl, evaluator.as_deref(), evaluator_path.as_deref()).await
        }
        Commands::ExecFile { file, evaluator, evaluator_path } => {
            cmd_exec_file(file, evaluator.as_deref(), evaluator_path.as_deref()).await
        }
        Commands::ValidateIr { file } => cmd_validate_ir(file),
        Commands::ValidateScenario { file, scenario } => {
            cmd_validate_scenario(file, scenario.as_deref())
        }
        Commands::Compile { file, scenario } => cmd_compile(file, scenario.as_deref()),
        Commands::Run { file, scenario, dry_run, progress, quiet } => {
            cmd_run(file, scenario.as_deref(), *dry_run, *progress, *quiet).await
        }
    };

    shutdown_telemetry();

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn cmd_translate_curl(line: &str, output: Option<&std::path::Path>) -> i32 {
    match curl::translate_curl_line(line, "cli::translate-curl") {
        Ok(record) => print_or_write(&record, output),
        Err(e) => {
            error!(error = %e, "failed to translate curl command");
            1
        }
    }
}

async fn cmd_exec_curl(line: &str, evaluator: Option<&str>, evaluator_path: Option<&std::path::Path>) -> i32 {
    match curl::translate_curl_line(line, "cli::exec") {
        Ok(record) => run_single_request(record, evaluator, evaluator_path).await,
        Err(e) => {
            error!(error = %e, "failed to translate curl command");
            1
        }
    }
}

async fn cmd_exec_file(file: &std::path::Path, evaluator: Option<&str>, evaluator_path: Option<&std::path::Path>) -> i32 {
    match loader::load_request_record(file) {
        Ok(record) => run_single_request(record, evaluator, evaluator_path).await,
        Err(e) => {
            error!(error = %e, "failed to load request record");
            1
        }
    }
}

async fn run_single_request(
    record: RequestRecord,
    evaluator_override: Option<&str>,
    evaluator_path_override: Option<&std::path::Path>,
) -> i32 {
    let evaluator_config = EvaluatorConfig {
        kind: evaluator_override
            .map(str::to_string)
            .unwrap_or_else(|| record.evaluation.evaluator.clone()),
        path: evaluator_path_override
            .map(|p| p.to_string_lossy().into_owned())
            .or_else(|| record.evaluation.evaluator_path.clone()),
        timeout_ms: record.evaluation.timeout_ms,
    };

    let max_step_timeout = ExecutionLimits::from_env().max_step_timeout;
    let executor = match executor::HttpExecutor::new(&record, max_step_timeout) {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, "failed to build HTTP client");
            return 1;
        }
    };

    let mut cookies = CookieJar::new();
    let vars = record.evaluation.vars.clone();
    let cancel = CancellationToken::new();

    match retry::run_with_retry(&executor, record, None, &evaluator_config, &mut cookies, vars, &cancel).await {
        Ok(outcome) => {
            println!(
                "status={} latency_ms={} bytes={} verdict={:?} reason={:?}",
                outcome.response.status,
                outcome.response.latency_ms,
                outcome.response.bytes,
                outcome.verdict.decision,
                outcome.verdict.reason,
            );
            if outcome.verdict.decision == evaluator::Decision::Fail {
                1
            } else {
                0
            }
        }
        Err(e) => {
            error!(error = %e, "request execution failed");
            1
        }
    }
}

fn cmd_validate_ir(file: &std::path::Path) -> i32 {
    match loader::load_request_record(file) {
        Ok(_) => {
            println!("ok: {} is a valid request record", file.display());
            0
        }
        Err(e) => {
            error!(error = %e, "request record failed validation");
            1
        }
    }
}

fn cmd_validate_scenario(file: &std::path::Path, scenario: Option<&str>) -> i32 {
    match loader::load_scenario_source(file, scenario) {
        Ok(plan) => {
            println!("ok: scenario '{}' compiles ({} top-level nodes)", plan.name, plan.main.len());
            0
        }
        Err(e) => {
            error!(error = %e, "scenario validation failed");
            1
        }
    }
}

fn cmd_compile(file: &std::path::Path, scenario: Option<&str>) -> i32 {
    match loader::load_scenario_source(file, scenario) {
        Ok(plan) => {
            print_plan_summary(&plan);
            0
        }
        Err(e) => {
            error!(error = %e, "compilation failed");
            1
        }
    }
}

async fn cmd_run(file: &std::path::Path, scenario: Option<&str>, dry_run: bool, progress: bool, quiet: bool) -> i32 {
    let plan = match loader::load_scenario_source(file, scenario) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "failed to load scenario");
            return 1;
        }
    };

    if dry_run {
        print_plan_summary(&plan);
        return 0;
    }

    let limits = ExecutionLimits::from_env();
    let evaluator_config = EvaluatorConfig {
        kind: "default".to_string(),
        path: None,
        timeout_ms: 5_000,
    };
    let config = DriverConfig { evaluator: evaluator_config, limits };

    let progress_tx = if progress {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<ProgressEvent>(progress::CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let ProgressEvent::RequestCompleted { vu, iteration, step, status, latency_ms, error, .. } = event {
                    println!(
                        "vu={} iter={} step={} status={} latency_ms={} error={:?}",
                        vu, iteration, step, status, latency_ms, error
                    );
                }
            }
        });
        Some(tx)
    } else {
        None
    };

    info!(scenario = %plan.name, "starting load run");
    match driver::run(plan, config, progress_tx).await {
        Ok(stats) => {
            if !quiet {
                println!(
                    "total={} successful={} failed={} latency_avg_ms={:?} bytes={}",
                    stats.total_requests,
                    stats.successful,
                    stats.failed,
                    stats.latency_avg_ms(),
                    stats.bytes_received,
                );
            }
            if stats.failed > 0 && stats.successful == 0 {
                1
            } else {
                0
            }
        }
        Err(e) => {
            error!(error = %e, "load run failed");
            1
        }
    }
}

fn print_plan_summary(plan: &ScenarioPlan) {
    println!("scenario: {}", plan.name);
    println!("load: {:?}", plan.load);
    println!(
        "setup={} main={} teardown={}",
        plan.setup.len(),
        plan.main.len(),
        plan.teardown.len()
    );
}

fn print_or_write(record: &RequestRecord, output: Option<&std::path::Path>) -> i32 {
    let json = match serde_json::to_string_pretty(record) {
        Ok(j) => j,
        Err(e) => {
            error!(error = %e, "failed to serialize request record");
            return 1;
        }
    };
    match output {
        Some(path) => match std::fs::write(path, json) {
            Ok(()) => {
                println!("wrote request record to {}", path.display());
                0
            }
            Err(e) => {
                error!(error = %e, "failed to write request record");
                1
            }
        },
        None => {
            println!("{}", json);
            0
        }
    }
}
