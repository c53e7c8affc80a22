//! casa-monitor CLI Entry Point
//!
//! Runs the pipeline once, then keeps the metrics endpoint up until the
//! process receives SIGINT, SIGTERM or SIGQUIT.
//!
//! # Usage
//!
//! ```bash
//! # Built-in CASA pipeline on port 9091
//! casa-monitor
//!
//! # Custom pipeline file
//! casa-monitor --config pipelines/casa.yaml
//!
//! # Non-interactive run that always removes the working directory
//! casa-monitor --port 9200 --work-dir /tmp/casa_run --cleanup always
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use log::{error, info};

use casa_monitor::config::{default_pipeline, load_pipeline, validate_pipeline};
use casa_monitor::server::listen_for_signals;
use casa_monitor::{CleanupPolicy, Controller, PipelineConfig, RunOutcome, APP_NAME, VERSION};

/// Width of the banner rule.
const BANNER_WIDTH: usize = 60;

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default, PartialEq)]
struct Config {
    config_path: Option<PathBuf>,
    port: Option<u16>,
    work_dir: Option<PathBuf>,
    cleanup: Option<CleanupPolicy>,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with the effective settings.
fn print_banner(pipeline: &PipelineConfig) {
    let rule = "=".repeat(BANNER_WIDTH);
    println!();
    println!("{}", rule);
    println!("{} v{}", APP_NAME, VERSION);
    println!("Pipeline: {} ({} tasks)", pipeline.name, pipeline.tasks.len());
    println!("Toolkit:  {}", pipeline.toolkit.program);
    println!("Work dir: {}", pipeline.resolved_work_dir().display());
    println!("Cores:    {}", num_cpus::get());
    println!("{}", rule);
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: casa-monitor [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config PATH       Pipeline YAML file (default: built-in CASA pipeline)");
    println!("  --port N            Metrics port (default: from pipeline, 9091)");
    println!("  --work-dir PATH     Working directory, recreated on start");
    println!("  --cleanup POLICY    ask | always | never (default: ask)");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  casa-monitor");
    println!("  casa-monitor --config pipelines/shell-demo.yaml --cleanup always");
}

/// Returns the value following `flag`, advancing the cursor.
fn flag_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", flag))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--config" | "-c" => {
                config.config_path = Some(PathBuf::from(flag_value(args, &mut i, "--config")?));
            }
            "--work-dir" => {
                config.work_dir = Some(PathBuf::from(flag_value(args, &mut i, "--work-dir")?));
            }
            "--port" | "-p" => {
                let value = flag_value(args, &mut i, "--port")?;
                config.port = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid port value: {}", value))?,
                );
            }
            "--cleanup" => {
                config.cleanup = Some(flag_value(args, &mut i, "--cleanup")?.parse()?);
            }
            arg => {
                return Err(format!("Unknown argument: {}", arg));
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Loads the pipeline and applies command-line overrides.
fn resolve_pipeline(config: &Config) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut pipeline = match config.config_path {
        Some(ref path) => {
            info!("Loading pipeline: {}", path.display());
            load_pipeline(path)?
        }
        None => default_pipeline()?,
    };

    if let Some(port) = config.port {
        pipeline.port = port;
    }
    if let Some(ref dir) = config.work_dir {
        pipeline.work_dir = dir.clone();
    }
    if let Some(policy) = config.cleanup {
        pipeline.cleanup = policy;
    }

    validate_pipeline(&pipeline)?;
    Ok(pipeline)
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);

    let pipeline = resolve_pipeline(&config).map_err(|e| {
        error!("Failed to load pipeline: {}", e);
        e
    })?;

    print_banner(&pipeline);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let mut controller = Controller::new(pipeline);
    let outcome: Result<RunOutcome, Box<dyn std::error::Error>> = runtime.block_on(async {
        // Installed before anything runs so no signal hits the default action
        let shutdown = listen_for_signals()?;
        Ok(controller.run(shutdown).await?)
    });

    // An abandoned cleanup prompt may still be blocked on stdin
    runtime.shutdown_background();
    let outcome = outcome?;

    match outcome {
        RunOutcome::Completed(summary) => {
            info!("{}", summary.result_line());
        }
        RunOutcome::EnvironmentUnavailable(reason) => {
            info!("Nothing was run: {}", reason);
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
