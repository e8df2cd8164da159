//! Goal-directed Android app test runner.
//!
//! Runs natural-language tests from a TOML suite against a device reached
//! through `adb`, asking `codex exec` to plan and judge each step.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use mobileqa::core::action::parse_action;
use mobileqa::exit_codes;
use mobileqa::io::config::{RunnerConfig, Suite, load_config, load_suite};
use mobileqa::io::device::AdbDevice;
use mobileqa::io::oracle::CodexOracle;
use mobileqa::logging;
use mobileqa::step::describe_verdict;
use mobileqa::suite::{SuiteOptions, run_suite};

#[derive(Parser)]
#[command(
    name = "mobileqa",
    version,
    about = "Goal-directed test runner for Android apps"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a test suite against a connected device.
    Run {
        /// Suite file with `[[tests]]` entries.
        #[arg(long)]
        suite: PathBuf,
        /// Runner config; defaults apply when the file is missing.
        #[arg(long, default_value = "mobileqa.toml")]
        config: PathBuf,
        /// Device serial (`adb -s`).
        #[arg(long)]
        device: Option<String>,
        /// APK to install before every test.
        #[arg(long)]
        apk: Option<PathBuf>,
        /// Root directory for per-test artifacts.
        #[arg(long, default_value = "artifacts")]
        artifacts: PathBuf,
        /// Clear app data before every test.
        #[arg(long)]
        reset_app: bool,
        /// Run only the named test.
        #[arg(long)]
        single_test: Option<String>,
        /// Oracle model override.
        #[arg(long)]
        model: Option<String>,
        /// Print the suite summary as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Parse and validate a suite and config without touching a device.
    Check {
        #[arg(long)]
        suite: PathBuf,
        #[arg(long, default_value = "mobileqa.toml")]
        config: PathBuf,
    },
    /// Validate one planner action given as a JSON literal.
    ValidateAction {
        /// Action JSON, e.g. '{"action_type":"done","description":"d","params":{}}'.
        json: String,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            suite,
            config,
            device,
            apk,
            artifacts,
            reset_app,
            single_test,
            model,
            json,
        } => {
            let mut cfg = load_config(&config)?;
            if device.is_some() {
                cfg.device.serial = device;
            }
            if model.is_some() {
                cfg.oracle.model = model;
            }
            cfg.validate()?;
            let suite = load_selected_suite(&suite, single_test.as_deref())?;
            cmd_run(
                &cfg,
                &suite,
                &SuiteOptions { apk, reset_app },
                &artifacts,
                json,
            )
        }
        Command::Check { suite, config } => cmd_check(&suite, &config),
        Command::ValidateAction { json } => cmd_validate_action(&json),
    }
}

fn load_selected_suite(path: &Path, single_test: Option<&str>) -> Result<Suite> {
    let suite = load_suite(path)?;
    match single_test {
        Some(name) => suite.select(name),
        None => Ok(suite),
    }
}

fn cmd_run(
    cfg: &RunnerConfig,
    suite: &Suite,
    options: &SuiteOptions,
    artifacts: &Path,
    json: bool,
) -> Result<i32> {
    let device = AdbDevice::new(&cfg.device);
    device.verify()?;

    let summary = run_suite(
        &device,
        |paths| CodexOracle::new(cfg.oracle.clone(), paths.oracle_dir.clone()),
        cfg,
        suite,
        options,
        artifacts,
        |test, verdict| {
            if !json {
                println!("[{}] {}", test.name, describe_verdict(verdict));
            }
        },
    )?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("serialize suite summary")?
        );
    } else {
        print!("\n{}", summary.render());
    }
    Ok(if summary.all_passed() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_check(suite_path: &Path, config_path: &Path) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let suite = load_suite(suite_path)?;
    for test in &suite.tests {
        println!("{} ({})", test.name, test.package);
    }
    println!(
        "{} tests OK (max_steps={}, max_retries={})",
        suite.tests.len(),
        cfg.max_steps,
        cfg.max_retries
    );
    Ok(exit_codes::OK)
}

fn cmd_validate_action(raw: &str) -> Result<i32> {
    let value: Value = serde_json::from_str(raw).context("parse action json")?;
    match parse_action(&value) {
        Ok(action) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&action).context("serialize action")?
            );
            Ok(exit_codes::OK)
        }
        Err(reason) => {
            eprintln!("{reason}");
            Ok(exit_codes::INVALID)
        }
    }
}
