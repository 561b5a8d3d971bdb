use std::{
    path::PathBuf,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use inquire::{Password, PasswordDisplayMode};
use keyprobe_core::{
    Config, KeyConfig, KeyVerdict, OpenWeatherProbe, ProbeRequest, check_once, compare,
    monitor_until_active_with, probe_key,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::output;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "keyprobe", version, about = "Check whether weather API keys are active")]
pub struct Cli {
    /// Path to the config file (defaults to the platform config directory).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print results as JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging on stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Defaults to `compare` when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Test every configured key against every configured city.
    Compare,

    /// Test one key against every configured city.
    Test {
        /// Key label; defaults to the first configured key.
        #[arg(long)]
        key: Option<String>,
    },

    /// Probe a single city once.
    Check {
        /// City name; multiple words are joined with spaces.
        #[arg(required = true, num_args = 1..)]
        city: Vec<String>,

        /// Key label; defaults to the first configured key.
        #[arg(long)]
        key: Option<String>,
    },

    /// Poll until a key becomes active.
    Monitor {
        /// Perform a single check and exit.
        #[arg(long)]
        once: bool,

        /// Key label; defaults to the first configured key.
        #[arg(long)]
        key: Option<String>,

        /// City to probe; overrides `monitor.city` from the config.
        #[arg(long)]
        city: Option<String>,

        /// Seconds between checks; overrides `monitor.interval_secs`.
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },

    /// Store an API key (or the environment variable holding it) under a label.
    Configure {
        /// Label for the key, e.g. "primary".
        label: String,

        /// Read the key from this environment variable instead of storing it.
        #[arg(long, value_name = "VAR")]
        env: Option<String>,
    },
}

fn exit_code(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<ExitCode> {
        let config_path = match self.config {
            Some(path) => path,
            None => Config::config_file_path()?,
        };
        let mut config = Config::load_from(&config_path)?;
        debug!(path = %config_path.display(), "loaded configuration");

        match self.command.unwrap_or(Command::Compare) {
            Command::Configure { label, env } => {
                configure(&mut config, label, env)?;
                config.validate()?;
                config.save_to(&config_path)?;
                println!("Saved configuration to {}", config_path.display());
                Ok(ExitCode::SUCCESS)
            }
            Command::Compare => {
                let prober = prepare(&config)?;
                let keys = config.resolve_keys()?;
                let comparison =
                    compare(&prober, &keys, &config.cities, &config.probe_settings()).await;

                let recommended = comparison.recommended().map(|r| r.label.clone());
                if self.json {
                    output::print_json(&json!({
                        "reports": comparison.reports,
                        "recommended": recommended,
                    }))?;
                } else {
                    output::print_comparison(&comparison, &keys);
                }

                Ok(exit_code(recommended.is_some()))
            }
            Command::Test { key } => {
                let prober = prepare(&config)?;
                let key = config.resolve_key(key.as_deref())?;
                let report =
                    probe_key(&prober, &key, &config.cities, &config.probe_settings()).await;

                if self.json {
                    output::print_json(&report)?;
                } else {
                    output::print_key_test(&report, &key);
                }

                Ok(exit_code(report.verdict() == KeyVerdict::FullyWorking))
            }
            Command::Check { city, key } => {
                let prober = prepare(&config)?;
                let key = config.resolve_key(key.as_deref())?;
                let request = ProbeRequest::new(key.api_key, city.join(" "), &config.probe_settings());
                let exchange = prober.exchange(&request).await;

                if self.json {
                    output::print_json(&exchange)?;
                } else {
                    output::print_check(&request, &exchange);
                }

                Ok(exit_code(exchange.outcome.is_active()))
            }
            Command::Monitor {
                once,
                key,
                city,
                interval,
            } => {
                let prober = prepare(&config)?;
                let key = config.resolve_key(key.as_deref())?;
                let city = city.unwrap_or_else(|| config.monitor.city.clone());
                let request =
                    ProbeRequest::new(key.api_key.as_str(), city, &config.monitor_settings());

                if once {
                    let report = check_once(&prober, &request).await;
                    if self.json {
                        output::print_json(&report)?;
                    } else {
                        output::print_monitor_result(&report);
                    }
                    return Ok(exit_code(report.is_active()));
                }

                let interval = match interval {
                    Some(0) => bail!("--interval must be greater than zero"),
                    Some(secs) => Duration::from_secs(secs),
                    None => config.monitor_interval(),
                };

                let cancelled = Arc::new(AtomicBool::new(false));
                spawn_interrupt_handler(Arc::clone(&cancelled));

                if !self.json {
                    output::print_monitor_banner(&key, &request, interval);
                }

                let json = self.json;
                let report = monitor_until_active_with(
                    &prober,
                    &request,
                    interval,
                    || cancelled.load(Ordering::SeqCst),
                    |attempt, outcome| {
                        if !json {
                            output::print_monitor_attempt(attempt, outcome, interval);
                        }
                    },
                )
                .await;

                if self.json {
                    output::print_json(&report)?;
                } else {
                    output::print_monitor_result(&report);
                }

                Ok(exit_code(report.is_active()))
            }
        }
    }
}

fn prepare(config: &Config) -> anyhow::Result<OpenWeatherProbe> {
    config.validate()?;
    OpenWeatherProbe::new()
}

/// Conventional status for a process ended by SIGINT.
const INTERRUPTED_EXIT: i32 = 130;

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// Stop at the next check.
    Stop,
    /// Already asked once; leave now, even mid-request.
    Exit,
}

fn interrupt(cancelled: &AtomicBool) -> Interrupt {
    if cancelled.swap(true, Ordering::SeqCst) {
        Interrupt::Exit
    } else {
        Interrupt::Stop
    }
}

/// The first Ctrl-C flips the flag so the monitor stops at its next check.
/// A second one exits the process.
fn spawn_interrupt_handler(cancelled: Arc<AtomicBool>) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            match interrupt(&cancelled) {
                Interrupt::Stop => {
                    info!("interrupt received, stopping after the current check");
                    eprintln!("Stopping after the current check; press Ctrl+C again to quit now.");
                }
                Interrupt::Exit => {
                    warn!("second interrupt received, exiting");
                    std::process::exit(INTERRUPTED_EXIT);
                }
            }
        }
    });
}

fn configure(config: &mut Config, label: String, env: Option<String>) -> anyhow::Result<()> {
    let entry = match env {
        Some(var) => KeyConfig::from_env(label, var),
        None => {
            let api_key = Password::new(&format!("API key for '{label}':"))
                .without_confirmation()
                .with_display_mode(PasswordDisplayMode::Masked)
                .prompt()
                .context("Failed to read API key")?;

            let api_key = api_key.trim();
            if api_key.is_empty() {
                bail!("API key must not be empty");
            }
            KeyConfig::inline(label, api_key)
        }
    };

    config.upsert_key(entry);
    Ok(())
}
