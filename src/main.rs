use aermon::config::Settings;
use aermon::monitor::ErrorMonitor;
use aermon::report::JsonlReporter;
use aermon::CancellationSignal;
use anyhow::Context;
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

/// Command-line arguments for the PCIe AER error monitor daemon
#[derive(Parser)]
#[command(
    name = "aermon",
    about = "PCIe AER error monitor - background hardware error diagnostics",
    long_about = "A background diagnostic daemon that periodically samples PCIe Advanced \
                  Error Reporting counters through the pcicrawler inventory tool and \
                  reports a health diagnosis per monitored link."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Total run duration in seconds; 0 runs until interrupted
    #[arg(long, value_name = "SECS")]
    runtime: Option<i64>,

    /// Location of the pcicrawler executable
    #[arg(long, value_name = "PATH")]
    crawler_path: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,
}

/// Load settings from the configured file and apply CLI overrides.
fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Settings::from_file(path)
                .with_context(|| format!("failed to load settings from '{}'", path.display()))?
        }
        None => {
            info!("Using default configuration");
            Settings::default()
        }
    };

    if let Some(runtime) = cli.runtime {
        settings.runtime_secs = runtime;
    }
    if let Some(path) = &cli.crawler_path {
        settings.crawler_path = Some(path.clone());
    }

    settings.validate()?;
    Ok(settings)
}

/// Build the orchestrator: settings, signal handling, stdout reporter.
fn setup(cli: &Cli) -> anyhow::Result<ErrorMonitor> {
    let settings = load_settings(cli)?;

    let cancel = Arc::new(CancellationSignal::new());
    let handler_cancel = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        handler_cancel.notify();
    })
    .context("failed to install shutdown signal handler")?;

    let reporter = Box::new(JsonlReporter::stdout());
    Ok(ErrorMonitor::create(settings, reporter, cancel))
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting PCIe AER error monitor");

    let mut monitor = match setup(&cli) {
        Ok(monitor) => monitor,
        Err(err) => {
            error!("Setup failed: {err:#}");
            std::process::exit(1);
        }
    };

    // Runtime failures are reported through the results sink; only setup
    // failures change the exit code.
    monitor.execute();

    info!("Error monitor run complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["aermon"]);
        assert!(cli.config.is_none());
        assert!(cli.runtime.is_none());
        assert!(cli.crawler_path.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_overrides_apply_to_settings() {
        let cli = Cli::parse_from([
            "aermon",
            "--runtime",
            "120",
            "--crawler-path",
            "/opt/bin/pcicrawler",
        ]);

        let settings = load_settings(&cli).unwrap();
        assert_eq!(settings.runtime_secs, 120);
        assert_eq!(
            settings.crawler_path,
            Some(PathBuf::from("/opt/bin/pcicrawler"))
        );
    }

    #[test]
    fn test_cli_override_beats_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "runtime_secs = 600").unwrap();

        let cli = Cli::parse_from([
            "aermon",
            "--config",
            file.path().to_str().unwrap(),
            "--runtime",
            "5",
        ]);

        let settings = load_settings(&cli).unwrap();
        assert_eq!(settings.runtime_secs, 5);
    }

    #[test]
    fn test_negative_runtime_override_rejected() {
        let cli = Cli {
            config: None,
            runtime: Some(-1),
            crawler_path: None,
            verbose: false,
        };
        assert!(load_settings(&cli).is_err());
    }
}
