//! Monitor module for PCIe Advanced Error Reporting counters.
//!
//! Discovers PCIe endpoint links through the `pcicrawler` inventory tool,
//! samples the cumulative AER counters of every link on each poll, and
//! emits a pass/fail diagnosis per link when monitoring stops.

use crate::error::MonitorError;
use crate::modules::MonitorModule;
use crate::report::{HardwareHandle, HardwareInfo, Reporter, SeriesHandle, StepHandle, Verdict};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Default location of the pcicrawler executable.
pub const CRAWLER_DEFAULT_PATH: &str = "/usr/local/bin/pcicrawler";

/// Arguments requesting AER counters in structured form.
const CRAWLER_ARGS: [&str; 2] = ["--aer", "--json"];

/// AER error categories reported for each link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorCategory {
    Correctable,
    Nonfatal,
    Fatal,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 3] = [
        ErrorCategory::Correctable,
        ErrorCategory::Nonfatal,
        ErrorCategory::Fatal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Correctable => "correctable",
            ErrorCategory::Nonfatal => "nonfatal",
            ErrorCategory::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full readout of one crawler invocation.
///
/// The tool prints a bare map from link address to link descriptor; the
/// raw output is wrapped in `{"pci_links": ...}` before decoding.
#[derive(Debug, Deserialize)]
struct CrawlerReadout {
    pci_links: BTreeMap<String, PciLink>,
}

/// One PCIe link as reported by the crawler. Fields this module does not
/// use are ignored during decoding.
#[derive(Debug, Deserialize)]
struct PciLink {
    addr: String,
    express_type: String,
    /// Addresses of the upstream ports, nearest first.
    #[serde(default)]
    path: Vec<String>,
    #[serde(default)]
    slot: String,
    #[serde(default)]
    aer: AerReadings,
}

#[derive(Debug, Default, Deserialize)]
struct AerReadings {
    #[serde(default)]
    device: AerCounters,
}

/// Cumulative AER counters, grouped by category and keyed by the
/// tool-defined error type name (e.g. "BADTLP").
#[derive(Debug, Default, Deserialize)]
struct AerCounters {
    #[serde(default)]
    correctable: BTreeMap<String, u64>,
    #[serde(default)]
    nonfatal: BTreeMap<String, u64>,
    #[serde(default)]
    fatal: BTreeMap<String, u64>,
}

impl AerCounters {
    fn category(&self, category: ErrorCategory) -> &BTreeMap<String, u64> {
        match category {
            ErrorCategory::Correctable => &self.correctable,
            ErrorCategory::Nonfatal => &self.nonfatal,
            ErrorCategory::Fatal => &self.fatal,
        }
    }
}

/// Abstraction over the crawler subprocess so tests can inject canned
/// output.
pub trait CrawlerInvoker {
    /// Run the executable and return its full standard output.
    fn run(&mut self, executable: &Path, args: &[&str]) -> Result<String, MonitorError>;
}

/// Invoker that spawns the real executable and blocks until it exits.
///
/// There is no timeout on the call; a hung crawler stalls the whole run.
#[derive(Debug, Default)]
pub struct SystemCrawlerInvoker;

impl CrawlerInvoker for SystemCrawlerInvoker {
    fn run(&mut self, executable: &Path, args: &[&str]) -> Result<String, MonitorError> {
        if !executable.exists() {
            return Err(MonitorError::ToolMissing(executable.to_path_buf()));
        }

        debug!("Running {} {}", executable.display(), args.join(" "));
        let output = Command::new(executable).args(args).output().map_err(|e| {
            MonitorError::ToolFailed(format!("failed to spawn '{}': {}", executable.display(), e))
        })?;

        if !output.status.success() {
            return Err(MonitorError::ToolFailed(format!(
                "'{}' exited with {}",
                executable.display(),
                output.status
            )));
        }

        Ok(String::from_utf8(output.stdout)?)
    }
}

/// Tracks a single class of errors for a single PCIe link.
struct CounterSeries {
    handle: SeriesHandle,
    /// Latches true the first time a nonzero count is observed.
    errors_found: bool,
}

/// Per-link monitoring state, created at discovery and finalized at stop.
struct PciLinkTracker {
    local_hw: HardwareHandle,
    remote_hw: HardwareHandle,
    step: Option<StepHandle>,
    /// First key is the error category, second the specific error type.
    /// The key set is fixed once monitoring starts.
    measurements: BTreeMap<ErrorCategory, BTreeMap<String, CounterSeries>>,
}

/// Monitor module sampling PCIe AER counters through pcicrawler.
pub struct PcieAerModule {
    crawler_path: PathBuf,
    invoker: Box<dyn CrawlerInvoker>,
    links: BTreeMap<String, PciLinkTracker>,
}

impl PcieAerModule {
    /// Create a module running the crawler at `crawler_path`, or at the
    /// default location if none is given.
    pub fn new(crawler_path: Option<PathBuf>) -> Self {
        Self::with_invoker(crawler_path, Box::new(SystemCrawlerInvoker))
    }

    /// Create a module with a custom invoker. Tests use this to substitute
    /// scripted crawler output.
    pub fn with_invoker(crawler_path: Option<PathBuf>, invoker: Box<dyn CrawlerInvoker>) -> Self {
        Self {
            crawler_path: crawler_path.unwrap_or_else(|| PathBuf::from(CRAWLER_DEFAULT_PATH)),
            invoker,
            links: BTreeMap::new(),
        }
    }

    /// Execute the crawler once and parse its output.
    fn execute_crawler(&mut self) -> Result<CrawlerReadout, MonitorError> {
        let output = self.invoker.run(&self.crawler_path, &CRAWLER_ARGS)?;
        let wrapped = format!("{{\"pci_links\":{}}}", output);
        Ok(serde_json::from_str(&wrapped)?)
    }

    /// Require every open series to have a reading in `readout`.
    ///
    /// A poll that would only partially sample the series set is rejected
    /// here, before anything is appended to the sink.
    fn verify_reading(&self, readout: &CrawlerReadout) -> Result<(), MonitorError> {
        for (addr, tracker) in &self.links {
            let link = readout
                .pci_links
                .get(addr)
                .ok_or_else(|| MonitorError::SchemaDrift(format!("no readings for address {addr}")))?;
            for (category, series_by_type) in &tracker.measurements {
                let readings = link.aer.device.category(*category);
                for error_type in series_by_type.keys() {
                    if !readings.contains_key(error_type) {
                        return Err(MonitorError::SchemaDrift(format!(
                            "no readings for address {addr}, error type {category}:{error_type}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn hardware_info(link: &PciLink) -> HardwareInfo {
    HardwareInfo {
        name: format!("PCIE_NODE:{}", link.addr),
        part_type: link.express_type.clone(),
        location: link.slot.clone(),
    }
}

impl MonitorModule for PcieAerModule {
    fn name(&self) -> &str {
        "pcie-aer"
    }

    fn load_hardware_info(
        &mut self,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<String>, MonitorError> {
        let readout = self.execute_crawler()?;

        for (addr, link) in &readout.pci_links {
            // Only endpoints with a known upstream port form a monitorable
            // link.
            if link.express_type != "endpoint" || link.path.is_empty() {
                continue;
            }

            // An endpoint whose upstream port is absent from the same
            // reading points at a broken inventory, not a transient miss.
            let local = readout.pci_links.get(&link.path[0]).ok_or_else(|| {
                MonitorError::SchemaDrift(format!(
                    "unmatched endpoint at address {}, path={}",
                    addr, link.path[0]
                ))
            })?;

            let remote_hw = reporter.register_hardware(hardware_info(link))?;
            let local_hw = reporter.register_hardware(hardware_info(local))?;
            self.links.insert(
                addr.clone(),
                PciLinkTracker {
                    local_hw,
                    remote_hw,
                    step: None,
                    measurements: BTreeMap::new(),
                },
            );
        }

        info!("Discovered {} PCIe endpoint link(s)", self.links.len());
        Ok(self.links.keys().cloned().collect())
    }

    fn start_monitoring(&mut self, reporter: &mut dyn Reporter) -> Result<(), MonitorError> {
        let readout = self.execute_crawler()?;

        for (addr, tracker) in &mut self.links {
            let link = readout.pci_links.get(addr).ok_or_else(|| {
                MonitorError::SchemaDrift(format!(
                    "missing pci link {addr}, was present in initial reading"
                ))
            })?;

            let step = reporter.begin_step(&format!("monitor-link-{addr}"))?;
            for category in ErrorCategory::ALL {
                for error_type in link.aer.device.category(category).keys() {
                    let handle = reporter.open_series(
                        step,
                        tracker.remote_hw,
                        &format!("{category}:{error_type}"),
                        "count",
                    )?;
                    tracker.measurements.entry(category).or_default().insert(
                        error_type.clone(),
                        CounterSeries {
                            handle,
                            errors_found: false,
                        },
                    );
                }
            }
            tracker.step = Some(step);
        }
        Ok(())
    }

    fn poll(
        &mut self,
        reporter: &mut dyn Reporter,
        _window_start: DateTime<Utc>,
        _window_end: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        let readout = self.execute_crawler()?;
        self.verify_reading(&readout)?;

        // Counters are cumulative totals; each poll appends the raw value.
        for (addr, tracker) in &mut self.links {
            let link = readout
                .pci_links
                .get(addr)
                .ok_or_else(|| MonitorError::SchemaDrift(format!("no readings for address {addr}")))?;
            for (category, series_by_type) in &mut tracker.measurements {
                let readings = link.aer.device.category(*category);
                for (error_type, series) in series_by_type.iter_mut() {
                    let value = readings.get(error_type).copied().ok_or_else(|| {
                        MonitorError::SchemaDrift(format!(
                            "no readings for address {addr}, error type {category}:{error_type}"
                        ))
                    })?;
                    reporter.append_sample(series.handle, value)?;
                    if value > 0 {
                        series.errors_found = true;
                    }
                }
            }
        }
        Ok(())
    }

    fn stop_monitoring(&mut self, reporter: &mut dyn Reporter) -> Result<(), MonitorError> {
        for (addr, tracker) in &mut self.links {
            let Some(step) = tracker.step else {
                // Monitoring never started for this link; nothing to
                // finalize.
                continue;
            };

            let mut failures = Vec::new();
            for (category, series_by_type) in &tracker.measurements {
                for (error_type, series) in series_by_type {
                    if series.errors_found {
                        failures.push(format!("{category}:{error_type}"));
                    }
                    reporter.close_series(series.handle)?;
                }
            }

            let records = [tracker.local_hw, tracker.remote_hw];
            if failures.is_empty() {
                reporter.emit_diagnosis(
                    step,
                    Verdict::Pass,
                    "healthy-pcie-link",
                    &format!("No AER errors found for link with endpoint {addr}"),
                    &records,
                )?;
            } else {
                reporter.emit_diagnosis(
                    step,
                    Verdict::Fail,
                    "unhealthy-pcie-link",
                    &format!(
                        "AER errors found for link with endpoint {addr}, with type(s): {}",
                        failures.join(",")
                    ),
                    &records,
                )?;
            }
            reporter.end_step(step)?;
        }
        Ok(())
    }
}
