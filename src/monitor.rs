//! Polling orchestration for the error monitor daemon.
//!
//! [`ErrorMonitor`] owns the module set and drives the strictly linear
//! flow: hardware discovery, baseline, fixed-cadence polling, shutdown.
//! A module failure at any phase aborts the whole run; there is no
//! partial recovery or module-level isolation.

use crate::cancel::CancellationSignal;
use crate::config::{MonitorKind, Settings};
use crate::error::MonitorError;
use crate::modules::{MonitorModule, PcieAerModule};
use crate::report::Reporter;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Granularity at which the polling loop re-checks the cancellation flag
/// while waiting for the next poll boundary.
const CANCEL_CHECK_SLICE: Duration = Duration::from_millis(100);

/// Name under which the diagnostic run is reported.
const RUN_NAME: &str = "error-monitor";

/// Drives hardware discovery, the polling cadence and the monitoring
/// lifecycle across all registered modules.
pub struct ErrorMonitor {
    settings: Settings,
    reporter: Box<dyn Reporter>,
    modules: Vec<Box<dyn MonitorModule>>,
    cancel: Arc<CancellationSignal>,
    hostname: String,
}

impl ErrorMonitor {
    /// Create an orchestrator with no modules; see [`Self::add_module`].
    pub fn new(
        settings: Settings,
        reporter: Box<dyn Reporter>,
        cancel: Arc<CancellationSignal>,
    ) -> Self {
        Self {
            settings,
            reporter,
            modules: Vec::new(),
            cancel,
            hostname: dut_hostname(),
        }
    }

    /// Create an orchestrator with every requested monitor module wired in.
    /// An empty monitor list in the settings requests all kinds.
    pub fn create(
        settings: Settings,
        reporter: Box<dyn Reporter>,
        cancel: Arc<CancellationSignal>,
    ) -> Self {
        let mut monitor = Self::new(settings, reporter, cancel);
        if monitor.settings.monitor_requested(MonitorKind::Pcie) {
            let module = PcieAerModule::new(monitor.settings.crawler_path.clone());
            monitor.add_module(Box::new(module));
        }
        monitor
    }

    pub fn add_module(&mut self, module: Box<dyn MonitorModule>) {
        self.modules.push(module);
    }

    /// The number of registered modules.
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Entry point for one monitoring run.
    ///
    /// Funnels any failure into a single terminal error record on the
    /// sink; setup and runtime failures alike end the run, they do not
    /// restart it.
    pub fn execute(&mut self) {
        if let Err(err) = self.run() {
            error!("Monitoring run failed: {err}");
            if let Err(report_err) = self
                .reporter
                .add_error("error-monitor-run-failed", &format!("{err}"))
            {
                error!("Failed to report run failure: {report_err}");
            }
        }
    }

    fn run(&mut self) -> Result<(), MonitorError> {
        info!("Loading hardware inventory");
        self.load_hardware_info()?;
        self.reporter.begin_run(RUN_NAME, &self.hostname)?;
        self.start_monitoring()?;
        self.poll_loop()?;
        self.stop_monitoring()?;
        Ok(())
    }

    fn load_hardware_info(&mut self) -> Result<(), MonitorError> {
        for module in &mut self.modules {
            let tracked = module.load_hardware_info(self.reporter.as_mut())?;
            info!(
                "Module {} is tracking {} device(s)",
                module.name(),
                tracked.len()
            );
        }
        Ok(())
    }

    fn start_monitoring(&mut self) -> Result<(), MonitorError> {
        info!("Starting error monitoring");
        for module in &mut self.modules {
            module.start_monitoring(self.reporter.as_mut())?;
        }
        Ok(())
    }

    /// Poll every module at a fixed cadence until the deadline passes or
    /// cancellation fires.
    ///
    /// Boundaries advance on a fixed grid (`previous + interval`), so a
    /// slow poll shifts no subsequent boundary. The first boundary is
    /// immediate. A boundary on or past the deadline is not polled.
    fn poll_loop(&mut self) -> Result<(), MonitorError> {
        let interval = self.settings.effective_polling_interval();
        let deadline = match self.settings.runtime_secs {
            0 => None,
            secs => Some(Utc::now() + chrono::Duration::seconds(secs)),
        };
        let mut previous = Utc::now() - interval;

        loop {
            if self.cancel.is_notified() {
                info!("Cancellation requested, leaving polling loop");
                break;
            }
            let boundary = previous + interval;
            if let Some(deadline) = deadline {
                if boundary >= deadline {
                    info!("Run deadline reached");
                    break;
                }
            }

            self.wait_until(boundary);
            if self.cancel.is_notified() {
                info!("Cancellation requested while waiting for poll boundary");
                break;
            }

            debug!("Polling monitors");
            for module in &mut self.modules {
                module.poll(self.reporter.as_mut(), previous, boundary)?;
            }
            previous = boundary;
        }
        Ok(())
    }

    /// Sleep in short slices until `boundary`, re-checking the
    /// cancellation flag between slices.
    fn wait_until(&self, boundary: DateTime<Utc>) {
        while !self.cancel.is_notified() {
            let now = Utc::now();
            if now >= boundary {
                break;
            }
            let remaining = (boundary - now).to_std().unwrap_or(Duration::ZERO);
            thread::sleep(std::cmp::min(remaining, CANCEL_CHECK_SLICE));
        }
    }

    fn stop_monitoring(&mut self) -> Result<(), MonitorError> {
        for module in &mut self.modules {
            module.stop_monitoring(self.reporter.as_mut())?;
        }
        info!("Stopped error monitoring");
        Ok(())
    }
}

/// Hostname of the device under test.
fn dut_hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "unknown-host".to_string();
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..len]).into_owned()
}
