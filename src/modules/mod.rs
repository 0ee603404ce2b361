/// PCIe Advanced Error Reporting monitor
pub mod pcie_aer;

pub use pcie_aer::PcieAerModule;

use crate::error::MonitorError;
use crate::report::Reporter;
use chrono::{DateTime, Utc};

/// Capability implemented by every error monitor module. Each module
/// tracks a different class of hardware errors.
///
/// The orchestrator drives the four phases in order and never assumes a
/// concrete module type. Failures propagate verbatim; modules do not
/// retry internally.
pub trait MonitorModule {
    /// Short name used in log output.
    fn name(&self) -> &str;

    /// Discover the hardware this module cares about, register descriptive
    /// records with the sink, and return the keys it will track.
    fn load_hardware_info(
        &mut self,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<String>, MonitorError>;

    /// Take a baseline reading and open one measurement series per tracked
    /// counter. The counter set observed here is fixed for the run.
    fn start_monitoring(&mut self, reporter: &mut dyn Reporter) -> Result<(), MonitorError>;

    /// Take one reading and append a sample to every open series. Not all
    /// monitors need the window bounds.
    fn poll(
        &mut self,
        reporter: &mut dyn Reporter,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<(), MonitorError>;

    /// Close every open series and emit one diagnosis per tracked entity.
    fn stop_monitoring(&mut self, reporter: &mut dyn Reporter) -> Result<(), MonitorError>;
}
