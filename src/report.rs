//! Results reporting sink for hardware records, measurement series and
//! diagnoses.
//!
//! The orchestrator and the monitor modules only ever talk to the narrow
//! [`Reporter`] trait. The shipped implementation, [`JsonlReporter`], emits
//! one JSON record per line so downstream tooling can consume the run as a
//! stream.

use crate::error::ReportError;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::io::Write;

/// Handle to a registered hardware record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HardwareHandle(u64);

/// Handle to an open diagnostic step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StepHandle(u64);

/// Handle to a measurement series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SeriesHandle(u64);

/// Descriptive record for one piece of monitored hardware.
#[derive(Debug, Clone, Serialize)]
pub struct HardwareInfo {
    /// Stable name, e.g. "PCIE_NODE:0000:00:01.0"
    pub name: String,
    /// Part type as reported by the inventory tool
    pub part_type: String,
    /// Physical location (slot or block path)
    pub location: String,
}

/// Terminal health verdict attached to hardware records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

/// Contract against the external results sink.
///
/// Handles are opaque to callers; a reporter validates them and rejects
/// operations on unknown or closed entities.
pub trait Reporter {
    /// Open the diagnostic run for the given device under test.
    fn begin_run(&mut self, name: &str, host: &str) -> Result<(), ReportError>;

    /// Register a hardware record and return its handle.
    fn register_hardware(&mut self, info: HardwareInfo) -> Result<HardwareHandle, ReportError>;

    /// Open a named diagnostic step.
    fn begin_step(&mut self, name: &str) -> Result<StepHandle, ReportError>;

    /// Open a named measurement series under a step, attached to one
    /// hardware record.
    fn open_series(
        &mut self,
        step: StepHandle,
        hardware: HardwareHandle,
        name: &str,
        unit: &str,
    ) -> Result<SeriesHandle, ReportError>;

    /// Append one sample to an open series.
    fn append_sample(&mut self, series: SeriesHandle, value: u64) -> Result<(), ReportError>;

    /// Close a series; further appends are rejected.
    fn close_series(&mut self, series: SeriesHandle) -> Result<(), ReportError>;

    /// Emit a terminal verdict for the given hardware records.
    fn emit_diagnosis(
        &mut self,
        step: StepHandle,
        verdict: Verdict,
        symptom: &str,
        message: &str,
        hardware: &[HardwareHandle],
    ) -> Result<(), ReportError>;

    /// Close a step.
    fn end_step(&mut self, step: StepHandle) -> Result<(), ReportError>;

    /// Report a run-level error outside any step.
    fn add_error(&mut self, symptom: &str, message: &str) -> Result<(), ReportError>;
}

/// One line of reporter output.
#[derive(Debug, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum Record<'a> {
    RunStart {
        name: &'a str,
        host: &'a str,
    },
    Hardware {
        id: HardwareHandle,
        #[serde(flatten)]
        info: &'a HardwareInfo,
    },
    StepStart {
        id: StepHandle,
        name: &'a str,
    },
    SeriesStart {
        id: SeriesHandle,
        step: StepHandle,
        hardware: HardwareHandle,
        name: &'a str,
        unit: &'a str,
    },
    Sample {
        series: SeriesHandle,
        value: u64,
    },
    SeriesEnd {
        id: SeriesHandle,
    },
    Diagnosis {
        step: StepHandle,
        verdict: Verdict,
        symptom: &'a str,
        message: &'a str,
        hardware: &'a [HardwareHandle],
    },
    StepEnd {
        id: StepHandle,
    },
    Error {
        symptom: &'a str,
        message: &'a str,
    },
}

/// Reporter that writes one JSON record per line to the given writer.
pub struct JsonlReporter<W: Write> {
    out: W,
    next_id: u64,
    hardware: HashSet<u64>,
    steps: HashSet<u64>,
    /// Known series ids, mapped to whether the series is still open.
    series: HashMap<u64, bool>,
}

impl JsonlReporter<std::io::Stdout> {
    /// Reporter writing to standard output.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> JsonlReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            next_id: 0,
            hardware: HashSet::new(),
            steps: HashSet::new(),
            series: HashMap::new(),
        }
    }

    /// Consume the reporter and return the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn mint_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn emit(&mut self, record: &Record<'_>) -> Result<(), ReportError> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }

    fn check_step(&self, step: StepHandle) -> Result<(), ReportError> {
        if !self.steps.contains(&step.0) {
            return Err(ReportError::UnknownHandle {
                kind: "step",
                id: step.0,
            });
        }
        Ok(())
    }

    fn check_hardware(&self, hardware: HardwareHandle) -> Result<(), ReportError> {
        if !self.hardware.contains(&hardware.0) {
            return Err(ReportError::UnknownHandle {
                kind: "hardware",
                id: hardware.0,
            });
        }
        Ok(())
    }
}

impl<W: Write> Reporter for JsonlReporter<W> {
    fn begin_run(&mut self, name: &str, host: &str) -> Result<(), ReportError> {
        self.emit(&Record::RunStart { name, host })
    }

    fn register_hardware(&mut self, info: HardwareInfo) -> Result<HardwareHandle, ReportError> {
        let id = self.mint_id();
        self.emit(&Record::Hardware {
            id: HardwareHandle(id),
            info: &info,
        })?;
        self.hardware.insert(id);
        Ok(HardwareHandle(id))
    }

    fn begin_step(&mut self, name: &str) -> Result<StepHandle, ReportError> {
        let id = self.mint_id();
        self.emit(&Record::StepStart {
            id: StepHandle(id),
            name,
        })?;
        self.steps.insert(id);
        Ok(StepHandle(id))
    }

    fn open_series(
        &mut self,
        step: StepHandle,
        hardware: HardwareHandle,
        name: &str,
        unit: &str,
    ) -> Result<SeriesHandle, ReportError> {
        self.check_step(step)?;
        self.check_hardware(hardware)?;
        let id = self.mint_id();
        self.emit(&Record::SeriesStart {
            id: SeriesHandle(id),
            step,
            hardware,
            name,
            unit,
        })?;
        self.series.insert(id, true);
        Ok(SeriesHandle(id))
    }

    fn append_sample(&mut self, series: SeriesHandle, value: u64) -> Result<(), ReportError> {
        match self.series.get(&series.0).copied() {
            Some(true) => {}
            Some(false) => return Err(ReportError::SeriesClosed(series.0)),
            None => {
                return Err(ReportError::UnknownHandle {
                    kind: "series",
                    id: series.0,
                })
            }
        }
        self.emit(&Record::Sample { series, value })
    }

    fn close_series(&mut self, series: SeriesHandle) -> Result<(), ReportError> {
        match self.series.get_mut(&series.0) {
            Some(open) if *open => *open = false,
            Some(_) => return Err(ReportError::SeriesClosed(series.0)),
            None => {
                return Err(ReportError::UnknownHandle {
                    kind: "series",
                    id: series.0,
                })
            }
        }
        self.emit(&Record::SeriesEnd { id: series })
    }

    fn emit_diagnosis(
        &mut self,
        step: StepHandle,
        verdict: Verdict,
        symptom: &str,
        message: &str,
        hardware: &[HardwareHandle],
    ) -> Result<(), ReportError> {
        self.check_step(step)?;
        for handle in hardware {
            self.check_hardware(*handle)?;
        }
        self.emit(&Record::Diagnosis {
            step,
            verdict,
            symptom,
            message,
            hardware,
        })
    }

    fn end_step(&mut self, step: StepHandle) -> Result<(), ReportError> {
        self.check_step(step)?;
        self.steps.remove(&step.0);
        self.emit(&Record::StepEnd { id: step })
    }

    fn add_error(&mut self, symptom: &str, message: &str) -> Result<(), ReportError> {
        self.emit(&Record::Error { symptom, message })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn reporter() -> JsonlReporter<Vec<u8>> {
        JsonlReporter::new(Vec::new())
    }

    fn records(reporter: JsonlReporter<Vec<u8>>) -> Vec<Value> {
        let raw = String::from_utf8(reporter.into_inner()).unwrap();
        raw.lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_run_start_record() {
        let mut reporter = reporter();
        reporter.begin_run("error-monitor", "host-1").unwrap();

        let records = records(reporter);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["record"], "run_start");
        assert_eq!(records[0]["name"], "error-monitor");
        assert_eq!(records[0]["host"], "host-1");
    }

    #[test]
    fn test_hardware_record_flattens_info() {
        let mut reporter = reporter();
        reporter
            .register_hardware(HardwareInfo {
                name: "PCIE_NODE:0000:00:01.0".to_string(),
                part_type: "endpoint".to_string(),
                location: "slot-3".to_string(),
            })
            .unwrap();

        let records = records(reporter);
        assert_eq!(records[0]["record"], "hardware");
        assert_eq!(records[0]["name"], "PCIE_NODE:0000:00:01.0");
        assert_eq!(records[0]["part_type"], "endpoint");
        assert_eq!(records[0]["location"], "slot-3");
    }

    #[test]
    fn test_series_lifecycle_records() {
        let mut reporter = reporter();
        let hw = reporter
            .register_hardware(HardwareInfo {
                name: "hw".to_string(),
                part_type: "endpoint".to_string(),
                location: String::new(),
            })
            .unwrap();
        let step = reporter.begin_step("monitor-link-a").unwrap();
        let series = reporter
            .open_series(step, hw, "correctable:BADTLP", "count")
            .unwrap();
        reporter.append_sample(series, 3).unwrap();
        reporter.close_series(series).unwrap();
        reporter.end_step(step).unwrap();

        let records = records(reporter);
        let kinds: Vec<&str> = records
            .iter()
            .map(|r| r["record"].as_str().unwrap())
            .collect();
        assert_eq!(
            kinds,
            vec![
                "hardware",
                "step_start",
                "series_start",
                "sample",
                "series_end",
                "step_end"
            ]
        );
        assert_eq!(records[2]["name"], "correctable:BADTLP");
        assert_eq!(records[2]["unit"], "count");
        assert_eq!(records[3]["value"], 3);
    }

    #[test]
    fn test_append_after_close_rejected() {
        let mut reporter = reporter();
        let hw = reporter
            .register_hardware(HardwareInfo {
                name: "hw".to_string(),
                part_type: "endpoint".to_string(),
                location: String::new(),
            })
            .unwrap();
        let step = reporter.begin_step("step").unwrap();
        let series = reporter.open_series(step, hw, "fatal:DLP", "count").unwrap();
        reporter.close_series(series).unwrap();

        let result = reporter.append_sample(series, 1);
        assert!(matches!(result, Err(ReportError::SeriesClosed(_))));
    }

    #[test]
    fn test_double_close_rejected() {
        let mut reporter = reporter();
        let hw = reporter
            .register_hardware(HardwareInfo {
                name: "hw".to_string(),
                part_type: "endpoint".to_string(),
                location: String::new(),
            })
            .unwrap();
        let step = reporter.begin_step("step").unwrap();
        let series = reporter.open_series(step, hw, "fatal:DLP", "count").unwrap();
        reporter.close_series(series).unwrap();

        assert!(matches!(
            reporter.close_series(series),
            Err(ReportError::SeriesClosed(_))
        ));
    }

    #[test]
    fn test_open_series_rejects_unknown_step() {
        let mut reporter = reporter();
        let hw = reporter
            .register_hardware(HardwareInfo {
                name: "hw".to_string(),
                part_type: "endpoint".to_string(),
                location: String::new(),
            })
            .unwrap();

        let result = reporter.open_series(StepHandle(99), hw, "series", "count");
        assert!(matches!(
            result,
            Err(ReportError::UnknownHandle { kind: "step", .. })
        ));
    }

    #[test]
    fn test_diagnosis_record() {
        let mut reporter = reporter();
        let hw = reporter
            .register_hardware(HardwareInfo {
                name: "hw".to_string(),
                part_type: "endpoint".to_string(),
                location: String::new(),
            })
            .unwrap();
        let step = reporter.begin_step("step").unwrap();
        reporter
            .emit_diagnosis(step, Verdict::Fail, "unhealthy-pcie-link", "bad", &[hw])
            .unwrap();

        let records = records(reporter);
        let diagnosis = records.last().unwrap();
        assert_eq!(diagnosis["record"], "diagnosis");
        assert_eq!(diagnosis["verdict"], "FAIL");
        assert_eq!(diagnosis["symptom"], "unhealthy-pcie-link");
    }
}
