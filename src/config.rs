//! Daemon settings, loaded once at startup and treated as immutable.

use crate::error::ConfigError;
use chrono::Duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Polling cadence applied when `polling_interval_secs` is unset.
pub const DEFAULT_POLLING_INTERVAL_SECS: i64 = 300;

/// Monitor kinds that can be requested in the settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    /// PCIe Advanced Error Reporting counters
    Pcie,
}

/// Settings for one monitoring run
///
/// Every field is optional in the TOML file; a missing field takes its
/// zero value and `validate` rejects anything out of range.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// Seconds between polls; 0 means "use the default"
    #[serde(default)]
    pub polling_interval_secs: i64,

    /// Total run duration in seconds; 0 means "run until cancelled"
    #[serde(default)]
    pub runtime_secs: i64,

    /// Monitor kinds to run; an empty list requests all kinds
    #[serde(default)]
    pub monitors: Vec<MonitorKind>,

    /// Override for the pcicrawler executable location
    #[serde(default)]
    pub crawler_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read and
    /// `ConfigError::TomlError` if it does not parse.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Ok(toml::from_str(&raw)?)
    }

    /// Check settings values for validity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling_interval_secs < 0 {
            return Err(ConfigError::ValidationError(
                "'polling_interval_secs' is negative".to_string(),
            ));
        }
        if self.runtime_secs < 0 {
            return Err(ConfigError::ValidationError(
                "'runtime_secs' is negative".to_string(),
            ));
        }
        Ok(())
    }

    /// The polling interval actually used by the orchestrator.
    pub fn effective_polling_interval(&self) -> Duration {
        if self.polling_interval_secs == 0 {
            Duration::seconds(DEFAULT_POLLING_INTERVAL_SECS)
        } else {
            Duration::seconds(self.polling_interval_secs)
        }
    }

    /// Whether the given monitor kind should run.
    pub fn monitor_requested(&self, kind: MonitorKind) -> bool {
        self.monitors.is_empty() || self.monitors.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use std::io::Write;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.runtime_secs, 0);
        assert!(settings.monitors.is_empty());
        assert!(settings.crawler_path.is_none());
    }

    #[test]
    fn test_zero_interval_uses_default() {
        let settings = Settings::default();
        assert_eq!(
            settings.effective_polling_interval(),
            Duration::seconds(DEFAULT_POLLING_INTERVAL_SECS)
        );
    }

    #[quickcheck]
    fn prop_effective_interval_defaults_only_on_zero(secs: u32) -> bool {
        let settings = Settings {
            polling_interval_secs: i64::from(secs),
            ..Settings::default()
        };
        let expected = if secs == 0 {
            DEFAULT_POLLING_INTERVAL_SECS
        } else {
            i64::from(secs)
        };
        settings.effective_polling_interval() == Duration::seconds(expected)
    }

    #[test]
    fn test_negative_interval_rejected() {
        let settings = Settings {
            polling_interval_secs: -1,
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_negative_runtime_rejected() {
        let settings = Settings {
            runtime_secs: -30,
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_empty_monitor_list_requests_all_kinds() {
        let settings = Settings::default();
        assert!(settings.monitor_requested(MonitorKind::Pcie));
    }

    #[test]
    fn test_monitor_list_filters_kinds() {
        let settings = Settings {
            monitors: vec![MonitorKind::Pcie],
            ..Settings::default()
        };
        assert!(settings.monitor_requested(MonitorKind::Pcie));
    }

    #[test]
    fn test_from_file_parses_all_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "polling_interval_secs = 60\n\
             runtime_secs = 3600\n\
             monitors = [\"pcie\"]\n\
             crawler_path = \"/opt/bin/pcicrawler\""
        )
        .unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.polling_interval_secs, 60);
        assert_eq!(settings.runtime_secs, 3600);
        assert_eq!(settings.monitors, vec![MonitorKind::Pcie]);
        assert_eq!(
            settings.crawler_path,
            Some(PathBuf::from("/opt/bin/pcicrawler"))
        );
    }

    #[test]
    fn test_from_file_missing_fields_take_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "runtime_secs = 10").unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.polling_interval_secs, 0);
        assert_eq!(settings.runtime_secs, 10);
        assert!(settings.monitors.is_empty());
    }

    #[test]
    fn test_from_file_missing_file_is_read_error() {
        let result = Settings::from_file(Path::new("/nonexistent/aermon.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }

    #[test]
    fn test_from_file_rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "polling_interval_secs = \"soon\"").unwrap();

        let result = Settings::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }
}
