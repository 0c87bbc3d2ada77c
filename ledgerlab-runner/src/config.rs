//! Serializable backtest configuration, loaded from TOML.
//!
//! ```toml
//! [backtest]
//! name = "demo"
//! data_dir = "data"
//!
//! [[instruments]]
//! id = "2330"
//! name = "TSMC"
//!
//! [options]
//! stop_loss = 0.1
//!
//! [[buy]]
//! type = "CLOSE_ABOVE_SMA"
//! period = 20
//!
//! [[sell]]
//! type = "CLOSE_BELOW_SMA"
//! period = 10
//! ```

use chrono::NaiveDate;
use ledgerlab_core::domain::Instrument;
use ledgerlab_core::engine::{self, ContextOptions};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Unique identifier for a backtest run (content-addressable hash).
pub type RunId = String;

/// Errors from reading or validating a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid options: {0}")]
    Options(#[from] engine::ConfigError),
    #[error("{0}")]
    Invalid(String),
}

/// Top-level config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub backtest: BacktestSection,
    pub instruments: Vec<InstrumentConfig>,
    #[serde(default)]
    pub options: ContextOptions,
    #[serde(default)]
    pub buy: Vec<RuleConfig>,
    #[serde(default)]
    pub sell: Vec<RuleConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSection {
    #[serde(default = "default_name")]
    pub name: String,
    /// Directory holding one `<id>.csv` per instrument. Relative paths are
    /// resolved against the config file's directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

fn default_name() -> String {
    "backtest".into()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl InstrumentConfig {
    pub fn to_instrument(&self) -> Instrument {
        Instrument::new(self.id.clone(), self.name.clone().unwrap_or_else(|| self.id.clone()))
    }
}

/// A built-in decision rule (serializable enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleConfig {
    /// Fires on every date the instrument has a bar.
    Always,
    /// Fires on every `n`-th bar of the instrument, starting with the first.
    EveryNthDate { n: usize },
    /// Close above its `period`-bar simple moving average.
    CloseAboveSma { period: usize },
    /// Close below its `period`-bar simple moving average.
    CloseBelowSma { period: usize },
    /// Close above the highest high of the previous `lookback` bars.
    Breakout { lookback: usize },
    /// Close below the lowest low of the previous `lookback` bars.
    Breakdown { lookback: usize },
}

impl RuleConfig {
    /// Stable name used in logs and failure reports (e.g. "close_above_sma_20").
    pub fn name(&self) -> String {
        match self {
            RuleConfig::Always => "always".into(),
            RuleConfig::EveryNthDate { n } => format!("every_nth_date_{n}"),
            RuleConfig::CloseAboveSma { period } => format!("close_above_sma_{period}"),
            RuleConfig::CloseBelowSma { period } => format!("close_below_sma_{period}"),
            RuleConfig::Breakout { lookback } => format!("breakout_{lookback}"),
            RuleConfig::Breakdown { lookback } => format!("breakdown_{lookback}"),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let window = match *self {
            RuleConfig::Always => return Ok(()),
            RuleConfig::EveryNthDate { n } => n,
            RuleConfig::CloseAboveSma { period } | RuleConfig::CloseBelowSma { period } => period,
            RuleConfig::Breakout { lookback } | RuleConfig::Breakdown { lookback } => lookback,
        };
        if window == 0 {
            return Err(ConfigError::Invalid(format!(
                "rule {} needs a positive window",
                self.name()
            )));
        }
        Ok(())
    }
}

impl BacktestConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file. A relative `data_dir` is
    /// rebased onto the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&text)?;
        if config.backtest.data_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.backtest.data_dir = parent.join(&config.backtest.data_dir);
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instruments.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[instruments]] entry is required".into(),
            ));
        }
        let mut seen = HashSet::new();
        for instrument in &self.instruments {
            if instrument.id.trim().is_empty() {
                return Err(ConfigError::Invalid("instrument id must not be empty".into()));
            }
            if !seen.insert(instrument.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "instrument '{}' is listed twice",
                    instrument.id
                )));
            }
        }
        if self.buy.is_empty() {
            return Err(ConfigError::Invalid("at least one [[buy]] rule is required".into()));
        }
        for rule in self.buy.iter().chain(&self.sell) {
            rule.validate()?;
        }
        if let (Some(start), Some(end)) = (self.backtest.start_date, self.backtest.end_date) {
            if start > end {
                return Err(ConfigError::Invalid(format!(
                    "start_date {start} is after end_date {end}"
                )));
            }
        }
        self.options.validate()?;
        Ok(())
    }

    pub fn instruments(&self) -> Vec<Instrument> {
        self.instruments.iter().map(InstrumentConfig::to_instrument).collect()
    }

    /// Deterministic hash of this configuration.
    ///
    /// Two runs with identical configs (and identical data) produce the same
    /// RunId.
    pub fn run_id(&self) -> RunId {
        let canonical = match serde_json::to_string(self) {
            Ok(json) => json,
            // only a non-UTF-8 data_dir fails to serialize
            Err(err) => {
                warn!(
                    "config '{}' does not serialize ({err}), hashing its debug form",
                    self.backtest.name
                );
                format!("{self:?}")
            }
        };
        blake3::hash(canonical.as_bytes()).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerlab_core::domain::PriceField;

    const SAMPLE: &str = r#"
[backtest]
name = "demo"
data_dir = "bars"
start_date = "2020-01-01"

[[instruments]]
id = "2330"
name = "TSMC"

[[instruments]]
id = "2317"

[options]
starting_capital = 500000
sell_price_field = "close"
stop_loss = 0.1
price_band = { low = 10.0, high = 500.0 }

[[buy]]
type = "CLOSE_ABOVE_SMA"
period = 20

[[sell]]
type = "CLOSE_BELOW_SMA"
period = 10

[[sell]]
type = "EVERY_NTH_DATE"
n = 5
"#;

    #[test]
    fn parses_full_document() {
        let config = BacktestConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.backtest.name, "demo");
        assert_eq!(config.backtest.start_date, NaiveDate::from_ymd_opt(2020, 1, 1));
        assert_eq!(config.backtest.end_date, None);
        assert_eq!(config.instruments.len(), 2);
        assert_eq!(config.options.starting_capital, 500_000);
        assert_eq!(config.options.sell_price_field, PriceField::Close);
        assert_eq!(config.options.buy_price_field, PriceField::Open);
        assert_eq!(config.options.stop_loss, Some(0.1));
        assert_eq!(config.buy, vec![RuleConfig::CloseAboveSma { period: 20 }]);
        assert_eq!(config.sell[1], RuleConfig::EveryNthDate { n: 5 });
    }

    #[test]
    fn instrument_name_defaults_to_id() {
        let config = BacktestConfig::from_toml(SAMPLE).unwrap();
        let instruments = config.instruments();
        assert_eq!(instruments[0].name, "TSMC");
        assert_eq!(instruments[1].name, "2317");
    }

    #[test]
    fn missing_buy_rule_is_rejected() {
        let toml = r#"
[backtest]
[[instruments]]
id = "2330"
"#;
        let err = BacktestConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("[[buy]]"));
    }

    #[test]
    fn duplicate_instrument_is_rejected() {
        let toml = r#"
[backtest]
[[instruments]]
id = "2330"
[[instruments]]
id = "2330"
[[buy]]
type = "ALWAYS"
"#;
        assert!(matches!(
            BacktestConfig::from_toml(toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn invalid_options_surface_engine_error() {
        let toml = r#"
[backtest]
[[instruments]]
id = "2330"
[options]
stop_loss = 10.0
[[buy]]
type = "ALWAYS"
"#;
        assert!(matches!(
            BacktestConfig::from_toml(toml),
            Err(ConfigError::Options(engine::ConfigError::InvalidStopLoss(_)))
        ));
    }

    #[test]
    fn zero_window_is_rejected() {
        let toml = r#"
[backtest]
[[instruments]]
id = "2330"
[[buy]]
type = "BREAKOUT"
lookback = 0
"#;
        assert!(BacktestConfig::from_toml(toml).is_err());
    }

    #[test]
    fn run_id_is_deterministic_and_sensitive() {
        let config = BacktestConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.run_id(), config.run_id());
        assert_eq!(config.run_id().len(), 64);

        let mut other = config.clone();
        other.options.stop_loss = Some(0.2);
        assert_ne!(config.run_id(), other.run_id());
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_data_dirs_keep_distinct_run_ids() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let mut first = BacktestConfig::from_toml(SAMPLE).unwrap();
        first.backtest.data_dir = PathBuf::from(OsStr::from_bytes(b"bars-\xff"));
        let mut second = first.clone();
        second.backtest.data_dir = PathBuf::from(OsStr::from_bytes(b"bars-\xfe"));

        assert!(serde_json::to_string(&first).is_err());
        assert_eq!(first.run_id(), first.run_id());
        assert_ne!(first.run_id(), second.run_id());
        assert_ne!(first.run_id(), blake3::hash(b"").to_hex().to_string());
    }

    #[test]
    fn from_file_rebases_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = BacktestConfig::from_file(&path).unwrap();
        assert_eq!(config.backtest.data_dir, dir.path().join("bars"));
    }
}
