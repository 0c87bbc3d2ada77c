//! Bar loading and trading-calendar resolution for the runner.
//!
//! Given the configured instruments, reads one `<id>.csv` per instrument from
//! the data directory and builds the trading calendar. Fallback policy:
//! 1. If `<data_dir>/<id>.csv` exists → parse it
//! 2. If not and `--synthetic` → generate synthetic bars (tagged)
//! 3. Otherwise → fail with a clear error
//!
//! Synthetic data is a developer-only debug mode. Results produced on
//! synthetic data are tagged in the run result.

use chrono::{Datelike, NaiveDate};
use ledgerlab_core::domain::{Instrument, InstrumentId, MarketData};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no bar file for '{instrument}' at {} (use --synthetic for synthetic data)", path.display())]
    MissingFile { instrument: String, path: PathBuf },

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed CSV in {}: {source}", path.display())]
    Csv { path: PathBuf, source: csv::Error },

    #[error("{}: unrecognised date '{value}' (expected YYYY-MM-DD or YYYYMMDD)", path.display())]
    BadDate { path: PathBuf, value: String },

    #[error("{}: duplicate bar for {date}", path.display())]
    DuplicateDate { path: PathBuf, date: NaiveDate },

    #[error("{}: bar for {date} has non-positive or non-finite prices", path.display())]
    InsaneBar { path: PathBuf, date: NaiveDate },

    #[error("no bars fall inside the requested date range")]
    EmptyCalendar,
}

/// Where an instrument's bars came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Csv,
    Synthetic,
}

/// Options controlling how bars are loaded.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Drop bars before this date.
    pub start: Option<NaiveDate>,
    /// Drop bars after this date.
    pub end: Option<NaiveDate>,
    /// If true, generate synthetic bars when a bar file is missing.
    pub synthetic: bool,
}

impl LoadOptions {
    fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }
}

/// One instrument's bars, sorted by date with no duplicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarSeries {
    bars: Vec<MarketData>,
}

impl BarSeries {
    /// Sort `bars` by date. Fails on a repeated date.
    pub fn new(mut bars: Vec<MarketData>) -> Result<Self, NaiveDate> {
        bars.sort_by_key(|b| b.date);
        if let Some(pair) = bars.windows(2).find(|w| w[0].date == w[1].date) {
            return Err(pair[0].date);
        }
        Ok(Self { bars })
    }

    pub fn bars(&self) -> &[MarketData] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Position of the bar for `date`, if the instrument traded that day.
    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        self.bars.binary_search_by_key(&date, |b| b.date).ok()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&MarketData> {
        self.index_of(date).map(|i| &self.bars[i])
    }

    /// Latest bar on or before `date`.
    pub fn last_on_or_before(&self, date: NaiveDate) -> Option<&MarketData> {
        let end = self.bars.partition_point(|b| b.date <= date);
        end.checked_sub(1).map(|i| &self.bars[i])
    }
}

/// Bars for every loaded instrument.
#[derive(Debug, Clone, Default)]
pub struct BarTable {
    series: HashMap<InstrumentId, BarSeries>,
}

impl BarTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: InstrumentId, series: BarSeries) {
        self.series.insert(id, series);
    }

    pub fn series(&self, id: &InstrumentId) -> Option<&BarSeries> {
        self.series.get(id)
    }

    pub fn bar(&self, id: &InstrumentId, date: NaiveDate) -> Option<&MarketData> {
        self.series.get(id).and_then(|s| s.get(date))
    }

    /// Sorted union of every instrument's bar dates.
    pub fn calendar(&self) -> Vec<NaiveDate> {
        let dates: BTreeSet<NaiveDate> = self
            .series
            .values()
            .flat_map(|s| s.bars.iter().map(|b| b.date))
            .collect();
        dates.into_iter().collect()
    }

    /// Deterministic BLAKE3 hash over all bar data.
    ///
    /// Covers dates and OHLC values in sorted instrument order, so it's
    /// identical regardless of HashMap iteration order.
    pub fn dataset_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        let mut ids: Vec<&InstrumentId> = self.series.keys().collect();
        ids.sort();

        for id in ids {
            hasher.update(id.as_str().as_bytes());
            for bar in &self.series[id].bars {
                hasher.update(bar.date.to_string().as_bytes());
                hasher.update(&bar.open.to_le_bytes());
                hasher.update(&bar.high.to_le_bytes());
                hasher.update(&bar.low.to_le_bytes());
                hasher.update(&bar.close.to_le_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Result of loading bars, including data source provenance.
#[derive(Debug, Clone)]
pub struct LoadedData {
    /// Shared with the rule decisions built over it.
    pub table: Arc<BarTable>,
    /// Trading calendar: every date any instrument has a bar.
    pub dates: Vec<NaiveDate>,
    pub sources: HashMap<InstrumentId, DataSource>,
    pub dataset_hash: String,
    /// Whether any instrument used synthetic data.
    pub has_synthetic: bool,
}

/// Load bars for every instrument, with synthetic fallback when enabled.
pub fn load_bars(
    instruments: &[Instrument],
    data_dir: &Path,
    opts: &LoadOptions,
) -> Result<LoadedData, LoadError> {
    let mut table = BarTable::new();
    let mut sources = HashMap::new();
    let mut has_synthetic = false;

    for instrument in instruments {
        let path = data_dir.join(format!("{}.csv", instrument.id));
        let (bars, source) = if path.exists() {
            let bars = read_csv(&path)?;
            info!("loaded {} bars for {instrument} from {}", bars.len(), path.display());
            (bars, DataSource::Csv)
        } else if opts.synthetic {
            warn!("generating synthetic data for {instrument}, results are tagged synthetic");
            has_synthetic = true;
            (generate_synthetic_bars(instrument.id.as_str(), opts), DataSource::Synthetic)
        } else {
            return Err(LoadError::MissingFile {
                instrument: instrument.id.to_string(),
                path,
            });
        };

        let clipped: Vec<MarketData> =
            bars.into_iter().filter(|b| opts.contains(b.date)).collect();
        let series = BarSeries::new(clipped)
            .map_err(|date| LoadError::DuplicateDate { path: path.clone(), date })?;
        table.insert(instrument.id.clone(), series);
        sources.insert(instrument.id.clone(), source);
    }

    let dates = table.calendar();
    if dates.is_empty() {
        return Err(LoadError::EmptyCalendar);
    }
    let dataset_hash = table.dataset_hash();

    Ok(LoadedData {
        table: Arc::new(table),
        dates,
        sources,
        dataset_hash,
        has_synthetic,
    })
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: Option<u64>,
}

/// Parse a bar file with header `date,open,high,low,close[,volume]`.
pub fn read_csv(path: &Path) -> Result<Vec<MarketData>, LoadError> {
    let file = std::fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);

    let mut bars = Vec::new();
    for row in reader.deserialize::<CsvRow>() {
        let row = row.map_err(|source| LoadError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let date = parse_date(&row.date).ok_or_else(|| LoadError::BadDate {
            path: path.to_path_buf(),
            value: row.date.clone(),
        })?;
        let mut bar = MarketData::new(date, row.open, row.high, row.low, row.close);
        bar.volume = row.volume;
        if !bar.is_sane() {
            return Err(LoadError::InsaneBar {
                path: path.to_path_buf(),
                date,
            });
        }
        bars.push(bar);
    }
    Ok(bars)
}

/// Accepts `YYYY-MM-DD` and `YYYYMMDD`.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .ok()
}

/// Generate synthetic bars for testing/development.
///
/// Produces a random walk from a starting price of 100.0 over weekdays in the
/// requested range (2020 through 2021 when unbounded). Seeded from the
/// instrument id, so repeated runs see the same bars.
pub fn generate_synthetic_bars(id: &str, opts: &LoadOptions) -> Vec<MarketData> {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let seed: [u8; 32] = *blake3::hash(id.as_bytes()).as_bytes();
    let mut rng = StdRng::from_seed(seed);

    let start = opts
        .start
        .or_else(|| NaiveDate::from_ymd_opt(2020, 1, 1))
        .unwrap_or_default();
    let end = opts
        .end
        .or_else(|| NaiveDate::from_ymd_opt(2021, 12, 31))
        .unwrap_or_default();

    let mut bars = Vec::new();
    let mut price = 100.0_f64;
    let mut current = start;

    while current <= end {
        let weekday = current.weekday();
        if weekday == chrono::Weekday::Sat || weekday == chrono::Weekday::Sun {
            current += chrono::Duration::days(1);
            continue;
        }

        let daily_return: f64 = rng.gen_range(-0.03..0.03);
        let open = price;
        let close = price * (1.0 + daily_return);
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
        let mut bar = MarketData::new(current, open, high, low, close);
        bar.volume = Some(rng.gen_range(500_000..5_000_000u64));
        bars.push(bar);

        price = close;
        current += chrono::Duration::days(1);
    }

    bars
}
