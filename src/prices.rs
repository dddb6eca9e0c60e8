//! Closing-price sources.
//!
//! The engine only ever sees a fully materialized [`PriceTable`]; everything
//! that touches files or request-supplied series lives here.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::{ClosingPriceSeries, PricePoint, PriceTable, parse_price_date};

#[derive(Debug, Error)]
pub enum PriceSourceError {
    #[error("no price data available for ticker '{ticker}'")]
    NotFound { ticker: String },
    #[error("failed to read {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("{path} line {line}: {reason}")]
    BadRow {
        path: String,
        line: u64,
        reason: String,
    },
}

/// Date span prices are requested for, both ends inclusive.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FetchWindow {
    /// Starts on January 1st of `start_year`. Ends on December 31st of
    /// `end_year` when that year is already over, otherwise on `today`.
    pub fn for_years(start_year: i32, end_year: i32, today: NaiveDate) -> Option<Self> {
        let start = NaiveDate::from_ymd_opt(start_year, 1, 1)?;
        let end = if end_year < today.year() {
            NaiveDate::from_ymd_opt(end_year, 12, 31)?
        } else {
            today
        };
        Some(Self { start, end })
    }
}

pub trait PriceSource: Send + Sync {
    fn closing_prices(
        &self,
        ticker: &str,
        window: &FetchWindow,
    ) -> Result<ClosingPriceSeries, PriceSourceError>;
}

/// In-memory series keyed by ticker.
#[derive(Clone, Debug, Default)]
pub struct StaticPriceSource {
    series: HashMap<String, ClosingPriceSeries>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, ticker: &str, series: ClosingPriceSeries) -> Self {
        self.insert(ticker, series);
        self
    }

    pub fn insert(&mut self, ticker: &str, series: ClosingPriceSeries) {
        self.series.insert(ticker.to_string(), series);
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl From<HashMap<String, Vec<PricePoint>>> for StaticPriceSource {
    fn from(raw: HashMap<String, Vec<PricePoint>>) -> Self {
        Self {
            series: raw
                .into_iter()
                .map(|(ticker, points)| (ticker, ClosingPriceSeries::new(points)))
                .collect(),
        }
    }
}

impl PriceSource for StaticPriceSource {
    fn closing_prices(
        &self,
        ticker: &str,
        window: &FetchWindow,
    ) -> Result<ClosingPriceSeries, PriceSourceError> {
        self.series
            .get(ticker)
            .map(|s| s.within(window.start, window.end))
            .ok_or_else(|| PriceSourceError::NotFound {
                ticker: ticker.to_string(),
            })
    }
}

/// Reads `<root>/<ticker>.csv` files with `date` and `close` columns.
///
/// Ticker characters outside `[A-Za-z0-9._-]` become `_` in the file name,
/// so `^NSEI` is read from `_NSEI.csv`.
#[derive(Clone, Debug)]
pub struct CsvDirectorySource {
    root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "Date")]
    date: String,
    #[serde(alias = "Close")]
    close: Option<f64>,
}

impl CsvDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, ticker: &str) -> PathBuf {
        let stem = ticker
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect::<String>();
        self.root.join(format!("{stem}.csv"))
    }
}

impl PriceSource for CsvDirectorySource {
    fn closing_prices(
        &self,
        ticker: &str,
        window: &FetchWindow,
    ) -> Result<ClosingPriceSeries, PriceSourceError> {
        let path = self.path_for(ticker);
        if !path.is_file() {
            return Err(PriceSourceError::NotFound {
                ticker: ticker.to_string(),
            });
        }
        let display = path.display().to_string();

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&path)
            .map_err(|source| PriceSourceError::Csv {
                path: display.clone(),
                source,
            })?;

        let csv_error = |source| PriceSourceError::Csv {
            path: display.clone(),
            source,
        };
        let headers = reader.headers().map_err(csv_error)?.clone();

        let mut points = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_error)?;
            let line = record.position().map_or(0, |p| p.line());
            let row: CsvRow = record.deserialize(Some(&headers)).map_err(csv_error)?;
            let Some(close) = row.close else {
                continue;
            };
            let date = parse_price_date(&row.date).ok_or_else(|| PriceSourceError::BadRow {
                path: display.clone(),
                line,
                reason: format!("invalid date '{}'", row.date),
            })?;
            points.push(PricePoint { date, close });
        }

        Ok(ClosingPriceSeries::new(points).within(window.start, window.end))
    }
}

/// Tries `primary` first and falls back when it has nothing for a ticker.
pub struct LayeredSource<'a> {
    primary: &'a dyn PriceSource,
    fallback: &'a dyn PriceSource,
}

impl<'a> LayeredSource<'a> {
    pub fn new(primary: &'a dyn PriceSource, fallback: &'a dyn PriceSource) -> Self {
        Self { primary, fallback }
    }
}

impl PriceSource for LayeredSource<'_> {
    fn closing_prices(
        &self,
        ticker: &str,
        window: &FetchWindow,
    ) -> Result<ClosingPriceSeries, PriceSourceError> {
        match self.primary.closing_prices(ticker, window) {
            Err(PriceSourceError::NotFound { .. }) => self.fallback.closing_prices(ticker, window),
            other => other,
        }
    }
}

/// Fetches each distinct ticker once. Failed tickers are logged and left out
/// of the table so validation reports them as missing data.
pub fn fetch_price_table<'t>(
    source: &dyn PriceSource,
    tickers: impl IntoIterator<Item = &'t str>,
    window: &FetchWindow,
) -> PriceTable {
    let unique = tickers.into_iter().collect::<BTreeSet<_>>();
    let mut table = PriceTable::with_capacity(unique.len());

    for ticker in unique {
        match source.closing_prices(ticker, window) {
            Ok(series) => {
                debug!(
                    ticker,
                    points = series.len(),
                    start = %window.start,
                    end = %window.end,
                    "fetched monthly closes"
                );
                table.insert(ticker.to_string(), series);
            }
            Err(err) => warn!(ticker, error = %err, "price fetch failed"),
        }
    }
    table
}
