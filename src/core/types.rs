use std::collections::HashMap;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Calendar month used to index simulation rows and monthly returns.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn is_december(self) -> bool {
        self.month == 12
    }

    /// Every month from `start_year-01` through `end_year-12`, in order.
    pub fn range(start_year: i32, end_year: i32) -> impl Iterator<Item = YearMonth> {
        (start_year..=end_year).flat_map(|year| (1..=12).map(move |month| YearMonth { year, month }))
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parses `YYYY-MM-DD`, or `YYYY-MM` as the first day of that month.
pub fn parse_price_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    let (year, month) = raw.split_once('-')?;
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1)
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

impl<'de> Deserialize<'de> for PricePoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct RawPoint {
            date: String,
            close: f64,
        }

        let raw = RawPoint::deserialize(deserializer)?;
        let date = parse_price_date(&raw.date).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid price date '{}'", raw.date))
        })?;
        Ok(PricePoint {
            date,
            close: raw.close,
        })
    }
}

/// Monthly closing prices for one ticker, kept sorted by date.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClosingPriceSeries {
    points: Vec<PricePoint>,
}

impl ClosingPriceSeries {
    pub fn new(mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|p| p.date);
        Self { points }
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    /// Points dated within `[start, end]`, both ends inclusive.
    pub fn within(&self, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            points: self
                .points
                .iter()
                .filter(|p| p.date >= start && p.date <= end)
                .copied()
                .collect(),
        }
    }

    /// Period-over-period returns keyed by month.
    ///
    /// When a month holds several points the last one counts as that month's
    /// close. The first observed month has no return, and neither does a month
    /// whose ratio is not finite; both read back as `0.0` through
    /// [`MonthlyReturns::at`].
    pub fn monthly_returns(&self) -> MonthlyReturns {
        let mut closes: Vec<(YearMonth, f64)> = Vec::with_capacity(self.points.len());
        for point in &self.points {
            let ym = YearMonth::from_date(point.date);
            match closes.last_mut() {
                Some((last, close)) if *last == ym => *close = point.close,
                _ => closes.push((ym, point.close)),
            }
        }

        let mut returns = HashMap::with_capacity(closes.len());
        for pair in closes.windows(2) {
            let (_, previous) = pair[0];
            let (ym, close) = pair[1];
            let r = close / previous - 1.0;
            if r.is_finite() {
                returns.insert(ym, r);
            }
        }
        MonthlyReturns(returns)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MonthlyReturns(HashMap<YearMonth, f64>);

impl MonthlyReturns {
    /// Return for `ym`; a month without an observation is a flat month.
    pub fn at(&self, ym: YearMonth) -> f64 {
        self.0.get(&ym).copied().unwrap_or(0.0)
    }
}

/// Closing prices by ticker.
pub type PriceTable = HashMap<String, ClosingPriceSeries>;

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationParameters {
    pub start_year: i32,
    pub end_year: i32,
    pub annual_draw_rate: f64,
    pub initial_corpus: f64,
    pub inflation_rate: f64,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum StrategyType {
    SingleFund,
    Rebalancing,
    Unrecognized(String),
}

impl StrategyType {
    /// Parses a request label. Blank labels count as absent.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let kind = match trimmed {
            "Single Fund Strategy" | "single-fund" | "single_fund" | "SingleFund" => {
                StrategyType::SingleFund
            }
            "Rebalancing Strategy" | "rebalancing" | "Rebalancing" => StrategyType::Rebalancing,
            other => StrategyType::Unrecognized(other.to_string()),
        };
        Some(kind)
    }

    pub fn display_name(&self) -> &str {
        match self {
            StrategyType::SingleFund => "Single Fund Strategy",
            StrategyType::Rebalancing => "Rebalancing Strategy",
            StrategyType::Unrecognized(label) => label,
        }
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl Serialize for StrategyType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.display_name())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundAllocation {
    pub name: Option<String>,
    pub ticker: Option<String>,
    pub weight: Option<f64>,
}

impl FundAllocation {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ticker: None,
            weight: None,
        }
    }

    pub fn weighted(name: &str, weight: f64) -> Self {
        Self {
            weight: Some(weight),
            ..Self::named(name)
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub strategy_type: Option<StrategyType>,
    pub funds: Vec<FundAllocation>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyResultRow {
    pub year_month: YearMonth,
    pub starting_corpus: f64,
    pub monthly_return: f64,
    pub monthly_draw: f64,
    pub corpus_after_growth: f64,
    pub ending_corpus: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSummary {
    pub months: usize,
    pub final_corpus: f64,
    pub lowest_corpus: f64,
    pub total_drawn: f64,
    pub depleted_in: Option<YearMonth>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioOutcome {
    pub label: String,
    pub legend_label: String,
    pub strategy_type: StrategyType,
    pub funds: Vec<String>,
    pub rows: Vec<MonthlyResultRow>,
    pub summary: ScenarioSummary,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedScenario {
    pub index: usize,
    pub strategy_type: Option<String>,
    pub reason: String,
}

/// Per-scenario results in request order, plus anything the orchestrator skipped.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationOutput {
    pub outcomes: Vec<ScenarioOutcome>,
    pub skipped: Vec<SkippedScenario>,
}

impl SimulationOutput {
    pub fn get(&self, label: &str) -> Option<&ScenarioOutcome> {
        self.outcomes.iter().find(|o| o.label == label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().map(|o| o.label.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawScheduleRow {
    pub year_month: YearMonth,
    pub monthly_draw: f64,
}
