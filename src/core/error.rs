use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

/// What was wrong with one checked field, carrying the offending value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ViolationKind {
    StartAfterEnd { start_year: i32, end_year: i32 },
    YearSpanTooLong { years: i64, max: i64 },
    DrawRateOutOfRange { rate: f64 },
    InflationRateOutOfRange { rate: f64 },
    InitialCorpusNotPositive { amount: f64 },
    MissingStrategyType,
    NoFunds { strategy_type: Option<String> },
    MissingFundName { position: usize, strategy_type: Option<String> },
    UnknownFund { name: String },
    MissingPriceData { ticker: String, fund: String },
    TooFewFunds { required: usize, actual: usize },
    WrongFundCount { expected: usize, actual: usize },
    MissingWeight { fund: String },
    WeightOutOfRange { fund: String, weight: f64 },
    WeightSum { sum: f64 },
    EmptySeries { fund: String },
    CoverageStartsLate { fund: String, first: NaiveDate, start_year: i32 },
    CoverageEndsEarly { fund: String, last: NaiveDate, end_year: i32 },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Violation {
    pub field: String,
    #[serde(flatten)]
    pub kind: ViolationKind,
}

impl Violation {
    pub fn new(field: impl Into<String>, kind: ViolationKind) -> Self {
        Self {
            field: field.into(),
            kind,
        }
    }
}

fn strategy_label(strategy_type: &Option<String>) -> &str {
    strategy_type.as_deref().unwrap_or("None")
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::StartAfterEnd { .. } => {
                write!(f, "Error: Start year cannot be after end year.")
            }
            ViolationKind::YearSpanTooLong { years, max } => write!(
                f,
                "Error: Simulation period of {years} years exceeds the maximum of {max} years."
            ),
            ViolationKind::DrawRateOutOfRange { rate } => write!(
                f,
                "Error: Draw rate ({}%) must be between 0% and 100%.",
                rate * 100.0
            ),
            ViolationKind::InflationRateOutOfRange { rate } => write!(
                f,
                "Error: Inflation rate ({}%) must be between 0% and 100%.",
                rate * 100.0
            ),
            ViolationKind::InitialCorpusNotPositive { amount } => {
                write!(f, "Error: Initial corpus ({amount}) must be greater than 0.")
            }
            ViolationKind::MissingStrategyType => {
                write!(f, "Error: Scenario missing 'strategy_type'.")
            }
            ViolationKind::NoFunds { strategy_type } => write!(
                f,
                "Error: Scenario '{}' has no funds defined.",
                strategy_label(strategy_type)
            ),
            ViolationKind::MissingFundName {
                position,
                strategy_type,
            } => write!(
                f,
                "Error: Fund {position} in '{}' is missing 'name'.",
                strategy_label(strategy_type)
            ),
            ViolationKind::UnknownFund { name } => {
                write!(f, "Error: Fund '{name}' not found in available funds.")
            }
            ViolationKind::MissingPriceData { ticker, fund } => write!(
                f,
                "Error: No fetched data for ticker '{ticker}' (fund: {fund})."
            ),
            ViolationKind::TooFewFunds { required, actual } => write!(
                f,
                "Error: Rebalancing Strategy requires at least {required} funds. Got {actual}."
            ),
            ViolationKind::WrongFundCount { expected, actual } => write!(
                f,
                "Error: Single Fund Strategy requires exactly {expected} fund. Got {actual}."
            ),
            ViolationKind::MissingWeight { fund } => write!(
                f,
                "Error: Fund '{fund}' in Rebalancing Strategy is missing 'weight'."
            ),
            ViolationKind::WeightOutOfRange { fund, weight } => write!(
                f,
                "Error: Fund '{fund}' has invalid weight {weight}. Must be between 0 and 1."
            ),
            ViolationKind::WeightSum { sum } => write!(
                f,
                "Error: Rebalancing Strategy weights must sum to 1. Got {sum:.4}."
            ),
            ViolationKind::EmptySeries { fund } => write!(
                f,
                "Could not fetch historical data for {fund}. Cannot proceed with the simulation."
            ),
            ViolationKind::CoverageStartsLate {
                fund,
                first,
                start_year,
            } => write!(
                f,
                "Available data for {fund} starts on {}, but requested simulation starts in {start_year}.",
                first.format("%Y-%m-%d")
            ),
            ViolationKind::CoverageEndsEarly {
                fund,
                last,
                end_year,
            } => write!(
                f,
                "Available data for {fund} ends on {}, but requested simulation needs data up to January 1st, {end_year}.",
                last.format("%Y-%m-%d")
            ),
        }
    }
}

fn render(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// A failed validation stage. Every violation found in that stage is kept.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("{}", render(.violations))]
    Parameters { violations: Vec<Violation> },
    #[error("Scenario {index} validation failed:\n{}", render(.violations))]
    Scenario {
        index: usize,
        violations: Vec<Violation>,
    },
    #[error("{}", render(.violations))]
    Coverage {
        fund: String,
        violations: Vec<Violation>,
    },
}

impl ValidationError {
    pub fn violations(&self) -> &[Violation] {
        match self {
            ValidationError::Parameters { violations }
            | ValidationError::Scenario { violations, .. }
            | ValidationError::Coverage { violations, .. } => violations,
        }
    }
}

/// Engine preconditions that validation should already have ruled out.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SimulationError {
    #[error("fund '{fund}' has no resolved ticker")]
    MissingTicker { fund: String },
    #[error("no price series loaded for ticker '{ticker}'")]
    MissingPriceSeries { ticker: String },
    #[error("fund '{fund}' has no target weight")]
    MissingWeight { fund: String },
    #[error("{strategy} expects {expected} fund(s), got {actual}")]
    FundCount {
        strategy: &'static str,
        expected: &'static str,
        actual: usize,
    },
}
