use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use tracing::{debug, info};

use super::error::{ValidationError, Violation, ViolationKind};
use super::types::{
    ClosingPriceSeries, PriceTable, Scenario, SimulationParameters, StrategyType,
};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;
const MIN_REBALANCING_FUNDS: usize = 2;
/// Longest simulated period, inclusive of both end years.
pub const MAX_SIMULATION_YEARS: i64 = 200;

/// Name to ticker resolution used while validating scenarios.
pub trait TickerLookup {
    fn ticker_for(&self, fund_name: &str) -> Option<&str>;
}

impl TickerLookup for HashMap<String, String> {
    fn ticker_for(&self, fund_name: &str) -> Option<&str> {
        self.get(fund_name).map(String::as_str)
    }
}

pub fn validate_simulation_parameters(params: &SimulationParameters) -> Result<(), ValidationError> {
    let mut violations = Vec::new();

    if params.start_year > params.end_year {
        violations.push(Violation::new(
            "start_year",
            ViolationKind::StartAfterEnd {
                start_year: params.start_year,
                end_year: params.end_year,
            },
        ));
    } else {
        let years = i64::from(params.end_year) - i64::from(params.start_year) + 1;
        if years > MAX_SIMULATION_YEARS {
            violations.push(Violation::new(
                "end_year",
                ViolationKind::YearSpanTooLong {
                    years,
                    max: MAX_SIMULATION_YEARS,
                },
            ));
        }
    }

    if !(0.0..=1.0).contains(&params.annual_draw_rate) {
        violations.push(Violation::new(
            "annual_draw_rate",
            ViolationKind::DrawRateOutOfRange {
                rate: params.annual_draw_rate,
            },
        ));
    }

    if !(0.0..=1.0).contains(&params.inflation_rate) {
        violations.push(Violation::new(
            "inflation_rate",
            ViolationKind::InflationRateOutOfRange {
                rate: params.inflation_rate,
            },
        ));
    }

    if !params.initial_corpus.is_finite() || params.initial_corpus <= 0.0 {
        violations.push(Violation::new(
            "initial_corpus",
            ViolationKind::InitialCorpusNotPositive {
                amount: params.initial_corpus,
            },
        ));
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::Parameters { violations })
    }
}

/// Structural checks for one scenario. `index` is the 1-based position used in
/// the error prefix.
pub fn validate_scenario(
    index: usize,
    scenario: &Scenario,
    catalog: &dyn TickerLookup,
    prices: &PriceTable,
) -> Result<(), ValidationError> {
    let mut violations = Vec::new();
    let strategy_label = scenario
        .strategy_type
        .as_ref()
        .map(|s| s.display_name().to_string());
    let funds = &scenario.funds;

    if scenario.strategy_type.is_none() {
        violations.push(Violation::new(
            "strategy_type",
            ViolationKind::MissingStrategyType,
        ));
    }

    if funds.is_empty() {
        violations.push(Violation::new(
            "funds",
            ViolationKind::NoFunds {
                strategy_type: strategy_label.clone(),
            },
        ));
    }

    for (i, fund) in funds.iter().enumerate() {
        let Some(name) = fund.name.as_deref().filter(|n| !n.is_empty()) else {
            violations.push(Violation::new(
                format!("funds[{i}].name"),
                ViolationKind::MissingFundName {
                    position: i + 1,
                    strategy_type: strategy_label.clone(),
                },
            ));
            continue;
        };

        let Some(ticker) = catalog.ticker_for(name) else {
            violations.push(Violation::new(
                format!("funds[{i}].name"),
                ViolationKind::UnknownFund {
                    name: name.to_string(),
                },
            ));
            continue;
        };

        if !prices.contains_key(ticker) {
            violations.push(Violation::new(
                format!("funds[{i}].ticker"),
                ViolationKind::MissingPriceData {
                    ticker: ticker.to_string(),
                    fund: name.to_string(),
                },
            ));
        }
    }

    match scenario.strategy_type {
        Some(StrategyType::Rebalancing) => {
            if funds.len() < MIN_REBALANCING_FUNDS {
                violations.push(Violation::new(
                    "funds",
                    ViolationKind::TooFewFunds {
                        required: MIN_REBALANCING_FUNDS,
                        actual: funds.len(),
                    },
                ));
            }

            let mut weights = Vec::with_capacity(funds.len());
            for (i, fund) in funds.iter().enumerate() {
                let fund_label = fund
                    .name
                    .clone()
                    .unwrap_or_else(|| (i + 1).to_string());
                match fund.weight {
                    None => violations.push(Violation::new(
                        format!("funds[{i}].weight"),
                        ViolationKind::MissingWeight { fund: fund_label },
                    )),
                    Some(weight) if !(weight > 0.0 && weight <= 1.0) => {
                        violations.push(Violation::new(
                            format!("funds[{i}].weight"),
                            ViolationKind::WeightOutOfRange {
                                fund: fund_label,
                                weight,
                            },
                        ))
                    }
                    Some(weight) => weights.push(weight),
                }
            }

            let sum: f64 = weights.iter().sum();
            if !weights.is_empty() && (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
                violations.push(Violation::new("funds", ViolationKind::WeightSum { sum }));
            }
        }
        Some(StrategyType::SingleFund) => {
            if funds.len() != 1 {
                violations.push(Violation::new(
                    "funds",
                    ViolationKind::WrongFundCount {
                        expected: 1,
                        actual: funds.len(),
                    },
                ));
            }
        }
        Some(StrategyType::Unrecognized(_)) | None => {}
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::Scenario { index, violations })
    }
}

/// Checks that `series` reaches back to January of `start_year` and forward
/// to January of `end_year`.
pub fn validate_single_fund_date_range(
    series: &ClosingPriceSeries,
    start_year: i32,
    end_year: i32,
    fund_name: &str,
) -> Result<(), ValidationError> {
    let field = format!("prices[{fund_name}]");
    let (Some(first), Some(last)) = (series.first_date(), series.last_date()) else {
        return Err(ValidationError::Coverage {
            fund: fund_name.to_string(),
            violations: vec![Violation::new(
                field,
                ViolationKind::EmptySeries {
                    fund: fund_name.to_string(),
                },
            )],
        });
    };

    let mut violations = Vec::new();

    if NaiveDate::from_ymd_opt(start_year, 1, 1).is_none_or(|start| first > start) {
        violations.push(Violation::new(
            field.clone(),
            ViolationKind::CoverageStartsLate {
                fund: fund_name.to_string(),
                first,
                start_year,
            },
        ));
    }

    if NaiveDate::from_ymd_opt(end_year, 1, 1).is_none_or(|end| last < end) {
        violations.push(Violation::new(
            field,
            ViolationKind::CoverageEndsEarly {
                fund: fund_name.to_string(),
                last,
                end_year,
            },
        ));
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::Coverage {
            fund: fund_name.to_string(),
            violations,
        })
    }
}

/// Runs every precondition check before a batch is simulated.
///
/// Stages run in order: global parameters, each scenario's structure, then
/// date coverage once per distinct fund name. The first failing stage is
/// returned with all of its violations.
pub fn run_all_validations(
    params: &SimulationParameters,
    scenarios: &[Scenario],
    catalog: &dyn TickerLookup,
    prices: &PriceTable,
) -> Result<(), ValidationError> {
    validate_simulation_parameters(params)?;

    for (i, scenario) in scenarios.iter().enumerate() {
        validate_scenario(i + 1, scenario, catalog, prices)?;
    }

    let mut validated_funds = HashSet::new();
    for fund in scenarios.iter().flat_map(|s| s.funds.iter()) {
        let Some(name) = fund.name.as_deref() else {
            continue;
        };
        if !validated_funds.insert(name) {
            continue;
        }
        let Some(series) = catalog.ticker_for(name).and_then(|t| prices.get(t)) else {
            continue;
        };
        validate_single_fund_date_range(series, params.start_year, params.end_year, name)?;
        debug!(fund = name, points = series.len(), "price coverage ok");
    }

    info!(
        scenarios = scenarios.len(),
        funds = validated_funds.len(),
        "all validations passed"
    );
    Ok(())
}
