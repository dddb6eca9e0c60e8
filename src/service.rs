//! Request pipeline: prepare, fetch, validate, simulate.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::catalog::FundCatalog;
use crate::core::{
    DrawScheduleRow, FundAllocation, PricePoint, Scenario, ScenarioOutcome, SimulationError,
    SimulationParameters, SkippedScenario, StrategyType, ValidationError, Violation,
    monthly_draw_schedule, run_all_validations, run_strategy_simulations,
};
use crate::prices::{FetchWindow, LayeredSource, PriceSource, StaticPriceSource, fetch_price_table};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FundPayload {
    pub name: Option<String>,
    pub weight: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScenarioPayload {
    #[serde(alias = "strategyType")]
    pub strategy_type: Option<String>,
    pub funds: Vec<FundPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SimulationRequest {
    #[serde(alias = "simulationScenarios")]
    pub simulation_scenarios: Option<Vec<ScenarioPayload>>,
    #[serde(alias = "startYear")]
    pub start_year: Option<i32>,
    #[serde(alias = "endYear")]
    pub end_year: Option<i32>,
    #[serde(alias = "annualDrawRate")]
    pub annual_draw_rate: Option<f64>,
    #[serde(alias = "initialCorpus")]
    pub initial_corpus: Option<f64>,
    #[serde(alias = "inflationRate")]
    pub inflation_rate: Option<f64>,
    /// Closing prices supplied with the request; they take precedence over
    /// the configured price source.
    #[serde(alias = "priceData")]
    pub price_data: Option<HashMap<String, Vec<PricePoint>>>,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("simulation failed: {0}")]
    Simulation(#[from] SimulationError),
}

impl ServiceError {
    /// Whether the failure was caused by the request rather than the service.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ServiceError::Simulation(_))
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            ServiceError::Validation(err) => err.violations(),
            _ => &[],
        }
    }
}

#[derive(Debug)]
pub struct PreparedInputs {
    pub params: SimulationParameters,
    pub scenarios: Vec<Scenario>,
    pub fund_to_ticker: BTreeMap<String, String>,
    pub inline_prices: StaticPriceSource,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportInputs {
    #[serde(flatten)]
    pub parameters: SimulationParameters,
    pub fund_to_ticker: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ValidationStatus {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub inputs: ReportInputs,
    pub fetch_window: Option<FetchWindow>,
    pub validation: ValidationStatus,
    pub simulation_results: Vec<ScenarioOutcome>,
    pub skipped_scenarios: Vec<SkippedScenario>,
    pub monthly_draw_schedule: Vec<DrawScheduleRow>,
}

/// Checks required fields and resolves every fund name the catalog knows.
/// Unknown names stay without a ticker so validation can report them.
pub fn prepare_simulation_inputs(
    request: SimulationRequest,
    catalog: &FundCatalog,
) -> Result<PreparedInputs, ServiceError> {
    let SimulationRequest {
        simulation_scenarios,
        start_year,
        end_year,
        annual_draw_rate,
        initial_corpus,
        inflation_rate,
        price_data,
    } = request;

    let missing = [
        ("simulation_scenarios", simulation_scenarios.is_none()),
        ("start_year", start_year.is_none()),
        ("end_year", end_year.is_none()),
        ("annual_draw_rate", annual_draw_rate.is_none()),
        ("initial_corpus", initial_corpus.is_none()),
        ("inflation_rate", inflation_rate.is_none()),
    ]
    .into_iter()
    .filter_map(|(field, absent)| absent.then_some(field))
    .collect::<Vec<_>>();

    let (
        Some(raw_scenarios),
        Some(start_year),
        Some(end_year),
        Some(annual_draw_rate),
        Some(initial_corpus),
        Some(inflation_rate),
    ) = (
        simulation_scenarios,
        start_year,
        end_year,
        annual_draw_rate,
        initial_corpus,
        inflation_rate,
    )
    else {
        return Err(ServiceError::MissingFields(missing));
    };

    let params = SimulationParameters {
        start_year,
        end_year,
        annual_draw_rate,
        initial_corpus,
        inflation_rate,
    };

    let mut fund_to_ticker = BTreeMap::new();
    let scenarios = raw_scenarios
        .into_iter()
        .map(|raw| Scenario {
            strategy_type: raw.strategy_type.as_deref().and_then(StrategyType::parse),
            funds: raw
                .funds
                .into_iter()
                .map(|fund| {
                    let ticker = fund
                        .name
                        .as_deref()
                        .and_then(|name| catalog.ticker_for(name))
                        .map(str::to_string);
                    if let (Some(name), Some(ticker)) = (&fund.name, &ticker) {
                        fund_to_ticker.insert(name.clone(), ticker.clone());
                    }
                    FundAllocation {
                        name: fund.name,
                        ticker,
                        weight: fund.weight,
                    }
                })
                .collect(),
        })
        .collect::<Vec<_>>();

    info!(
        start_year,
        end_year,
        initial_corpus,
        annual_draw_rate,
        inflation_rate,
        scenarios = scenarios.len(),
        "simulation inputs prepared"
    );

    Ok(PreparedInputs {
        params,
        scenarios,
        fund_to_ticker,
        inline_prices: price_data.map(StaticPriceSource::from).unwrap_or_default(),
    })
}

/// Runs one request end to end. Nothing is simulated unless every
/// validation stage passes.
pub fn run_simulation(
    request: SimulationRequest,
    catalog: &FundCatalog,
    source: &dyn PriceSource,
    today: NaiveDate,
) -> Result<SimulationReport, ServiceError> {
    let prepared = prepare_simulation_inputs(request, catalog)?;
    let params = prepared.params;

    let fetch_window = FetchWindow::for_years(params.start_year, params.end_year, today);
    let prices = match &fetch_window {
        Some(window) => {
            let layered = LayeredSource::new(&prepared.inline_prices, source);
            fetch_price_table(
                &layered,
                prepared.fund_to_ticker.values().map(String::as_str),
                window,
            )
        }
        None => Default::default(),
    };

    run_all_validations(&params, &prepared.scenarios, catalog, &prices)?;
    let output = run_strategy_simulations(&prepared.scenarios, &prices, &params)?;

    info!(
        simulated = output.outcomes.len(),
        skipped = output.skipped.len(),
        "all simulations complete"
    );

    Ok(SimulationReport {
        inputs: ReportInputs {
            parameters: params,
            fund_to_ticker: prepared.fund_to_ticker,
        },
        fetch_window,
        validation: ValidationStatus { status: "passed" },
        simulation_results: output.outcomes,
        skipped_scenarios: output.skipped,
        monthly_draw_schedule: monthly_draw_schedule(&params),
    })
}
