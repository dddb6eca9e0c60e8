mod engine;
mod error;
mod types;
mod validation;

pub use engine::{
    inflation_adjusted_annual_draw, monthly_draw_schedule, run_strategy_simulations,
    simulate_rebalancing, simulate_single_fund,
};
pub use error::{SimulationError, ValidationError, Violation, ViolationKind};
pub use types::{
    ClosingPriceSeries, DrawScheduleRow, FundAllocation, MonthlyResultRow, MonthlyReturns,
    PricePoint, PriceTable, Scenario, ScenarioOutcome, ScenarioSummary, SimulationOutput,
    SimulationParameters, SkippedScenario, StrategyType, YearMonth, parse_price_date,
};
pub use validation::{
    MAX_SIMULATION_YEARS, TickerLookup, run_all_validations, validate_scenario, validate_simulation_parameters,
    validate_single_fund_date_range,
};
