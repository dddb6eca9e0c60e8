use tracing::{debug, warn};

use super::error::SimulationError;
use super::types::{
    DrawScheduleRow, FundAllocation, MonthlyResultRow, MonthlyReturns, PriceTable, Scenario,
    ScenarioOutcome, ScenarioSummary, SimulationOutput, SimulationParameters, SkippedScenario,
    StrategyType, YearMonth,
};

#[derive(Debug)]
struct FundTrack<'a> {
    name: &'a str,
    weight: f64,
    returns: MonthlyReturns,
}

/// Nominal withdrawal for calendar `year`.
///
/// Always scaled from the initial corpus and draw rate, never from the
/// realized corpus.
pub fn inflation_adjusted_annual_draw(params: &SimulationParameters, year: i32) -> f64 {
    params.initial_corpus
        * params.annual_draw_rate
        * (1.0 + params.inflation_rate).powi(year - params.start_year)
}

pub fn monthly_draw_schedule(params: &SimulationParameters) -> Vec<DrawScheduleRow> {
    YearMonth::range(params.start_year, params.end_year)
        .map(|ym| DrawScheduleRow {
            year_month: ym,
            monthly_draw: inflation_adjusted_annual_draw(params, ym.year) / 12.0,
        })
        .collect()
}

fn track_fund<'a>(
    fund: &'a FundAllocation,
    prices: &PriceTable,
) -> Result<FundTrack<'a>, SimulationError> {
    let name = fund.display_name();
    let ticker = fund
        .ticker
        .as_deref()
        .ok_or_else(|| SimulationError::MissingTicker {
            fund: name.to_string(),
        })?;
    let series = prices
        .get(ticker)
        .ok_or_else(|| SimulationError::MissingPriceSeries {
            ticker: ticker.to_string(),
        })?;

    Ok(FundTrack {
        name,
        weight: fund.weight.unwrap_or(1.0),
        returns: series.monthly_returns(),
    })
}

/// One fund, drawn down every month by a twelfth of the year's draw.
pub fn simulate_single_fund(
    scenario: &Scenario,
    prices: &PriceTable,
    params: &SimulationParameters,
) -> Result<Vec<MonthlyResultRow>, SimulationError> {
    let [fund] = scenario.funds.as_slice() else {
        return Err(SimulationError::FundCount {
            strategy: "Single Fund Strategy",
            expected: "exactly 1",
            actual: scenario.funds.len(),
        });
    };
    let track = track_fund(fund, prices)?;

    let mut rows = Vec::new();
    let mut corpus = params.initial_corpus;
    for ym in YearMonth::range(params.start_year, params.end_year) {
        let monthly_return = track.returns.at(ym);
        let monthly_draw = inflation_adjusted_annual_draw(params, ym.year) / 12.0;
        let starting_corpus = corpus;
        let corpus_after_growth = starting_corpus * (1.0 + monthly_return);
        corpus = corpus_after_growth - monthly_draw;

        rows.push(MonthlyResultRow {
            year_month: ym,
            starting_corpus,
            monthly_return,
            monthly_draw,
            corpus_after_growth,
            ending_corpus: corpus,
        });
    }
    Ok(rows)
}

/// Several funds left to drift with their own returns. Each December the
/// year's full draw is withdrawn and the remainder is reset to target weights.
pub fn simulate_rebalancing(
    scenario: &Scenario,
    prices: &PriceTable,
    params: &SimulationParameters,
) -> Result<Vec<MonthlyResultRow>, SimulationError> {
    if scenario.funds.len() < 2 {
        return Err(SimulationError::FundCount {
            strategy: "Rebalancing Strategy",
            expected: "at least 2",
            actual: scenario.funds.len(),
        });
    }

    let tracks = scenario
        .funds
        .iter()
        .map(|fund| {
            if fund.weight.is_none() {
                return Err(SimulationError::MissingWeight {
                    fund: fund.display_name().to_string(),
                });
            }
            track_fund(fund, prices)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut holdings = tracks
        .iter()
        .map(|t| params.initial_corpus * t.weight)
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for ym in YearMonth::range(params.start_year, params.end_year) {
        let starting_corpus: f64 = holdings.iter().sum();
        let mut corpus_after_growth = 0.0;
        let mut weighted_return = 0.0;

        for (holding, track) in holdings.iter_mut().zip(&tracks) {
            let r = track.returns.at(ym);
            weighted_return += *holding * r;
            *holding *= 1.0 + r;
            corpus_after_growth += *holding;
        }

        let monthly_return = if starting_corpus != 0.0 {
            weighted_return / starting_corpus
        } else {
            0.0
        };

        let mut monthly_draw = 0.0;
        if ym.is_december() {
            let annual_draw = inflation_adjusted_annual_draw(params, ym.year);
            monthly_draw = annual_draw / 12.0;
            let remaining = corpus_after_growth - annual_draw;
            for (holding, track) in holdings.iter_mut().zip(&tracks) {
                *holding = remaining * track.weight;
            }
            debug!(
                year = ym.year,
                annual_draw,
                remaining,
                funds = ?tracks.iter().map(|t| t.name).collect::<Vec<_>>(),
                "december withdrawal and rebalance"
            );
        }

        rows.push(MonthlyResultRow {
            year_month: ym,
            starting_corpus,
            monthly_return,
            monthly_draw,
            corpus_after_growth,
            ending_corpus: holdings.iter().sum(),
        });
    }
    Ok(rows)
}

fn summarize(rows: &[MonthlyResultRow], initial_corpus: f64) -> ScenarioSummary {
    let final_corpus = rows.last().map_or(initial_corpus, |r| r.ending_corpus);
    let lowest_corpus = rows
        .iter()
        .map(|r| r.ending_corpus)
        .fold(initial_corpus, f64::min);
    let total_drawn = rows
        .iter()
        .map(|r| r.corpus_after_growth - r.ending_corpus)
        .sum();
    let depleted_in = rows
        .iter()
        .find(|r| r.ending_corpus < 0.0)
        .map(|r| r.year_month);

    ScenarioSummary {
        months: rows.len(),
        final_corpus,
        lowest_corpus,
        total_drawn,
        depleted_in,
    }
}

/// Simulates every scenario in order.
///
/// Scenarios with a missing or unrecognized strategy type are skipped and
/// recorded in [`SimulationOutput::skipped`]. Any engine error aborts the
/// whole batch.
pub fn run_strategy_simulations(
    scenarios: &[Scenario],
    prices: &PriceTable,
    params: &SimulationParameters,
) -> Result<SimulationOutput, SimulationError> {
    let mut output = SimulationOutput::default();

    for (i, scenario) in scenarios.iter().enumerate() {
        let index = i + 1;
        let (strategy_type, rows) = match &scenario.strategy_type {
            Some(kind @ StrategyType::SingleFund) => {
                (kind.clone(), simulate_single_fund(scenario, prices, params)?)
            }
            Some(kind @ StrategyType::Rebalancing) => {
                (kind.clone(), simulate_rebalancing(scenario, prices, params)?)
            }
            Some(StrategyType::Unrecognized(label)) => {
                warn!(scenario = index, strategy_type = %label, "unknown strategy type, skipping scenario");
                output.skipped.push(SkippedScenario {
                    index,
                    strategy_type: Some(label.clone()),
                    reason: format!("Unknown strategy type '{label}'"),
                });
                continue;
            }
            None => {
                warn!(scenario = index, "scenario has no strategy type, skipping");
                output.skipped.push(SkippedScenario {
                    index,
                    strategy_type: None,
                    reason: "Missing strategy type".to_string(),
                });
                continue;
            }
        };

        let label = format!("Scenario {index}: {strategy_type}");
        let funds = scenario
            .funds
            .iter()
            .map(|f| f.display_name().to_string())
            .collect::<Vec<_>>();
        let legend_label = format!("{label} ({})", funds.join(", "));
        let summary = summarize(&rows, params.initial_corpus);

        debug!(
            scenario = %label,
            months = summary.months,
            final_corpus = summary.final_corpus,
            "scenario simulated"
        );

        output.outcomes.push(ScenarioOutcome {
            label,
            legend_label,
            strategy_type,
            funds,
            rows,
            summary,
        });
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ClosingPriceSeries, PricePoint};
    use chrono::NaiveDate;
    use proptest::prelude::{prop_assert, proptest};
    use proptest::collection::vec as prop_vec;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn params() -> SimulationParameters {
        SimulationParameters {
            start_year: 2020,
            end_year: 2021,
            annual_draw_rate: 0.04,
            initial_corpus: 100_000.0,
            inflation_rate: 0.02,
        }
    }

    /// Series starting in December of the year before `start_year`, one
    /// close per month.
    fn series_from_closes(start_year: i32, closes: &[f64]) -> ClosingPriceSeries {
        let mut points = Vec::with_capacity(closes.len());
        let mut year = start_year - 1;
        let mut month = 12;
        for close in closes {
            points.push(PricePoint {
                date: NaiveDate::from_ymd_opt(year, month, 1).expect("valid date"),
                close: *close,
            });
            month += 1;
            if month > 12 {
                month = 1;
                year += 1;
            }
        }
        ClosingPriceSeries::new(points)
    }

    fn flat_series(start_year: i32, months: usize) -> ClosingPriceSeries {
        series_from_closes(start_year, &vec![100.0; months + 1])
    }

    fn fund(name: &str, ticker: &str, weight: Option<f64>) -> FundAllocation {
        FundAllocation {
            name: Some(name.to_string()),
            ticker: Some(ticker.to_string()),
            weight,
        }
    }

    fn single_scenario(ticker: &str) -> Scenario {
        Scenario {
            strategy_type: Some(StrategyType::SingleFund),
            funds: vec![fund("Fund", ticker, None)],
        }
    }

    fn rebalancing_scenario(weights: &[(&str, f64)]) -> Scenario {
        Scenario {
            strategy_type: Some(StrategyType::Rebalancing),
            funds: weights
                .iter()
                .map(|(ticker, w)| fund(ticker, ticker, Some(*w)))
                .collect(),
        }
    }

    fn assert_continuity(rows: &[MonthlyResultRow]) {
        for pair in rows.windows(2) {
            assert_eq!(pair[0].ending_corpus, pair[1].starting_corpus);
        }
    }

    #[test]
    fn draw_is_rebased_on_initial_corpus() {
        let p = params();
        assert_approx(inflation_adjusted_annual_draw(&p, 2020), 4_000.0);
        assert_approx(inflation_adjusted_annual_draw(&p, 2021), 4_080.0);
        assert_approx(inflation_adjusted_annual_draw(&p, 2023), 4_000.0 * 1.02f64.powi(3));
    }

    #[test]
    fn draw_schedule_has_one_row_per_month() {
        let schedule = monthly_draw_schedule(&params());
        assert_eq!(schedule.len(), 24);
        assert_approx(schedule[0].monthly_draw, 4_000.0 / 12.0);
        assert_approx(schedule[23].monthly_draw, 340.0);
        assert_eq!(schedule[12].year_month, YearMonth::new(2021, 1));
    }

    #[test]
    fn single_fund_flat_prices_match_worked_example() {
        let prices = PriceTable::from([("FLAT".to_string(), flat_series(2020, 24))]);
        let rows = simulate_single_fund(&single_scenario("FLAT"), &prices, &params())
            .expect("simulates");

        assert_eq!(rows.len(), 24);
        assert_eq!(rows[0].year_month.to_string(), "2020-01");
        assert_eq!(rows[23].year_month.to_string(), "2021-12");
        for row in &rows[..12] {
            assert_approx(row.monthly_draw, 333.333_333_333);
        }
        for row in &rows[12..] {
            assert_approx(row.monthly_draw, 340.0);
        }
        for row in &rows {
            assert_eq!(row.monthly_return, 0.0);
            assert_eq!(row.corpus_after_growth, row.starting_corpus);
            assert!(row.ending_corpus < row.starting_corpus);
        }
        assert_continuity(&rows);
        assert_approx(rows[23].ending_corpus, 100_000.0 - 4_000.0 - 4_080.0);
    }

    #[test]
    fn single_fund_zero_return_zero_draw_holds_corpus_exactly() {
        let mut p = params();
        p.annual_draw_rate = 0.0;
        let prices = PriceTable::from([("FLAT".to_string(), flat_series(2020, 24))]);
        let rows = simulate_single_fund(&single_scenario("FLAT"), &prices, &p).expect("simulates");
        for row in rows {
            assert_eq!(row.ending_corpus, p.initial_corpus);
        }
    }

    #[test]
    fn single_fund_applies_growth_before_draw() {
        let mut p = params();
        p.end_year = 2020;
        let prices = PriceTable::from([(
            "UP".to_string(),
            series_from_closes(2020, &[100.0, 110.0]),
        )]);
        let rows = simulate_single_fund(&single_scenario("UP"), &prices, &p).expect("simulates");
        assert_approx(rows[0].monthly_return, 0.1);
        assert_approx(rows[0].corpus_after_growth, 110_000.0);
        assert_approx(rows[0].ending_corpus, 110_000.0 - 4_000.0 / 12.0);
        // Series stops after January; later months are flat.
        assert_eq!(rows[1].monthly_return, 0.0);
    }

    #[test]
    fn missing_month_is_a_zero_return_not_a_skip() {
        let mut p = params();
        p.end_year = 2020;
        p.annual_draw_rate = 0.0;
        let mut series = flat_series(2020, 12).points().to_vec();
        series.retain(|pt| pt.date != NaiveDate::from_ymd_opt(2020, 3, 1).expect("date"));
        for pt in series.iter_mut() {
            if pt.date == NaiveDate::from_ymd_opt(2020, 4, 1).expect("date") {
                pt.close = 120.0;
            }
        }
        let prices = PriceTable::from([("GAP".to_string(), ClosingPriceSeries::new(series))]);
        let rows = simulate_single_fund(&single_scenario("GAP"), &prices, &p).expect("simulates");

        assert_eq!(rows.len(), 12);
        assert_eq!(rows[2].year_month, YearMonth::new(2020, 3));
        assert_eq!(rows[2].monthly_return, 0.0);
        assert_approx(rows[3].monthly_return, 0.2);
    }

    #[test]
    fn single_fund_rejects_wrong_fund_count_and_missing_series() {
        let prices = PriceTable::new();
        let err = simulate_single_fund(&single_scenario("NONE"), &prices, &params())
            .expect_err("no series");
        assert_eq!(
            err,
            SimulationError::MissingPriceSeries {
                ticker: "NONE".to_string()
            }
        );

        let empty = Scenario {
            strategy_type: Some(StrategyType::SingleFund),
            funds: Vec::new(),
        };
        assert!(matches!(
            simulate_single_fund(&empty, &prices, &params()),
            Err(SimulationError::FundCount { actual: 0, .. })
        ));
    }

    #[test]
    fn rebalancing_draws_only_in_december() {
        let prices = PriceTable::from([
            ("A".to_string(), flat_series(2020, 24)),
            ("B".to_string(), flat_series(2020, 24)),
        ]);
        let rows = simulate_rebalancing(
            &rebalancing_scenario(&[("A", 0.6), ("B", 0.4)]),
            &prices,
            &params(),
        )
        .expect("simulates");

        assert_eq!(rows.len(), 24);
        for row in &rows {
            if row.year_month.is_december() {
                assert!(row.monthly_draw > 0.0);
                assert_approx(
                    row.corpus_after_growth - row.ending_corpus,
                    row.monthly_draw * 12.0,
                );
            } else {
                assert_eq!(row.monthly_draw, 0.0);
                assert_eq!(row.ending_corpus, row.corpus_after_growth);
            }
        }
        assert_continuity(&rows);
        assert_approx(rows[11].ending_corpus, 96_000.0);
        assert_approx(rows[23].ending_corpus, 96_000.0 - 4_080.0);
    }

    #[test]
    fn rebalancing_resets_holdings_to_target_weights_after_december() {
        let mut p = params();
        p.start_year = 2020;
        p.end_year = 2021;
        // A doubles in June 2020 so holdings drift; B jumps 10% in January 2021.
        let mut a = vec![100.0; 25];
        for close in a.iter_mut().skip(6) {
            *close = 200.0;
        }
        let mut b = vec![100.0; 25];
        for close in b.iter_mut().skip(13) {
            *close = 110.0;
        }
        let prices = PriceTable::from([
            ("A".to_string(), series_from_closes(2020, &a)),
            ("B".to_string(), series_from_closes(2020, &b)),
        ]);
        let rows = simulate_rebalancing(&rebalancing_scenario(&[("A", 0.7), ("B", 0.3)]), &prices, &p)
            .expect("simulates");

        assert_approx(rows[5].monthly_return, 0.7);
        // January 2021: only B moves, so the portfolio return is B's target weight times 10%.
        assert_eq!(rows[12].year_month, YearMonth::new(2021, 1));
        assert_approx(rows[12].monthly_return, 0.3 * 0.1);
    }

    #[test]
    fn rebalancing_reports_zero_return_for_empty_portfolio() {
        let mut p = params();
        p.annual_draw_rate = 1.0;
        p.inflation_rate = 0.0;
        let prices = PriceTable::from([
            ("A".to_string(), flat_series(2020, 24)),
            ("B".to_string(), flat_series(2020, 24)),
        ]);
        let rows = simulate_rebalancing(&rebalancing_scenario(&[("A", 0.5), ("B", 0.5)]), &prices, &p)
            .expect("simulates");
        assert_eq!(rows[12].starting_corpus, 0.0);
        assert_eq!(rows[12].monthly_return, 0.0);
        assert!(rows[23].ending_corpus < 0.0);
    }

    #[test]
    fn rebalancing_requires_weights() {
        let prices = PriceTable::from([
            ("A".to_string(), flat_series(2020, 24)),
            ("B".to_string(), flat_series(2020, 24)),
        ]);
        let scenario = Scenario {
            strategy_type: Some(StrategyType::Rebalancing),
            funds: vec![fund("A", "A", Some(0.5)), fund("B", "B", None)],
        };
        assert_eq!(
            simulate_rebalancing(&scenario, &prices, &params()),
            Err(SimulationError::MissingWeight {
                fund: "B".to_string()
            })
        );
    }

    #[test]
    fn orchestrator_labels_by_position_and_skips_unknown_types() {
        let prices = PriceTable::from([
            ("A".to_string(), flat_series(2020, 24)),
            ("B".to_string(), flat_series(2020, 24)),
        ]);
        let scenarios = vec![
            single_scenario("A"),
            Scenario {
                strategy_type: Some(StrategyType::Unrecognized("Momentum".to_string())),
                funds: vec![fund("A", "A", None)],
            },
            rebalancing_scenario(&[("A", 0.5), ("B", 0.5)]),
        ];

        let output = run_strategy_simulations(&scenarios, &prices, &params()).expect("runs");
        assert_eq!(
            output.labels().collect::<Vec<_>>(),
            vec![
                "Scenario 1: Single Fund Strategy",
                "Scenario 3: Rebalancing Strategy"
            ]
        );
        assert_eq!(output.skipped.len(), 1);
        assert_eq!(output.skipped[0].index, 2);
        assert_eq!(output.skipped[0].strategy_type.as_deref(), Some("Momentum"));

        let rebalanced = output
            .get("Scenario 3: Rebalancing Strategy")
            .expect("present");
        assert_eq!(rebalanced.legend_label, "Scenario 3: Rebalancing Strategy (A, B)");
        assert_eq!(rebalanced.rows.len(), 24);
    }

    #[test]
    fn orchestrator_aborts_batch_on_engine_error() {
        let prices = PriceTable::from([("A".to_string(), flat_series(2020, 24))]);
        let scenarios = vec![single_scenario("A"), single_scenario("MISSING")];
        assert!(run_strategy_simulations(&scenarios, &prices, &params()).is_err());
    }

    #[test]
    fn summary_tracks_draws_and_depletion() {
        let mut p = params();
        p.initial_corpus = 96_000.0;
        p.annual_draw_rate = 0.75;
        p.inflation_rate = 0.0;
        let prices = PriceTable::from([("A".to_string(), flat_series(2020, 24))]);
        let output =
            run_strategy_simulations(&[single_scenario("A")], &prices, &p).expect("runs");
        let summary = output.outcomes[0].summary;
        assert_eq!(summary.months, 24);
        assert_approx(summary.total_drawn, 144_000.0);
        assert_approx(summary.final_corpus, -48_000.0);
        assert_eq!(summary.lowest_corpus, summary.final_corpus);
        // 6_000 a month empties 96_000 after 16 months.
        assert_eq!(summary.depleted_in, Some(YearMonth::new(2021, 5)));
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_corpus_is_continuous_across_months(
            closes in prop_vec(50u32..200, 25),
            other in prop_vec(50u32..200, 25),
            weight_bp in 1u32..10_000,
            draw_bp in 0u32..2_000,
            inflation_bp in 0u32..1_000
        ) {
            let mut p = params();
            p.annual_draw_rate = draw_bp as f64 / 10_000.0;
            p.inflation_rate = inflation_bp as f64 / 10_000.0;
            let a = closes.iter().map(|c| *c as f64).collect::<Vec<_>>();
            let b = other.iter().map(|c| *c as f64).collect::<Vec<_>>();
            let prices = PriceTable::from([
                ("A".to_string(), series_from_closes(2020, &a)),
                ("B".to_string(), series_from_closes(2020, &b)),
            ]);
            let w = weight_bp as f64 / 10_000.0;
            let scenarios = vec![
                single_scenario("A"),
                rebalancing_scenario(&[("A", w), ("B", 1.0 - w)]),
            ];

            let output = run_strategy_simulations(&scenarios, &prices, &p).expect("runs");
            for outcome in &output.outcomes {
                prop_assert!(outcome.rows.len() == 24);
                prop_assert!(outcome.rows[0].starting_corpus == p.initial_corpus
                    || (outcome.rows[0].starting_corpus - p.initial_corpus).abs() < EPS);
                for pair in outcome.rows.windows(2) {
                    prop_assert!(pair[0].ending_corpus == pair[1].starting_corpus);
                }
            }

            let rebalanced = &output.outcomes[1];
            for row in &rebalanced.rows {
                if !row.year_month.is_december() {
                    prop_assert!(row.monthly_draw == 0.0);
                }
            }
        }
    }
}
