use serde::{Deserialize, Serialize};

use super::solver::SearchOutcome;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationParameters {
    pub initial_capital: f64,
    pub annual_return: f64,
    pub discount_rate: f64,
    pub risk_aversion: f64,
    pub life_expectancy: u32,
    pub current_age: u32,
    pub inheritance_target: f64,
}

impl Default for OptimizationParameters {
    fn default() -> Self {
        Self {
            initial_capital: 1_000_000.0,
            annual_return: 0.05,
            discount_rate: 0.03,
            risk_aversion: 2.0,
            life_expectancy: 85,
            current_age: 35,
            inheritance_target: 200_000.0,
        }
    }
}

/// Closed-form constants derived once per parameter set.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DerivedConstants {
    pub horizon: u32,
    /// β = 1 / (1 + ρ)
    pub beta: f64,
    /// g = (β (1 + r))^(1/σ), the Euler consumption growth multiplier.
    pub growth_rate: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct PeriodState {
    pub period: u32,
    pub age: u32,
    pub wealth: f64,
    pub consumption: f64,
    pub utility: f64,
    pub savings: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Trajectory {
    pub periods: Vec<PeriodState>,
    pub terminal_wealth: f64,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct ConsumptionSummary {
    pub average: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Clone, Debug)]
pub struct OptimizationResult {
    pub initial_consumption: f64,
    pub total_utility: f64,
    /// Periods whose utility was finite and therefore entered `total_utility`.
    pub feasible_periods: usize,
    pub terminal_wealth: f64,
    pub horizon: u32,
    pub beta: f64,
    pub growth_rate: f64,
    pub trajectory: Trajectory,
    pub consumption: ConsumptionSummary,
    pub search: SearchOutcome,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Preview {
    pub initial_consumption: f64,
    pub beta: f64,
    pub growth_rate: f64,
    pub horizon: u32,
    pub search: SearchOutcome,
}
