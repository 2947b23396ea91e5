use crate::error::{OptimizerError, OptimizerResult};

use super::model::crra_utility;
use super::solver::{SearchOutcome, SolverConfig, find_initial_consumption};
use super::types::{
    ConsumptionSummary, DerivedConstants, OptimizationParameters, OptimizationResult,
    PeriodState, Preview, Trajectory,
};

/// Consumption in any period is capped at this share of wealth on hand.
const MAX_CONSUMPTION_SHARE: f64 = 0.99;

#[derive(Debug, Clone)]
pub struct Optimizer {
    params: OptimizationParameters,
    constants: DerivedConstants,
    solver: SolverConfig,
}

impl Optimizer {
    pub fn new(params: OptimizationParameters) -> OptimizerResult<Self> {
        let constants = DerivedConstants::from_params(&params)?;
        Ok(Self {
            params,
            constants,
            solver: SolverConfig::default(),
        })
    }

    pub fn with_solver_config(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    pub fn params(&self) -> &OptimizationParameters {
        &self.params
    }

    pub fn constants(&self) -> &DerivedConstants {
        &self.constants
    }

    /// Forward simulation of the budget recursion from a candidate initial consumption.
    pub fn simulate(&self, initial_consumption: f64) -> Trajectory {
        let horizon = self.constants.horizon;
        let gross_return = 1.0 + self.params.annual_return;

        let mut wealth = self.params.initial_capital;
        let mut desired = initial_consumption;
        let mut periods = Vec::with_capacity(horizon as usize + 1);

        for t in 0..=horizon {
            let consumption = if wealth > 0.0 {
                desired.min(wealth * MAX_CONSUMPTION_SHARE)
            } else {
                0.0
            };

            periods.push(PeriodState {
                period: t,
                age: self.params.current_age + t,
                wealth,
                consumption,
                utility: crra_utility(consumption, self.params.risk_aversion),
                savings: (wealth - consumption).max(0.0),
            });

            if t < horizon {
                wealth = ((wealth - consumption) * gross_return).max(0.0);
                desired = consumption * self.constants.growth_rate;
            }
        }

        Trajectory {
            periods,
            terminal_wealth: wealth,
        }
    }

    fn terminal_wealth(&self, initial_consumption: f64) -> f64 {
        self.simulate(initial_consumption).terminal_wealth
    }

    pub fn find_optimal_initial_consumption(&self) -> SearchOutcome {
        find_initial_consumption(
            |c1| self.terminal_wealth(c1),
            self.params.initial_capital,
            self.params.inheritance_target,
            &self.solver,
        )
    }

    pub fn preview(&self) -> OptimizerResult<Preview> {
        let search = self.find_optimal_initial_consumption();
        let initial_consumption = checked("initial consumption", search.value())?;
        Ok(Preview {
            initial_consumption,
            beta: self.constants.beta,
            growth_rate: self.constants.growth_rate,
            horizon: self.constants.horizon,
            search,
        })
    }

    pub fn optimize(&self) -> OptimizerResult<OptimizationResult> {
        let search = self.find_optimal_initial_consumption();
        let initial_consumption = checked("initial consumption", search.value())?;
        let trajectory = self.simulate(initial_consumption);

        let (total_utility, feasible_periods) =
            discounted_utility(&trajectory, self.constants.beta);
        let total_utility = checked("total utility", total_utility)?;
        let consumption = summarize_consumption(&trajectory)?;

        tracing::debug!(
            initial_consumption,
            terminal_wealth = trajectory.terminal_wealth,
            target = self.params.inheritance_target,
            converged = search.is_converged(),
            "optimization complete"
        );

        Ok(OptimizationResult {
            initial_consumption,
            total_utility,
            feasible_periods,
            terminal_wealth: checked("terminal wealth", trajectory.terminal_wealth)?,
            horizon: self.constants.horizon,
            beta: self.constants.beta,
            growth_rate: self.constants.growth_rate,
            trajectory,
            consumption,
            search,
        })
    }
}

pub fn compute_optimization(params: OptimizationParameters) -> OptimizerResult<OptimizationResult> {
    Optimizer::new(params)?.optimize()
}

/// `Σ β^t U(c_t)` over periods with finite utility, and how many such periods there were.
pub fn discounted_utility(trajectory: &Trajectory, beta: f64) -> (f64, usize) {
    trajectory
        .periods
        .iter()
        .filter(|p| p.utility.is_finite())
        .fold((0.0, 0), |(sum, count), p| {
            (sum + beta.powi(p.period as i32) * p.utility, count + 1)
        })
}

pub fn summarize_consumption(trajectory: &Trajectory) -> OptimizerResult<ConsumptionSummary> {
    if trajectory.is_empty() {
        return Err(OptimizerError::Numerical("empty trajectory".to_string()));
    }
    let mut total = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for p in &trajectory.periods {
        total += p.consumption;
        min = min.min(p.consumption);
        max = max.max(p.consumption);
    }
    Ok(ConsumptionSummary {
        average: checked("average consumption", total / trajectory.len() as f64)?,
        min,
        max,
    })
}

fn checked(label: &str, value: f64) -> OptimizerResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(OptimizerError::Numerical(format!("{label} is {value}")))
    }
}
