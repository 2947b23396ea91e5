mod engine;
mod model;
pub mod solver;
mod types;

pub use engine::{Optimizer, compute_optimization, discounted_utility, summarize_consumption};
pub use model::{crra_utility, is_log_utility};
pub use solver::{SearchOutcome, SearchStrategy, SolverConfig};
pub use types::{
    ConsumptionSummary, DerivedConstants, OptimizationParameters, OptimizationResult,
    PeriodState, Preview, Trajectory,
};
