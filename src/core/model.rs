use crate::error::{OptimizerError, OptimizerResult};

use super::types::{DerivedConstants, OptimizationParameters};

const LOG_UTILITY_ATOL: f64 = 1e-8;
const LOG_UTILITY_RTOL: f64 = 1e-5;

impl OptimizationParameters {
    pub fn horizon(&self) -> Option<u32> {
        self.life_expectancy
            .checked_sub(self.current_age)
            .filter(|&t| t > 0)
    }

    pub fn validate(&self) -> OptimizerResult<()> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(OptimizerError::validation(
                "initial_capital",
                "must be a positive finite amount",
            ));
        }
        if !self.annual_return.is_finite() || self.annual_return <= -1.0 {
            return Err(OptimizerError::validation(
                "annual_return",
                "must be finite and greater than -1",
            ));
        }
        if !self.discount_rate.is_finite() || self.discount_rate <= -1.0 {
            return Err(OptimizerError::validation(
                "discount_rate",
                "must be finite and greater than -1",
            ));
        }
        if !self.risk_aversion.is_finite() || self.risk_aversion <= 0.0 {
            return Err(OptimizerError::validation(
                "risk_aversion",
                "must be a positive finite coefficient",
            ));
        }
        if !self.inheritance_target.is_finite() || self.inheritance_target < 0.0 {
            return Err(OptimizerError::validation(
                "inheritance_target",
                "must be a non-negative finite amount",
            ));
        }
        if self.horizon().is_none() {
            return Err(OptimizerError::validation(
                "life_expectancy",
                "Life expectancy must be greater than current age",
            ));
        }
        Ok(())
    }
}

impl DerivedConstants {
    pub fn from_params(params: &OptimizationParameters) -> OptimizerResult<Self> {
        params.validate()?;
        let horizon = params
            .horizon()
            .ok_or_else(|| OptimizerError::validation("life_expectancy", "non-positive horizon"))?;

        let beta = 1.0 / (1.0 + params.discount_rate);
        let growth_rate = (beta * (1.0 + params.annual_return)).powf(1.0 / params.risk_aversion);
        if !growth_rate.is_finite() || growth_rate <= 0.0 {
            return Err(OptimizerError::Numerical(format!(
                "consumption growth multiplier is {growth_rate}"
            )));
        }

        Ok(Self {
            horizon,
            beta,
            growth_rate,
        })
    }
}

pub fn is_log_utility(risk_aversion: f64) -> bool {
    (risk_aversion - 1.0).abs() <= LOG_UTILITY_ATOL + LOG_UTILITY_RTOL
}

/// CRRA utility. Non-positive consumption maps to `-inf`, the infeasibility sentinel.
pub fn crra_utility(consumption: f64, risk_aversion: f64) -> f64 {
    if consumption <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if is_log_utility(risk_aversion) {
        consumption.ln()
    } else {
        let exponent = 1.0 - risk_aversion;
        consumption.powf(exponent) / exponent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params() -> OptimizationParameters {
        OptimizationParameters::default()
    }

    #[test]
    fn beta_is_inverse_of_one_plus_discount_rate() {
        let constants = DerivedConstants::from_params(&params()).expect("valid params");
        assert_relative_eq!(constants.beta, 1.0 / 1.03, epsilon = 1e-12);
        assert_relative_eq!(constants.beta, 0.970_874, epsilon = 1e-6);
        assert_eq!(constants.horizon, 50);
    }

    #[test]
    fn growth_rate_follows_euler_rule() {
        let constants = DerivedConstants::from_params(&params()).expect("valid params");
        let expected = (1.05_f64 / 1.03).powf(0.5);
        assert_relative_eq!(constants.growth_rate, expected, epsilon = 1e-12);
        assert!((constants.growth_rate - 1.0097).abs() < 1e-3);
    }

    #[test]
    fn growth_rate_direction_tracks_beta_times_gross_return() {
        let mut p = params();
        p.annual_return = 0.02;
        p.discount_rate = 0.05;
        let falling = DerivedConstants::from_params(&p).expect("valid params");
        assert!(falling.growth_rate > 0.0 && falling.growth_rate < 1.0);

        p.annual_return = 0.08;
        let rising = DerivedConstants::from_params(&p).expect("valid params");
        assert!(rising.growth_rate > 1.0);
    }

    #[test]
    fn rejects_non_positive_horizon() {
        let mut p = params();
        p.life_expectancy = 60;
        p.current_age = 65;
        let err = DerivedConstants::from_params(&p).expect_err("horizon must be positive");
        assert!(err.is_validation());

        p.life_expectancy = 65;
        assert!(p.validate().is_err());
    }

    #[test]
    fn rejects_out_of_domain_values() {
        let mut p = params();
        p.risk_aversion = 0.0;
        assert!(p.validate().is_err());

        let mut p = params();
        p.discount_rate = -1.0;
        assert!(p.validate().is_err());

        let mut p = params();
        p.initial_capital = f64::NAN;
        assert!(p.validate().is_err());

        let mut p = params();
        p.inheritance_target = -1.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn log_branch_at_unit_risk_aversion() {
        for c in [0.5, 1.0, 42_000.0] {
            assert_relative_eq!(crra_utility(c, 1.0), c.ln(), epsilon = 1e-12);
        }
        assert!(is_log_utility(0.999_999));
        assert!(is_log_utility(1.000_001));
        assert!(!is_log_utility(1.01));
    }

    #[test]
    fn power_branch_approaches_log_branch_up_to_a_constant() {
        // c^(1-σ)/(1-σ) = 1/(1-σ) + ln c + O(1-σ), so differences between two
        // consumption levels converge to the log difference.
        let (lo, hi) = (20_000.0_f64, 60_000.0_f64);
        let sigma = 1.0 + 2e-5;
        assert!(!is_log_utility(sigma));
        let power_gap = crra_utility(hi, sigma) - crra_utility(lo, sigma);
        let log_gap = crra_utility(hi, 1.000_001) - crra_utility(lo, 1.000_001);
        assert_relative_eq!(power_gap, log_gap, max_relative = 1e-3);
    }

    #[test]
    fn non_positive_consumption_is_infeasible() {
        assert_eq!(crra_utility(0.0, 2.0), f64::NEG_INFINITY);
        assert_eq!(crra_utility(-5.0, 1.0), f64::NEG_INFINITY);
    }

    #[test]
    fn power_utility_matches_closed_form() {
        assert_relative_eq!(crra_utility(50_000.0, 2.0), -1.0 / 50_000.0, epsilon = 1e-15);
    }
}
