use std::fmt::Display;

use serde::Serialize;

use crate::core::OptimizationParameters;

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct ParameterRange<T> {
    pub default: T,
    pub min: T,
    pub max: T,
    pub step: T,
    pub description: &'static str,
}

impl<T: Copy + PartialOrd + Display> ParameterRange<T> {
    pub fn check(&self, field: &str, value: T) -> Result<T, String> {
        if value >= self.min && value <= self.max {
            Ok(value)
        } else {
            Err(format!(
                "{field} must be between {} and {}, got {value}",
                self.min, self.max
            ))
        }
    }
}

pub const INITIAL_CAPITAL: ParameterRange<f64> = ParameterRange {
    default: 1_000_000.0,
    min: 1_000.0,
    max: 100_000_000.0,
    step: 10_000.0,
    description: "Initial capital/wealth (K₀)",
};

pub const ANNUAL_RETURN: ParameterRange<f64> = ParameterRange {
    default: 0.05,
    min: 0.001,
    max: 0.30,
    step: 0.005,
    description: "Annual return rate (r)",
};

pub const DISCOUNT_RATE: ParameterRange<f64> = ParameterRange {
    default: 0.03,
    min: 0.001,
    max: 0.20,
    step: 0.005,
    description: "Time preference rate (ρ)",
};

pub const RISK_AVERSION: ParameterRange<f64> = ParameterRange {
    default: 2.0,
    min: 0.1,
    max: 10.0,
    step: 0.1,
    description: "CRRA risk aversion coefficient (σ)",
};

pub const LIFE_EXPECTANCY: ParameterRange<u32> = ParameterRange {
    default: 85,
    min: 50,
    max: 120,
    step: 1,
    description: "Expected lifespan (T)",
};

pub const CURRENT_AGE: ParameterRange<u32> = ParameterRange {
    default: 35,
    min: 18,
    max: 100,
    step: 1,
    description: "Current age (t₀)",
};

pub const INHERITANCE_TARGET: ParameterRange<f64> = ParameterRange {
    default: 200_000.0,
    min: 0.0,
    max: 100_000_000.0,
    step: 10_000.0,
    description: "Target bequest (K_T)",
};

#[derive(Debug, Serialize)]
pub struct DefaultsCatalogue {
    pub initial_capital: ParameterRange<f64>,
    pub annual_return: ParameterRange<f64>,
    pub discount_rate: ParameterRange<f64>,
    pub risk_aversion: ParameterRange<f64>,
    pub life_expectancy: ParameterRange<u32>,
    pub current_age: ParameterRange<u32>,
    pub inheritance_target: ParameterRange<f64>,
}

pub const CATALOGUE: DefaultsCatalogue = DefaultsCatalogue {
    initial_capital: INITIAL_CAPITAL,
    annual_return: ANNUAL_RETURN,
    discount_rate: DISCOUNT_RATE,
    risk_aversion: RISK_AVERSION,
    life_expectancy: LIFE_EXPECTANCY,
    current_age: CURRENT_AGE,
    inheritance_target: INHERITANCE_TARGET,
};

pub fn default_parameters() -> OptimizationParameters {
    OptimizationParameters {
        initial_capital: INITIAL_CAPITAL.default,
        annual_return: ANNUAL_RETURN.default,
        discount_rate: DISCOUNT_RATE.default,
        risk_aversion: RISK_AVERSION.default,
        life_expectancy: LIFE_EXPECTANCY.default,
        current_age: CURRENT_AGE.default,
        inheritance_target: INHERITANCE_TARGET.default,
    }
}

/// Range checks applied at the HTTP and CLI boundary, before the engine sees the values.
pub fn validate_bounds(params: &OptimizationParameters) -> Result<(), String> {
    INITIAL_CAPITAL.check("initial_capital", params.initial_capital)?;
    ANNUAL_RETURN.check("annual_return", params.annual_return)?;
    DISCOUNT_RATE.check("discount_rate", params.discount_rate)?;
    RISK_AVERSION.check("risk_aversion", params.risk_aversion)?;
    LIFE_EXPECTANCY.check("life_expectancy", params.life_expectancy)?;
    CURRENT_AGE.check("current_age", params.current_age)?;
    INHERITANCE_TARGET.check("inheritance_target", params.inheritance_target)?;
    if params.life_expectancy <= params.current_age {
        return Err("Life expectancy must be greater than current age".to_string());
    }
    Ok(())
}
