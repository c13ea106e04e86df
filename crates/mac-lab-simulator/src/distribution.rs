use mac_lab_abstract::{ConfigError, DistributionSpec};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution as _, Exp};

/// Draw source for one configured field (inter-arrival, size, processing).
///
/// Built once from its spec; every draw consumes the shared run RNG, so the
/// whole trajectory is reproducible from the seed.
#[derive(Debug, Clone)]
pub enum Distribution {
    Constant(f64),
    Uniform { min: f64, max: f64 },
    Exponential(Exp<f64>),
}

impl Distribution {
    pub fn from_spec(spec: &DistributionSpec) -> Result<Self, ConfigError> {
        spec_to_distribution(spec)
    }

    /// Exponential with the given mean.
    pub fn exponential(mean: f64) -> Result<Self, ConfigError> {
        let exp = Exp::new(1.0 / mean).map_err(|_| {
            ConfigError::Invalid(format!("exponential mean must be positive, got {mean}"))
        })?;
        Ok(Distribution::Exponential(exp))
    }

    pub fn draw(&self, rng: &mut ChaCha8Rng) -> f64 {
        match self {
            Distribution::Constant(value) => *value,
            Distribution::Uniform { min, max } => rng.random_range(*min..*max),
            Distribution::Exponential(exp) => exp.sample(rng),
        }
    }
}

fn spec_to_distribution(spec: &DistributionSpec) -> Result<Distribution, ConfigError> {
    match *spec {
        DistributionSpec::Constant { value } => Ok(Distribution::Constant(value)),
        DistributionSpec::Uniform { min, max } => {
            if min >= max {
                return Err(ConfigError::Invalid(format!(
                    "uniform bounds must satisfy min < max, got [{min}, {max})"
                )));
            }
            Ok(Distribution::Uniform { min, max })
        }
        DistributionSpec::Exponential { mean } => Distribution::exponential(mean),
    }
}
