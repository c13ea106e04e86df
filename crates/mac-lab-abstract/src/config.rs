use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Propagation model applied by the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropagationKind {
    /// Collisions are the only corruption source.
    Original,
    /// Distance-dependent channel corruption on top of collisions.
    Realistic,
}

impl fmt::Display for PropagationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropagationKind::Original => write!(f, "original"),
            PropagationKind::Realistic => write!(f, "realistic"),
        }
    }
}

impl FromStr for PropagationKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(PropagationKind::Original),
            "realistic" => Ok(PropagationKind::Realistic),
            other => Err(ConfigError::Invalid(format!(
                "unknown propagation model '{other}' (expected 'original' or 'realistic')"
            ))),
        }
    }
}

/// Medium-access variant run by every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulatorKind {
    /// Pure ALOHA: no carrier sensing at all.
    Aloha,
    /// Sense the channel, transmit as soon as it goes quiet.
    Trivial,
    /// p-persistent carrier sensing.
    Simple,
}

impl fmt::Display for SimulatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulatorKind::Aloha => write!(f, "aloha"),
            SimulatorKind::Trivial => write!(f, "trivial"),
            SimulatorKind::Simple => write!(f, "simple"),
        }
    }
}

impl FromStr for SimulatorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aloha" => Ok(SimulatorKind::Aloha),
            "trivial" => Ok(SimulatorKind::Trivial),
            "simple" => Ok(SimulatorKind::Simple),
            other => Err(ConfigError::Invalid(format!(
                "unknown simulator '{other}' (expected 'aloha', 'trivial' or 'simple')"
            ))),
        }
    }
}

/// Spec of one random draw source, as written in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "distribution", rename_all = "lowercase")]
pub enum DistributionSpec {
    Constant { value: f64 },
    /// Uniform in `[min, max)`.
    Uniform { min: f64, max: f64 },
    /// Exponential with the given mean (rate `1 / mean`).
    Exponential { mean: f64 },
}

impl DistributionSpec {
    /// Mean of the distribution.
    pub fn mean(&self) -> f64 {
        match *self {
            DistributionSpec::Constant { value } => value,
            DistributionSpec::Uniform { min, max } => (min + max) / 2.0,
            DistributionSpec::Exponential { mean } => mean,
        }
    }

    /// Events per second implied by the mean, used for the `{lambda}`
    /// placeholder in the output file name.
    pub fn rate(&self) -> f64 {
        1.0 / self.mean()
    }

    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        match *self {
            DistributionSpec::Constant { value } => {
                if value < 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "{field}: constant value must be non-negative, got {value}"
                    )));
                }
            }
            DistributionSpec::Uniform { min, max } => {
                if min < 0.0 || min >= max {
                    return Err(ConfigError::Invalid(format!(
                        "{field}: uniform bounds must satisfy 0 <= min < max, got [{min}, {max})"
                    )));
                }
            }
            DistributionSpec::Exponential { mean } => {
                if mean <= 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "{field}: exponential mean must be positive, got {mean}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// The `simulation` table of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Simulated horizon in seconds.
    pub duration: f64,
    pub seed: u64,
    /// Node positions as `[x, y]` pairs in metres.
    pub nodes: Vec<[f64; 2]>,
    /// Transmission range in metres; nodes farther apart do not hear each other.
    pub range: f64,
    pub propagation: PropagationKind,
    pub simulator: SimulatorKind,
    /// Required for the `simple` simulator, ignored by the others.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<f64>,
    /// Output CSV path, possibly containing `{propagation}`, `{simulator}`,
    /// `{persistence}`, `{lambda}` and `{seed}` placeholders.
    pub output: String,
    /// Transmission speed in bits per second.
    pub datarate: f64,
    /// Queue capacity in packets; 0 means unbounded.
    pub queue: usize,
    pub interarrival: DistributionSpec,
    pub size: DistributionSpec,
    pub processing: DistributionSpec,
    /// Largest frame a node may send, in bytes.
    pub maxsize: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    simulation: SimulationConfig,
}

impl SimulationConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parse a configuration, stripping `//` and `/* */` comments first.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let stripped = strip_comments(text);
        let file: ConfigFile = serde_json::from_str(&stripped)?;
        file.simulation.validate()?;
        Ok(file.simulation)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.duration <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "duration must be positive, got {}",
                self.duration
            )));
        }
        if self.nodes.is_empty() {
            return Err(ConfigError::Invalid("at least one node is required".into()));
        }
        if self.range <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "range must be positive, got {}",
                self.range
            )));
        }
        if self.datarate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "datarate must be positive, got {}",
                self.datarate
            )));
        }
        if self.maxsize == 0 {
            return Err(ConfigError::Invalid("maxsize must be positive".into()));
        }
        match (self.simulator, self.persistence) {
            (SimulatorKind::Simple, None) => {
                return Err(ConfigError::Invalid(
                    "the 'simple' simulator requires a persistence value".into(),
                ));
            }
            (SimulatorKind::Simple, Some(p)) if !(0.0..=1.0).contains(&p) => {
                return Err(ConfigError::Invalid(format!(
                    "persistence must be in [0, 1], got {p}"
                )));
            }
            _ => {}
        }
        self.interarrival.validate("interarrival")?;
        if self.interarrival.mean() <= 0.0 {
            return Err(ConfigError::Invalid(
                "interarrival: mean inter-arrival time must be positive".into(),
            ));
        }
        self.size.validate("size")?;
        self.processing.validate("processing")?;
        Ok(())
    }

    /// Effective p-persistence: `aloha` and `trivial` always run with 0.
    pub fn effective_persistence(&self) -> f64 {
        match self.simulator {
            SimulatorKind::Simple => self.persistence.unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Resolve the output path template for this run.
    ///
    /// `aloha` and `trivial` runs drop the `.{persistence}` component
    /// entirely, so their file names carry one field less.
    pub fn output_path(&self) -> String {
        let mut path = self.output.clone();
        match (self.simulator, self.persistence) {
            (SimulatorKind::Simple, Some(p)) => {
                path = path.replace("{persistence}", &format!("{p}"));
            }
            _ => {
                path = path.replace(".{persistence}", "");
                path = path.replace("{persistence}", "");
            }
        }
        path.replace("{propagation}", &self.propagation.to_string())
            .replace("{simulator}", &self.simulator.to_string())
            .replace("{lambda}", &format!("{}", self.interarrival.rate()))
            .replace("{seed}", &self.seed.to_string())
    }
}

/// Optional overrides taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverride {
    pub propagation: Option<PropagationKind>,
    pub simulator: Option<SimulatorKind>,
    pub persistence: Option<f64>,
    pub output: Option<String>,
}

impl ConfigOverride {
    pub fn apply_to(&self, config: &mut SimulationConfig) {
        if let Some(v) = self.propagation {
            config.propagation = v;
        }
        if let Some(v) = self.simulator {
            config.simulator = v;
        }
        if let Some(v) = self.persistence {
            config.persistence = Some(v);
        }
        if let Some(v) = &self.output {
            config.output = v.clone();
        }
    }
}

/// Remove `//` line comments and `/* */` block comments, leaving string
/// literals untouched.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' => match chars.peek() {
                Some('/') => {
                    while let Some(&next) = chars.peek() {
                        if next == '\n' {
                            break;
                        }
                        chars.next();
                    }
                }
                Some('*') => {
                    chars.next();
                    let mut prev = '\0';
                    for next in chars.by_ref() {
                        if prev == '*' && next == '/' {
                            break;
                        }
                        prev = next;
                    }
                }
                _ => out.push(c),
            },
            _ => out.push(c),
        }
    }
    out
}
