use crate::numerical::optimization::trust_region_subproblem::SubproblemKind;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use toml::{Table, Value};

/// Configuration parameters of the trust region minimizer
#[derive(Debug, Clone, PartialEq)]
pub struct TrustRegionConfig {
    pub initial_radius: f64,     // radius of the first subproblem
    pub min_radius: f64,         // radius collapse below this value stops the run
    pub max_radius: f64,         // upper bound for radius growth
    pub low_ratio: f64,          // actual/predicted below this: reject and shrink
    pub high_ratio: f64,         // above this with a boundary step: grow
    pub shrink_factor: f64,      // radius multiplier on rejection, in (0, 1)
    pub grow_factor: f64,        // radius multiplier on a very successful step, > 1
    pub gradient_tolerance: f64, // ||g||_inf
    pub step_tolerance: f64,     // ||s|| <= stol*(stol + ||x||)
    pub function_tolerance: f64, // |f_old - f_new| of an accepted step
    pub max_iterations: usize,
    pub max_cg_iterations: Option<usize>, // None: problem dimension
    pub cg_relative_tolerance: Option<f64>, // None: min(0.5, sqrt(||g||))
    pub subproblem: SubproblemKind,
}

impl Default for TrustRegionConfig {
    fn default() -> Self {
        Self {
            initial_radius: 1.0,
            min_radius: 1e-18,
            max_radius: 1e4,
            low_ratio: 0.25,
            high_ratio: 0.75,
            shrink_factor: 0.25,
            grow_factor: 2.0,
            gradient_tolerance: 1e-8,
            step_tolerance: 1e-12,
            function_tolerance: 1e-15,
            max_iterations: 500,
            max_cg_iterations: None,
            cg_relative_tolerance: None,
            subproblem: SubproblemKind::DogLeg,
        }
    }
}

/// Invalid combination of configuration parameters
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    NonPositiveRadius { name: &'static str, value: f64 },
    RadiusBounds { min_radius: f64, initial_radius: f64, max_radius: f64 },
    ThresholdOutOfRange { name: &'static str, value: f64 },
    ThresholdOrder { low: f64, high: f64 },
    GrowFactor(f64),
    ShrinkFactor(f64),
    NegativeTolerance { name: &'static str, value: f64 },
    CgTolerance(f64),
    ZeroIterations { name: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::NonPositiveRadius { name, value } => {
                write!(f, "{} must be positive and finite, got {}", name, value)
            }
            ConfigError::RadiusBounds {
                min_radius,
                initial_radius,
                max_radius,
            } => write!(
                f,
                "radius bounds must satisfy min < initial <= max, got {} / {} / {}",
                min_radius, initial_radius, max_radius
            ),
            ConfigError::ThresholdOutOfRange { name, value } => {
                write!(f, "{} must lie in [0, 1], got {}", name, value)
            }
            ConfigError::ThresholdOrder { low, high } => write!(
                f,
                "low ratio threshold {} must be below high threshold {}",
                low, high
            ),
            ConfigError::GrowFactor(v) => write!(f, "grow factor must be > 1, got {}", v),
            ConfigError::ShrinkFactor(v) => {
                write!(f, "shrink factor must lie in (0, 1), got {}", v)
            }
            ConfigError::NegativeTolerance { name, value } => {
                write!(f, "{} must be non-negative and finite, got {}", name, value)
            }
            ConfigError::CgTolerance(v) => {
                write!(f, "CG relative tolerance must lie in (0, 1), got {}", v)
            }
            ConfigError::ZeroIterations { name } => write!(f, "{} must be at least 1", name),
        }
    }
}

impl std::error::Error for ConfigError {}

impl TrustRegionConfig {
    /// Check parameter ranges. Comparisons are written so that NaN fails them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.initial_radius > 0.0 && self.initial_radius.is_finite()) {
            return Err(ConfigError::NonPositiveRadius {
                name: "initial_radius",
                value: self.initial_radius,
            });
        }
        if !(self.max_radius > 0.0) {
            return Err(ConfigError::NonPositiveRadius {
                name: "max_radius",
                value: self.max_radius,
            });
        }
        if !(self.min_radius >= 0.0
            && self.min_radius < self.initial_radius
            && self.initial_radius <= self.max_radius)
        {
            return Err(ConfigError::RadiusBounds {
                min_radius: self.min_radius,
                initial_radius: self.initial_radius,
                max_radius: self.max_radius,
            });
        }
        for (name, value) in [("low_ratio", self.low_ratio), ("high_ratio", self.high_ratio)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }
        if self.low_ratio >= self.high_ratio {
            return Err(ConfigError::ThresholdOrder {
                low: self.low_ratio,
                high: self.high_ratio,
            });
        }
        if !(self.grow_factor > 1.0 && self.grow_factor.is_finite()) {
            return Err(ConfigError::GrowFactor(self.grow_factor));
        }
        if !(self.shrink_factor > 0.0 && self.shrink_factor < 1.0) {
            return Err(ConfigError::ShrinkFactor(self.shrink_factor));
        }
        for (name, value) in [
            ("gradient_tolerance", self.gradient_tolerance),
            ("step_tolerance", self.step_tolerance),
            ("function_tolerance", self.function_tolerance),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(ConfigError::NegativeTolerance { name, value });
            }
        }
        if let Some(eta) = self.cg_relative_tolerance {
            if !(eta > 0.0 && eta < 1.0) {
                return Err(ConfigError::CgTolerance(eta));
            }
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroIterations {
                name: "max_iterations",
            });
        }
        if self.max_cg_iterations == Some(0) {
            return Err(ConfigError::ZeroIterations {
                name: "max_cg_iterations",
            });
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
//                      TOML CONFIGURATION FILES
////////////////////////////////////////////////////////////////////////////////

/// name of the TOML table holding the minimizer settings
pub const CONFIG_SECTION: &str = "trust_region";

/// Errors while reading a configuration document
#[derive(Debug)]
pub enum ConfigFileError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    MissingSection,
    UnknownKey(String),
    InvalidValue { key: String, expected: &'static str },
    Invalid(ConfigError),
}

impl fmt::Display for ConfigFileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigFileError::Io(e) => write!(f, "cannot read configuration file: {}", e),
            ConfigFileError::Parse(e) => write!(f, "malformed TOML: {}", e),
            ConfigFileError::MissingSection => {
                write!(f, "configuration has no [{}] table", CONFIG_SECTION)
            }
            ConfigFileError::UnknownKey(key) => write!(f, "unknown configuration key '{}'", key),
            ConfigFileError::InvalidValue { key, expected } => {
                write!(f, "key '{}' must be {}", key, expected)
            }
            ConfigFileError::Invalid(e) => write!(f, "invalid configuration: {}", e),
        }
    }
}

impl std::error::Error for ConfigFileError {}

impl From<std::io::Error> for ConfigFileError {
    fn from(e: std::io::Error) -> Self {
        ConfigFileError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigFileError {
    fn from(e: toml::de::Error) -> Self {
        ConfigFileError::Parse(e)
    }
}

impl From<ConfigError> for ConfigFileError {
    fn from(e: ConfigError) -> Self {
        ConfigFileError::Invalid(e)
    }
}

fn float_value(key: &str, value: &Value) -> Result<f64, ConfigFileError> {
    match value {
        Value::Float(x) => Ok(*x),
        Value::Integer(i) => Ok(*i as f64),
        _ => Err(ConfigFileError::InvalidValue {
            key: key.to_string(),
            expected: "a number",
        }),
    }
}

fn count_value(key: &str, value: &Value) -> Result<usize, ConfigFileError> {
    value
        .as_integer()
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| ConfigFileError::InvalidValue {
            key: key.to_string(),
            expected: "a non-negative integer",
        })
}

impl TrustRegionConfig {
    /// Parse the `[trust_region]` table of a TOML document. Missing keys keep
    /// their defaults, unknown keys are an error. The result is validated.
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigFileError> {
        let root = Table::from_str(document)?;
        let section = root
            .get(CONFIG_SECTION)
            .and_then(|v| v.as_table())
            .ok_or(ConfigFileError::MissingSection)?;
        let mut config = TrustRegionConfig::default();
        for (key, value) in section {
            match key.as_str() {
                "initial_radius" => config.initial_radius = float_value(key, value)?,
                "min_radius" => config.min_radius = float_value(key, value)?,
                "max_radius" => config.max_radius = float_value(key, value)?,
                "low_ratio" => config.low_ratio = float_value(key, value)?,
                "high_ratio" => config.high_ratio = float_value(key, value)?,
                "shrink_factor" => config.shrink_factor = float_value(key, value)?,
                "grow_factor" => config.grow_factor = float_value(key, value)?,
                "gradient_tolerance" => config.gradient_tolerance = float_value(key, value)?,
                "step_tolerance" => config.step_tolerance = float_value(key, value)?,
                "function_tolerance" => config.function_tolerance = float_value(key, value)?,
                "max_iterations" => config.max_iterations = count_value(key, value)?,
                "max_cg_iterations" => config.max_cg_iterations = Some(count_value(key, value)?),
                "cg_relative_tolerance" => {
                    config.cg_relative_tolerance = Some(float_value(key, value)?)
                }
                "subproblem" => {
                    config.subproblem = value
                        .as_str()
                        .and_then(|s| SubproblemKind::from_str(s).ok())
                        .ok_or_else(|| ConfigFileError::InvalidValue {
                            key: key.clone(),
                            expected: "\"dogleg\" or \"newton_cg\"",
                        })?
                }
                other => return Err(ConfigFileError::UnknownKey(other.to_string())),
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigFileError> {
        let document = fs::read_to_string(path)?;
        Self::from_toml_str(&document)
    }

    /// TOML document with a `[trust_region]` table that `from_toml_str` reads back
    pub fn to_toml_string(&self) -> String {
        let mut section = Table::new();
        let floats = [
            ("initial_radius", self.initial_radius),
            ("min_radius", self.min_radius),
            ("max_radius", self.max_radius),
            ("low_ratio", self.low_ratio),
            ("high_ratio", self.high_ratio),
            ("shrink_factor", self.shrink_factor),
            ("grow_factor", self.grow_factor),
            ("gradient_tolerance", self.gradient_tolerance),
            ("step_tolerance", self.step_tolerance),
            ("function_tolerance", self.function_tolerance),
        ];
        for (key, value) in floats {
            section.insert(key.to_string(), Value::Float(value));
        }
        section.insert(
            "max_iterations".to_string(),
            Value::Integer(self.max_iterations as i64),
        );
        if let Some(n) = self.max_cg_iterations {
            section.insert("max_cg_iterations".to_string(), Value::Integer(n as i64));
        }
        if let Some(eta) = self.cg_relative_tolerance {
            section.insert("cg_relative_tolerance".to_string(), Value::Float(eta));
        }
        section.insert(
            "subproblem".to_string(),
            Value::String(self.subproblem.to_string()),
        );
        let mut root = Table::new();
        root.insert(CONFIG_SECTION.to_string(), Value::Table(section));
        root.to_string()
    }
}
