//! Grader configuration management
//!
//! Configuration is loaded from environment variables (and a `.env` file, if
//! present) once at startup, optionally overridden by command-line flags, and
//! validated before any submission is touched.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    C_COMPILER_NAMES, CXX_COMPILER_NAMES, DEFAULT_ASSEMBLER, DEFAULT_BINARY_NAME,
    DEFAULT_BUILD_COMMAND, DEFAULT_BUILD_TIMEOUT_SECS, DEFAULT_CLEAN_COMMAND, DEFAULT_C_COMPILER,
    DEFAULT_CXX_COMPILER, DEFAULT_DIAGNOSTIC_LIMIT_BYTES, DEFAULT_DIFF_PROGRAM,
    DEFAULT_DISABLED_COMMANDS, DEFAULT_IDENTIFIER_PATTERN, DEFAULT_KILL_GRACE_MS,
    DEFAULT_OUTPUT_LIMIT_BYTES, DEFAULT_POINTS_PER_PASS, DEFAULT_RUN_TIMEOUT_SECS, DEFAULT_SHELL,
};

/// Main grader configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub toolchain: ToolchainConfig,
    pub build: BuildConfig,
    pub execution: ExecutionConfig,
    pub scoring: ScoringConfig,
    pub identifier: IdentifierConfig,
}

/// A pinned program plus the flags always passed to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPin {
    pub program: PathBuf,
    pub flags: Vec<String>,
}

impl ToolPin {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            flags: Vec::new(),
        }
    }

    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags = flags.into_iter().map(Into::into).collect();
        self
    }
}

/// Controlled execution environment for every external command
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    /// Shell for free-form command strings
    pub shell: PathBuf,
    /// Command name -> pinned binary
    pub pins: BTreeMap<String, ToolPin>,
    /// Command names replaced by no-ops under the restricted policy
    pub disabled_commands: Vec<String>,
}

/// Build step configuration
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Best-effort clean command (exit status ignored)
    pub clean_command: String,
    /// Build command run from the submission root
    pub build_command: String,
    /// Executable name recognized first
    pub binary_name: String,
    /// Limit for extraction, clean, build and assemble commands
    pub timeout: Duration,
}

/// Fixture execution configuration
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Limit for each run of submission-derived code
    pub run_timeout: Duration,
    /// Delay between SIGTERM and SIGKILL once a limit is hit
    pub kill_grace: Duration,
    /// Cap on captured output per command
    pub output_limit_bytes: usize,
    /// Cap on diagnostics kept in reports
    pub diagnostic_limit_bytes: usize,
    /// Pinned assembler for the generated artifact
    pub assembler: ToolPin,
    /// Line-oriented diff program
    pub diff_program: PathBuf,
}

/// Scoring policy
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub points_per_pass: f64,
}

/// Submission identifier extraction
#[derive(Debug, Clone)]
pub struct IdentifierConfig {
    /// Regex whose first capture group is the identifier
    pub pattern: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Self {
            toolchain: ToolchainConfig::from_env()?,
            build: BuildConfig::from_env()?,
            execution: ExecutionConfig::from_env()?,
            scoring: ScoringConfig::from_env()?,
            identifier: IdentifierConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.scoring.points_per_pass.is_finite() || self.scoring.points_per_pass < 0.0 {
            return Err(ConfigError::InvalidValue("AUTOGRADER_POINTS_PER_PASS".to_string()));
        }
        if self.execution.run_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("AUTOGRADER_RUN_TIMEOUT_SECS".to_string()));
        }
        if self.build.timeout.is_zero() {
            return Err(ConfigError::InvalidValue("AUTOGRADER_BUILD_TIMEOUT_SECS".to_string()));
        }
        if self.build.binary_name.is_empty() || self.build.binary_name.contains('/') {
            return Err(ConfigError::InvalidValue("AUTOGRADER_BINARY_NAME".to_string()));
        }
        if let Err(e) = regex::Regex::new(&self.identifier.pattern) {
            return Err(ConfigError::InvalidPattern(e.to_string()));
        }
        Ok(())
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            shell: PathBuf::from(DEFAULT_SHELL),
            pins: compiler_pins(
                ToolPin::new(DEFAULT_C_COMPILER),
                ToolPin::new(DEFAULT_CXX_COMPILER),
            ),
            disabled_commands: DEFAULT_DISABLED_COMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ToolchainConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let cc = ToolPin::new(env_or("AUTOGRADER_CC", DEFAULT_C_COMPILER))
            .with_flags(env_words("AUTOGRADER_CFLAGS"));
        let cxx = ToolPin::new(env_or("AUTOGRADER_CXX", DEFAULT_CXX_COMPILER))
            .with_flags(env_words("AUTOGRADER_CXXFLAGS"));

        let disabled_commands: Vec<String> = match env::var("AUTOGRADER_DISABLED_COMMANDS") {
            Ok(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => DEFAULT_DISABLED_COMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        for name in &disabled_commands {
            if name.contains('/') {
                return Err(ConfigError::InvalidValue(
                    "AUTOGRADER_DISABLED_COMMANDS".to_string(),
                ));
            }
        }

        Ok(Self {
            shell: PathBuf::from(env_or("AUTOGRADER_SHELL", DEFAULT_SHELL)),
            pins: compiler_pins(cc, cxx),
            disabled_commands,
        })
    }
}

/// Map every known compiler name onto the pinned C or C++ compiler
fn compiler_pins(cc: ToolPin, cxx: ToolPin) -> BTreeMap<String, ToolPin> {
    let mut pins = BTreeMap::new();
    for name in C_COMPILER_NAMES {
        pins.insert(name.to_string(), cc.clone());
    }
    for name in CXX_COMPILER_NAMES {
        pins.insert(name.to_string(), cxx.clone());
    }
    pins
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            clean_command: DEFAULT_CLEAN_COMMAND.to_string(),
            build_command: DEFAULT_BUILD_COMMAND.to_string(),
            binary_name: DEFAULT_BINARY_NAME.to_string(),
            timeout: Duration::from_secs(DEFAULT_BUILD_TIMEOUT_SECS),
        }
    }
}

impl BuildConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            clean_command: env_or("AUTOGRADER_CLEAN_COMMAND", DEFAULT_CLEAN_COMMAND),
            build_command: env_or("AUTOGRADER_BUILD_COMMAND", DEFAULT_BUILD_COMMAND),
            binary_name: env_or("AUTOGRADER_BINARY_NAME", DEFAULT_BINARY_NAME),
            timeout: Duration::from_secs(env_parse(
                "AUTOGRADER_BUILD_TIMEOUT_SECS",
                DEFAULT_BUILD_TIMEOUT_SECS,
            )?),
        })
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
            kill_grace: Duration::from_millis(DEFAULT_KILL_GRACE_MS),
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            diagnostic_limit_bytes: DEFAULT_DIAGNOSTIC_LIMIT_BYTES,
            assembler: ToolPin::new(DEFAULT_ASSEMBLER),
            diff_program: PathBuf::from(DEFAULT_DIFF_PROGRAM),
        }
    }
}

impl ExecutionConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            run_timeout: Duration::from_secs(env_parse(
                "AUTOGRADER_RUN_TIMEOUT_SECS",
                DEFAULT_RUN_TIMEOUT_SECS,
            )?),
            kill_grace: Duration::from_millis(env_parse(
                "AUTOGRADER_KILL_GRACE_MS",
                DEFAULT_KILL_GRACE_MS,
            )?),
            output_limit_bytes: env_parse(
                "AUTOGRADER_OUTPUT_LIMIT_BYTES",
                DEFAULT_OUTPUT_LIMIT_BYTES,
            )?,
            diagnostic_limit_bytes: env_parse(
                "AUTOGRADER_DIAGNOSTIC_LIMIT_BYTES",
                DEFAULT_DIAGNOSTIC_LIMIT_BYTES,
            )?,
            assembler: ToolPin::new(env_or("AUTOGRADER_ASSEMBLER", DEFAULT_ASSEMBLER))
                .with_flags(env_words("AUTOGRADER_ASSEMBLER_FLAGS")),
            diff_program: PathBuf::from(env_or("AUTOGRADER_DIFF", DEFAULT_DIFF_PROGRAM)),
        })
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            points_per_pass: DEFAULT_POINTS_PER_PASS,
        }
    }
}

impl ScoringConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            points_per_pass: env_parse("AUTOGRADER_POINTS_PER_PASS", DEFAULT_POINTS_PER_PASS)?,
        })
    }
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_IDENTIFIER_PATTERN.to_string(),
        }
    }
}

impl IdentifierConfig {
    fn from_env() -> Self {
        Self {
            pattern: env_or("AUTOGRADER_IDENTIFIER_PATTERN", DEFAULT_IDENTIFIER_PATTERN),
        }
    }
}

fn env_or(var: &str, default: &str) -> String {
    env::var(var).unwrap_or_else(|_| default.to_string())
}

fn env_words(var: &str) -> Vec<String> {
    env::var(var)
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

fn env_parse<T: FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(var.to_string())),
        Err(_) => Ok(default),
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),

    #[error("Invalid identifier pattern: {0}")]
    InvalidPattern(String),
}
