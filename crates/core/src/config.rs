//! File and environment configuration, plus logger setup.
//!
//! A configuration file is TOML with kebab-case keys; every key is optional:
//!
//! ```toml
//! algorithm = "phase"
//! debug = false
//!
//! [phase]
//! mode = "window"
//! beta = 0.6
//!
//! [link]
//! one-way-delay-ms = 40
//! service-time-ms = 2.0
//! ```
//!
//! `PHASECC_ALGORITHM` overrides the algorithm named in the file.

use std::path::Path;
#[cfg(feature = "trace")]
use std::sync::atomic::AtomicBool;

use serde::{Deserialize, Serialize};

use crate::aimd::AimdConfig;
use crate::congestion_control::{CongestionControlAlgorithm, CongestionControlConfig};
use crate::errors::ConfigError;
use crate::phase::PhaseConfig;
use crate::simulation::LinkConfig;

/// Environment variable selecting the congestion control algorithm.
pub const ALGORITHM_ENV: &str = "PHASECC_ALGORITHM";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub algorithm: CongestionControlAlgorithm,
    /// Emit per-event controller logs at DEBUG instead of TRACE.
    pub debug: bool,
    pub phase: PhaseConfig,
    pub aimd: AimdConfig,
    /// Simulated path used by `phasecc-sim`.
    pub link: LinkConfig,
}

impl Config {
    /// Read and validate a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        tracing::debug!(path = %path.display(), algorithm = %config.algorithm, "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate, without environment overrides.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, typically `std::env::var`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ALGORITHM_ENV) {
            self.algorithm = value.parse()?;
            tracing::info!(algorithm = %self.algorithm, "Algorithm overridden from {ALGORITHM_ENV}");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.phase.validate()?;
        self.aimd.validate()?;
        self.link.validate()
    }

    pub fn congestion_config(&self) -> CongestionControlConfig {
        CongestionControlConfig {
            algorithm: self.algorithm,
            debug: self.debug,
            phase: self.phase.clone(),
            aimd: self.aimd.clone(),
        }
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }
}

/// Install the global tracing subscriber, once per process.
///
/// `level` overrides the default filter (`DEBUG` in debug builds, `INFO`
/// otherwise); `RUST_LOG` directives still apply on top of it.
pub fn set_logger(level: Option<tracing::level_filters::LevelFilter>) {
    #[cfg(feature = "trace")]
    {
        static LOGGER_SET: AtomicBool = AtomicBool::new(false);
        if LOGGER_SET
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::Release,
                std::sync::atomic::Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        if let Err(err) = tracer::init_tracer(level) {
            eprintln!("failed tracing initialization: {err}");
        }
    }
    #[cfg(not(feature = "trace"))]
    let _ = level;
}

#[cfg(feature = "trace")]
mod tracer {
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::{layer::SubscriberExt, Layer, Registry};

    pub(super) fn init_tracer(level: Option<LevelFilter>) -> anyhow::Result<()> {
        let default_filter = if cfg!(any(test, debug_assertions)) {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let filter_layer = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(level.unwrap_or(default_filter).into())
            .from_env_lossy();

        let to_stderr = std::env::var("PHASECC_LOG_TO_STDERR").is_ok();
        let use_json = std::env::var("PHASECC_LOG_FORMAT")
            .map(|v| v.to_lowercase() == "json")
            .unwrap_or(false);
        let with_location = cfg!(any(test, debug_assertions));

        let fmt_layer = match (use_json, to_stderr) {
            (true, true) => tracing_subscriber::fmt::layer()
                .with_level(true)
                .json()
                .with_file(with_location)
                .with_line_number(with_location)
                .with_writer(std::io::stderr)
                .boxed(),
            (true, false) => tracing_subscriber::fmt::layer()
                .with_level(true)
                .json()
                .with_file(with_location)
                .with_line_number(with_location)
                .boxed(),
            (false, true) => tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_file(with_location)
                .with_line_number(with_location)
                .with_writer(std::io::stderr)
                .boxed(),
            (false, false) => tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_file(with_location)
                .with_line_number(with_location)
                .boxed(),
        };

        let subscriber = Registry::default().with(fmt_layer.with_filter(filter_layer));
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(())
    }
}
