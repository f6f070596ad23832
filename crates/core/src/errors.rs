use thiserror::Error;

/// Errors raised while loading or validating controller configuration.
///
/// The controller itself never fails; only the surfaces that read external
/// input (configuration files, environment, command line) return this type.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("unknown congestion control algorithm: {0}")]
    UnknownAlgorithm(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
