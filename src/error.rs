use crate::substrate::SubstrateError;

/// Errors raised while configuring or starting the distribution layer.
#[derive(Debug, thiserror::Error)]
pub enum DistributionError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Substrate(#[from] SubstrateError),
    #[error("distribution is already initialized")]
    AlreadyInitialized,
    #[error("distribution has been finalized")]
    Finalized,
}

impl From<toml::de::Error> for DistributionError {
    fn from(err: toml::de::Error) -> Self {
        DistributionError::Config(err.to_string())
    }
}
