use crate::net::NetError;
use crate::signature::SignatureError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid force-state value `{value}` (expected '', 'leader', or 'not-leader')")]
    InvalidForceState { value: String },
}

#[derive(Debug, Error)]
pub enum QuorateError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Network(#[from] NetError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
}
