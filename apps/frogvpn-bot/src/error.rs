use frogvpn_db::StoreError;
use thiserror::Error;

use crate::provider::ProvisionError;
use crate::transport::TransportError;

/// Failures surfaced by flow handlers and background jobs.
#[derive(Debug, Error)]
pub enum BotError {
    /// Malformed step input. The flow stays where it is and re-prompts.
    #[error("invalid input: {0}")]
    UserInputInvalid(String),
    #[error("no active flow")]
    NotInFlow,
    #[error("a broadcast is already running")]
    AlreadyRunning,
    #[error("reply target could not be recovered")]
    RouteNotFound,
    #[error("delivery failed: {0}")]
    DeliveryFailed(#[from] TransportError),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl BotError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        BotError::UserInputInvalid(reason.into())
    }
}

impl From<StoreError> for BotError {
    fn from(err: StoreError) -> Self {
        BotError::UpstreamUnavailable(err.to_string())
    }
}

impl From<ProvisionError> for BotError {
    fn from(err: ProvisionError) -> Self {
        BotError::UpstreamUnavailable(err.to_string())
    }
}

pub type BotResult<T> = Result<T, BotError>;
