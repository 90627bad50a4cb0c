//! Error taxonomy for the dispatch core.
//!
//! Handler-level failures surface as [`DispatchError`] from
//! [`crate::runner::DispatchCore::handle`]; provider and store failures have
//! their own types so callers can tell them apart.

use thiserror::Error;

use crate::ecs::{DriverId, RideId, RideStatus, SharingRequestId};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("ride {0} not found")]
    RideNotFound(RideId),
    #[error("driver {0} not found")]
    DriverNotFound(DriverId),
    #[error("sharing request {request_id} not found on ride {ride_id}")]
    SharingRequestNotFound {
        ride_id: RideId,
        request_id: SharingRequestId,
    },
    #[error("sharing request {0} was already resolved")]
    SharingAlreadyResolved(SharingRequestId),
    #[error("ride {ride_id} cannot move from {from} to {to}")]
    InvalidTransition {
        ride_id: RideId,
        from: RideStatus,
        to: RideStatus,
    },
    #[error("no active ride found with id {0}")]
    RideNotActive(RideId),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("registry index corrupted: {0}")]
    RegistryCorrupted(String),
}

impl DispatchError {
    /// True for unknown ride/driver/sharing-request ids.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DispatchError::RideNotFound(_)
                | DispatchError::DriverNotFound(_)
                | DispatchError::SharingRequestNotFound { .. }
        )
    }

    /// HTTP-style status for the read/write surface.
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::Validation(_)
            | DispatchError::InvalidTransition { .. }
            | DispatchError::RideNotActive(_)
            | DispatchError::SharingAlreadyResolved(_) => 400,
            DispatchError::RideNotFound(_)
            | DispatchError::DriverNotFound(_)
            | DispatchError::SharingRequestNotFound { .. } => 404,
            DispatchError::Provider(_) | DispatchError::RegistryCorrupted(_) => 500,
        }
    }
}

/// Failures of the external distance, route and scoring providers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider timed out")]
    Timeout,
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("no route between the given waypoints")]
    NoRoute,
}

#[cfg(any(feature = "osrm", feature = "remote-scorer"))]
impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::Unavailable(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("record {0} not found")]
    NotFound(String),
    #[error("record rejected: {0}")]
    Rejected(String),
}
