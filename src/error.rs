use crate::speedtest::Direction;
use thiserror::Error;

/// Everything that can end a latency check, a transfer stage or a whole run.
///
/// Only `EndpointUnreachable` is recoverable: the selector absorbs it and moves on
/// to the next catalog entry. Every other variant terminates the run it occurs in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeasurementError {
    #[error("endpoint {endpoint_id} is unreachable")]
    EndpointUnreachable { endpoint_id: u32 },
    #[error("no reachable endpoint in catalog")]
    NoReachableEndpoint,
    #[error("{direction} transfer failed on every stream")]
    TransferFailed { direction: Direction },
    #[error("measurement timed out")]
    Timeout,
    #[error("a measurement is already in progress")]
    MeasurementInProgress,
    #[error("cancelled")]
    Cancelled,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid catalog: {0}")]
    Catalog(String),
}
