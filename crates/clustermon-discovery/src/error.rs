use thiserror::Error;

use clustermon_state::StateError;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("could not fetch discovery targets: {0}")]
    Fetch(String),

    #[error("discovery endpoint returned an error: {0}")]
    Api(String),

    #[error("state store error: {0}")]
    Store(#[from] StateError),

    #[error("discovery cancelled")]
    Cancelled,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("label selector is empty")]
    Empty,

    #[error("invalid label selector term {0:?}, expected label=value")]
    InvalidTerm(String),

    #[error("label {0:?} appears more than once")]
    DuplicateLabel(String),
}
