//! OpenSASE Slips - bank-transfer payment verification
//!
//! Accepts uploaded payment proofs, freezes the cart they pay for, mirrors
//! the cart into an order, and deducts stock exactly once when an admin
//! approves the slip.
//!
//! ## Modules
//! - `domain`: ids, money, slips, carts, orders, events
//! - `repository`: persistence traits with Postgres and in-memory adapters
//! - `storage`: slip file storage
//! - `service`: the slip workflow
//! - `http`: axum routes

use thiserror::Error;

pub mod config;
pub mod domain;
pub mod events;
pub mod http;
pub mod repository;
pub mod service;
pub mod storage;

pub use config::Config;
pub use service::SlipService;

use domain::aggregates::StatusError;
use repository::RepoError;
use storage::{StorageError, UploadRejected};

#[derive(Debug, Error)]
pub enum SlipError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid status: {0}")]
    InvalidTransition(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("database error: {0}")]
    Database(#[from] RepoError),
}

impl From<UploadRejected> for SlipError {
    fn from(e: UploadRejected) -> Self { Self::Validation(e.to_string()) }
}

impl From<StatusError> for SlipError {
    fn from(e: StatusError) -> Self { Self::InvalidTransition(e.0) }
}

pub type Result<T> = std::result::Result<T, SlipError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversions() {
        let e: SlipError = "paid".parse::<domain::aggregates::SlipStatus>().unwrap_err().into();
        assert!(matches!(e, SlipError::InvalidTransition(ref s) if s == "paid"));
        let e: SlipError = UploadRejected::Empty.into();
        assert_eq!(e.to_string(), "slip file is empty");
        let e: SlipError = RepoError::Corrupt("x".into()).into();
        assert!(matches!(e, SlipError::Database(_)));
    }
}
