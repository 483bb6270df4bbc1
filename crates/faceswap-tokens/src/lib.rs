//! faceswap-tokens — persistent API tokens and their usage.
//!
//! Tokens are opaque UUID v4 strings. Each carries a request counter that is
//! incremented atomically in SQL, and every counted request leaves an
//! immutable row in the usage log.

pub mod store;

pub use store::TokenStore;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenStoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("cannot create database directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt timestamp {value:?}: {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// An issued token and its counter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenRecord {
    pub token_id: String,
    pub created_at: DateTime<Utc>,
    pub total_requests: u64,
}

/// One counted request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageEntry {
    pub token_id: String,
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
}
