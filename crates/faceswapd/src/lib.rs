//! faceswapd — HTTP face swap service.
//!
//! Token-gated `POST /faceswap` hands uploads to a pool of inference threads
//! and answers with a link to the result, which stays retrievable until the
//! retention sweep removes it.

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod swap;

pub use config::Config;
pub use engine::{spawn_engine, EngineHandle, EngineOptions};
pub use http::{router, AppState};
