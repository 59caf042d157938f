//! Access-token handling and credential persistence.
//!
//! The gateway hands out short-lived access tokens during authorization and
//! refresh. This crate owns the token type (with its expiry bookkeeping) and
//! the [`TokenStorage`] trait the session uses to keep tokens across runs,
//! with an in-memory implementation for tests and a file-backed one for real
//! deployments.

#![deny(unsafe_code)]

mod errors;
mod storage;
mod types;

pub use errors::StorageError;
pub use storage::{
    FileTokenStorage, MemoryTokenStorage, TokenStorage, default_credentials_path,
};
pub use types::{AccessToken, DEFAULT_EXPIRY_BUFFER_MS, now_ms};
