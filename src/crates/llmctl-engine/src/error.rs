//! Crate-local error type. Converts from `llmctl_core::EngineError` and
//! `llmctl_store::StoreError` at the boundary so callers in this crate
//! always propagate one error type with `?`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineRuntimeError {
    #[error("engine error: {0}")]
    Engine(#[from] llmctl_core::EngineError),

    #[error("store error: {0}")]
    Store(#[from] llmctl_store::StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineRuntimeError>;
