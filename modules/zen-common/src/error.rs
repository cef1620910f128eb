use thiserror::Error;

/// Workspace-wide error type. Crate-local error enums (`DiscoveryError`,
/// `FilterError`, `PersistError`, ...) convert into this at pipeline
/// boundaries via `#[from]`.
#[derive(Error, Debug)]
pub enum ZenError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("resource not discovered: {0}")]
    ResourceNotDiscovered(String),

    #[error("adapter transient error: {0}")]
    AdapterTransient(String),

    #[error("adapter fatal error: {0}")]
    AdapterFatal(String),

    #[error("filter evaluation error: {0}")]
    FilterEvalError(String),

    #[error("normalize error: {0}")]
    NormalizeError(String),

    #[error("persist transient error: {0}")]
    PersistTransient(String),

    #[error("persist fatal error: {0}")]
    PersistFatal(String),

    #[error("gc error: {0}")]
    GcError(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
