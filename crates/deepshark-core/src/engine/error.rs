use thiserror::Error;

use crate::catalog::CatalogError;
use crate::dispatch::DispatchError;
use crate::prefs::PrefError;

/// Registration-time failure; the engine is not built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("preference error: {0}")]
    Prefs(#[from] PrefError),
}
