use thiserror::Error;

use super::table::KeyKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("dissector table '{name}' is already registered")]
    DuplicateTable { name: String },
    #[error("unknown dissector table '{name}'")]
    UnknownTable { name: String },
    #[error("dissector '{name}' is already registered")]
    DuplicateDissector { name: String },
    #[error("unknown dissector '{name}'")]
    UnknownDissector { name: String },
    #[error("table '{table}' expects {expected:?} keys")]
    KeyKindMismatch { table: String, expected: KeyKind },
}
