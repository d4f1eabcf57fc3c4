use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("duplicate field {kind} '{value}'")]
    DuplicateField { kind: &'static str, value: String },
    #[error("unknown field '{filter}'")]
    UnknownField { filter: String },
    #[error("duplicate protocol '{name}'")]
    DuplicateProtocol { name: String },
    #[error("duplicate expert info '{name}'")]
    DuplicateExpert { name: String },
    #[error("field '{filter}' cannot carry a bitmask (type {ftype})")]
    InvalidBitmask { filter: String, ftype: &'static str },
}
