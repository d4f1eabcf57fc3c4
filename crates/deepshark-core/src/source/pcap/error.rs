use thiserror::Error;

#[derive(Debug, Error)]
pub enum PcapSourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("capture format error ({context}): {message}")]
    Format {
        context: &'static str,
        message: String,
    },
    /// An enhanced packet block points at an interface no IDB declared.
    #[error("frame {frame} references undeclared interface {if_id}")]
    UnknownInterface { frame: u32, if_id: u32 },
}
