//! Pseudowire emulation: SAToP (structure-agnostic TDM over packet) and the
//! shared PW padding decoder.

pub mod length;
pub mod padding;
pub mod satop;

pub use length::{LengthProblem, PayloadLayout, PayloadShape, arbitrate};
pub use padding::{PW_PADDING_DISSECTOR, PwPadding};
pub use satop::{SATOP_MPLS_DISSECTOR, SATOP_UDP_DISSECTOR, Satop};

/// Size of the PW control word.
pub const CONTROL_WORD_LEN: usize = 4;
