//! Geometry kernel gateway
//!
//! The trait every kernel backend implements, plus the two in-process
//! backends: a null kernel and an in-memory preview kernel.

mod journal;
mod preview;
mod traits;

pub use journal::{HandleViolation, KernelCall};
pub use preview::PreviewKernel;
pub use traits::*;
