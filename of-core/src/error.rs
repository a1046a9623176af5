//! Error types, shared with the rest of the workspace

pub use of_error::{OpenFanError, Result};
