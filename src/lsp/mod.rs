//! LSP protocol feature implementations.
//!
//! This module provides diagnostics conversion from grammar check results.

mod diagnostics;

pub use diagnostics::{format_diagnostic, to_diagnostic};
