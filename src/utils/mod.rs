//! The `utils` module provides shared definitions used across `relayhub`:
//! the error taxonomy and logging setup.

pub mod error;
pub mod logging;
