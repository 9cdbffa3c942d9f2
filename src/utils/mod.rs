//! The `utils` module provides the common definitions used across `mqttkit`:
//! the crate-wide error type and logging initialisation.

pub mod error;
pub mod logging;
