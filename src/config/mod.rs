//! # Configuration Module
//!
//! Centralizes every tunable and size constant of the engine. Interdependent
//! values are grouped and documented in [`constants`]; import from here
//! rather than redefining values locally.

pub mod constants;
pub use constants::*;
