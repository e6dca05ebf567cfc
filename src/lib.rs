//! Normalized query cache engine.
//!
//! See [`cache`] for the engine itself; [`replay`] drives it from a script
//! for the `querynorm` binary.

pub mod cache;
pub mod config;
pub mod infra;
pub mod replay;
