//! CLI command implementations.

pub mod common;
pub mod config;
pub mod get;
pub mod key;
pub mod put;
pub mod serve;
pub mod warm;
