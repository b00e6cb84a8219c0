//! Shared domain types, configuration, and error taxonomy for the
//! feedback reward settlement platform.

pub mod config;
pub mod error;
pub mod types;
