//! # plantsim_common
//!
//! Shared types, error taxonomy, and configuration for the plantsim
//! industrial control system simulation core. Every other crate in the
//! workspace depends on this one; it depends on nothing else in-tree.

pub mod config;
pub mod consts;
pub mod device;
pub mod error;
pub mod memory;
pub mod prelude;
pub mod types;
