//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the decode workspace:
//! - Logging and tracing infrastructure
//! - The shared runtime error type
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that other workspace crates
//! depend on. It establishes the logging conventions used by the decode
//! pipeline and its host applications.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
