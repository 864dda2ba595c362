//! Workspace placeholder crate.
//!
//! This crate exposes feature flags that map to the individual workspace
//! crates (`core-runtime`, `core-decode`). Host applications can depend on
//! `decode-workspace` and enable the documented features without wiring each
//! crate individually.

#[cfg(feature = "runtime")]
pub use core_runtime as runtime;

#[cfg(feature = "decode")]
pub use core_decode as decode;
