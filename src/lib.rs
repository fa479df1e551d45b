#![forbid(unsafe_code)]

//! Shared library for the hometube server binary.
//!
//! The binary under `src/bin/server.rs` wires these modules into the HTTP
//! surface; everything here is independently testable.

pub mod auth;
pub mod config;
pub mod format;
pub mod security;
pub mod store;
