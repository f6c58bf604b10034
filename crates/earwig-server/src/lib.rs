//! # earwig-server
//!
//! HTTP dashboard library for earwig.
//!
//! Provides the API handlers and shared state over the core workflow:
//! registry browsing, scan/pair/connect, and capture session control.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
