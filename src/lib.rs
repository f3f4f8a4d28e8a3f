// src/lib.rs

//! Official bulletin monitor library.
//!
//! Each jurisdiction brings its own fetch method and parser; deduplication,
//! diffing, persistence and notification are shared.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
