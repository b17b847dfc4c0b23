//! Persistence infrastructure.
//!
//! - **`config`** – Loads and saves the TOML configuration file.

pub mod config;
