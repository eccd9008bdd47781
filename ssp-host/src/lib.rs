//! # ssp-host: headless SSP ingest host
//!
//! Loads a TOML file listing camera sources, builds the shared ingest
//! context with the helper process launcher and runs every source until
//! Ctrl-C. Decoded output is counted and summarised in the log.

pub mod config;
pub mod service;
