//! Core types and errors for the dircrawl workspace.
//!
//! This crate provides the foundational pieces shared by the crawler engine
//! and the command-line front end:
//!
//! - [`CrawlerConfig`] - crawl settings (parallelism, filter pattern)
//! - [`ConfigError`] - configuration loading and validation failures

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;

pub use config::{CrawlerConfig, DEFAULT_FILTER, DEFAULT_PARALLEL};
pub use error::ConfigError;
