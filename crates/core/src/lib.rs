//! Core library: probe cache, normalization, tier rules, sample detection,
//! naming, planning and reporting.

pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod models;
pub mod naming;
pub mod normalizer;
pub mod pipeline;
pub mod planner;
pub mod report;
pub mod rules;
pub mod samples;
pub mod scanner;

pub use error::{Result, SiftError};
