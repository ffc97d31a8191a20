//! Agent-based adoption diffusion model for distributed generation.
//!
//! A run moves a population of customer-segment agents through a sequence
//! of model years. Each year the mutation pipeline applies that year's
//! prices, policies and financing, the financial engine values a system for
//! every agent, and the diffusion engine turns the resulting market-share
//! ceilings into adopters. Results are committed year by year into a
//! per-run SQLite workspace that `workspace::run_scenario` creates and
//! tears down.

pub mod agent;
pub mod chunk;
pub mod config;
pub mod diffusion;
pub mod engine;
pub mod error;
pub mod event;
pub mod financial;
pub mod mutation;
pub mod nem;
pub mod performance;
pub mod population;
pub mod reference;
pub mod rng;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod workspace;

pub use error::{ErrorKind, ModelError, ModelResult};
pub use workspace::{run_scenario, RunRequest, RunSummary};
