//! Pathogen Analysis Service
//!
//! This library provides the core functionality for the pathogen-analysis
//! system: admission of lab image submissions, durable job tracking in
//! PostgreSQL, priority dispatch through Redis, and the worker that runs
//! the external analysis program.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod worker;
