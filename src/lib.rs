//! Uptime summary engine.
//!
//! Rolls raw health-check samples into uptime percentages, latency rollups,
//! derived monitor status, trend buckets and incidents, serves them over a
//! small JSON API backed by SQLite, and alerts on incident transitions.

pub mod config;
pub mod db;
pub mod engine;
pub mod notifier;
pub mod retention;
pub mod web;
