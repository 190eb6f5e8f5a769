//! Trendacquire - trending product acquisition and discovery crawler.
//!
//! Acquires structured product records from a bot-detecting commerce
//! platform through a chain of acquisition tiers, under proxy rotation,
//! fingerprint randomization, and a cross-process safety breaker.

pub mod cli;
pub mod config;
pub mod coordination;
pub mod models;
pub mod normalizer;
pub mod repository;
pub mod schema;
pub mod scrapers;
pub mod services;
