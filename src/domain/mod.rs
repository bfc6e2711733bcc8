// Market data domain
pub mod market;

// Indicator engine
pub mod indicators;

// Signal rule engine
pub mod rules;

// Core entities
pub mod paper_trade;
pub mod signal;

// Strategy configuration domain
pub mod strategy;

// Evaluation harness records
pub mod evaluation;

// Continuous-learning domain
pub mod optimization;

// Performance measurement domain
pub mod performance;

// Port interfaces
pub mod ports;

// Repository traits
pub mod repositories;

// Domain-specific error types
pub mod errors;
