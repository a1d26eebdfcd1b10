//! Property-based tests for the CSU workspace.
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all property tests
//! cargo test -p proptests
//!
//! # Run with more test cases (slower but more thorough)
//! PROPTEST_CASES=10000 cargo test -p proptests
//!
//! # Run specific test module
//! cargo test -p proptests merkle
//! ```
//!
//! ## Test Categories
//!
//! - **Merkle tests**: proof re-derivation, determinism, tamper detection
//! - **Key tests**: fragment key layout, ordering and parsing
//! - **Distribution tests**: duplicate fragments are never counted twice
//! - **Correlator tests**: repeated or late outcome reports change nothing
//! - **Expiry tests**: every expired session is closed exactly once

// Re-export common for use in test modules
pub use common;

/// Shared test strategies and helpers.
pub mod strategies;

#[cfg(test)]
mod correlator;
#[cfg(test)]
mod distribution;
#[cfg(test)]
mod expiry;
#[cfg(test)]
mod keys;
#[cfg(test)]
mod merkle;
