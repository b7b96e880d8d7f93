//! Integration test suite for the Tarn chain core.
//!
//! This crate contains the cross-module tests: end-to-end admission and
//! reorg scenarios against the in-memory store, and property tests that
//! check the chain invariants under randomized block histories.

pub mod helpers;
