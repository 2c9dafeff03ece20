//! Integration test utilities for the channel handles
//!
//! This crate provides helpers for running end-to-end tests against a live
//! Redis server.

pub mod helpers;

pub use helpers::*;
