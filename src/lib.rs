//! herder - tracks AI coding-agent sessions and the CI status of their branches
//!
//! This library crate exposes internal modules for integration testing.

pub mod config;
pub mod data;
pub mod integrations;
pub mod poller;
pub mod sessions;
pub mod socket;
