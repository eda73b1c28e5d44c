// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coopfleet: status aggregation and credential upkeep for a fleet of
//! containerized agent sandboxes.
//!
//! Every sandbox interaction goes through [`engine::Engine`]. [`fleet::Fleet`]
//! ties the registry query, detail fetcher, reconciler and whitelist
//! propagator to one throttled engine.

pub mod cli;
pub mod config;
pub mod credential;
pub mod detail;
pub mod display;
pub mod engine;
pub mod error;
pub mod fleet;
pub mod ops;
pub mod registry;
pub mod test_support;
pub mod whitelist;
