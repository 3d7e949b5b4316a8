// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for the Platform reconciliation pass.
//!
//! These tests drive the real reconciler, migrator, sequencer and finalizer
//! against an in-memory cluster store, WITHOUT requiring a live Kubernetes
//! cluster.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_upgrade_from_green_platform
//! ```
//!
//! ## Test Categories
//!
//! - **Reconcile tests**: full passes through install, upgrade, maintenance
//!   and failure paths
//! - **Migration tests**: adoption of state left by the previous operator generation
//! - **Finalizer tests**: cleanup on deletion
//! - **Component tests**: convergence, removal and health sampling

#[path = "../common/mod.rs"]
mod common;

mod component_tests;
mod finalizer_tests;
mod reconcile_tests;

use std::sync::Arc;

use kube::runtime::controller::Action;
use platform_operator::controller::context::Context;
use platform_operator::controller::error::Error;
use platform_operator::controller::reconciler::reconcile;

use common::memory_store::MemoryStore;

/// Namespace every functional test runs in.
pub const NS: &str = "prod";

/// Run one pass against the latest stored copy of an instance.
pub async fn pass(ctx: &Arc<Context<MemoryStore>>, name: &str) -> Result<Action, Error> {
    let instance = ctx.store.instance(NS, name);
    reconcile(Arc::new(instance), ctx.clone()).await
}
