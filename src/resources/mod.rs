//! Resource generation module.
//!
//! Contains the generators for Kubernetes objects owned by a Platform and
//! the converge primitive that creates or patches them.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | StatefulSet | Broker, storage, CA and broker gateway with data volumes |
//! | Deployment | Stateless microservices and the dashboard |
//! | Service | Stable endpoint per workload |
//! | ConfigMap | Runtime configuration shared by all components |
//! | Secret | Generated credentials |
//! | Job | One-shot legacy CA secret migration |
//! | PriorityClass | Scheduling priority for platform workloads |

pub mod common;
pub mod converge;
pub mod workloads;

// Re-export commonly used items from common
pub use common::{owner_reference, standard_labels};
