//! Custom Resource Definitions (CRDs) for platform-operator.
//!
//! - `Platform`: one complete platform instance (broker, storage, CA, gateway,
//!   microservices and dashboard)

mod platform;

pub use platform::*;
