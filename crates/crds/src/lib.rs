//! Nginx operator CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the nginx operator.

pub mod conditions;
pub mod nginx;

pub use conditions::*;
pub use nginx::*;
