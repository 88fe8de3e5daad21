//! Reconciles declared serverless functions and their event triggers
//! against a function-execution provider.

pub mod arn;
pub mod artifact;
pub mod config;
pub mod credentials;
pub mod error;
pub mod local;
pub mod provider;
pub mod reconcile;

pub use error::{DeployError, DeployResult};
