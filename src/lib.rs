//! Vault Engine Kubernetes Operator
//!
//! This operator mirrors GCPRole and AWSRole custom resources into Vault
//! secret engine roles, and renders Vault storage configuration for etcd.

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;
pub mod storage;
pub mod store;

pub use error::{Error, Result};
