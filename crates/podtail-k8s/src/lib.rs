//! Kubernetes client for podtail
//!
//! This crate provides the pod log source the tailing session reads from.

mod client;

pub use client::KubeLogSource;

// Re-export types that are used in our public API
pub use podtail_types::{ContainerInfo, ResourcePath};
